//! Type registry.
//!
//! Maps native catalog type names to semantic types. Each record carries a
//! column-formatting function (bounded text picks up the column's maximum
//! length) and a default-value transform that turns the catalog's default
//! expression into either a client-side literal or a marker that the value
//! is computed by the server.
//!
//! Composite types discovered in the catalog are registered into the same
//! map at schema-load time, so column resolution never special-cases them.

use crate::entity::composite::CompositeType;
use crate::error::{DbError, DbResult};
use crate::models::value::{DATE_FORMAT, TIME_FORMAT, TIMESTAMP_FORMAT};
use crate::models::{CatalogColumn, CompositeTypeDescription, SemanticType, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Parsed column default.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// Seeded into new instances and matches what the database would store
    Literal(Value),
    /// Computed by the server; read back after insert
    Server,
}

impl DefaultValue {
    pub fn is_server(&self) -> bool {
        matches!(self, Self::Server)
    }

    pub fn literal(&self) -> Option<&Value> {
        match self {
            Self::Literal(v) => Some(v),
            Self::Server => None,
        }
    }
}

impl serde::Serialize for DefaultValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Literal(v) => v.serialize(serializer),
            Self::Server => serializer.serialize_str("<server>"),
        }
    }
}

/// Resolves a column's semantic type from its record and declared length.
pub type ResolveFn = fn(&TypeRecord, Option<usize>) -> SemanticType;

/// Turns a default expression into a default value.
/// Arguments: expression, the column's formatted type name, semantic type.
pub type DefaultTransform = fn(&str, &str, &SemanticType) -> DefaultValue;

#[derive(Debug, Clone)]
pub struct TypeRecord {
    pub native: String,
    pub semantic: SemanticType,
    pub resolve: ResolveFn,
    pub default_transform: DefaultTransform,
}

impl TypeRecord {
    fn new(
        native: &str,
        semantic: SemanticType,
        resolve: ResolveFn,
        default_transform: DefaultTransform,
    ) -> Self {
        Self {
            native: native.to_string(),
            semantic,
            resolve,
            default_transform,
        }
    }
}

fn plain_column(record: &TypeRecord, _max_length: Option<usize>) -> SemanticType {
    record.semantic.clone()
}

fn bounded_column(_record: &TypeRecord, max_length: Option<usize>) -> SemanticType {
    SemanticType::Varchar { max_length }
}

// =============================================================================
// Default transforms
// =============================================================================

/// Strip one layer of wrapping parentheses, e.g. SQLite's `DEFAULT ('x')`.
fn strip_parens(expression: &str) -> &str {
    let trimmed = expression.trim();
    trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// Body of a quoted literal, optionally carrying a cast to the column's own
/// type: `'it''s'::text` gives `it's`.
fn quoted_literal(expression: &str, data_type: &str) -> Option<String> {
    let expression = strip_parens(expression);
    let body = expression
        .strip_suffix(data_type)
        .and_then(|s| s.strip_suffix("::"))
        .unwrap_or(expression);
    let inner = body.strip_prefix('\'')?.strip_suffix('\'')?;
    // 'a' || 'b' is an expression, not one literal
    if inner.replace("''", "").contains('\'') {
        return None;
    }
    Some(inner.replace("''", "'"))
}

/// Quoted literal or a bare token such as `42` or `true`.
fn literal_token(expression: &str, data_type: &str) -> String {
    quoted_literal(expression, data_type).unwrap_or_else(|| strip_parens(expression).to_string())
}

fn text_default(expression: &str, data_type: &str, _semantic: &SemanticType) -> DefaultValue {
    match quoted_literal(expression, data_type) {
        Some(text) => DefaultValue::Literal(Value::Text(text)),
        None => DefaultValue::Server,
    }
}

fn integer_default(expression: &str, data_type: &str, semantic: &SemanticType) -> DefaultValue {
    // Sequence-backed: nextval('t_id_seq'::regclass)
    if expression.contains("::regclass)") {
        return DefaultValue::Server;
    }
    parsed_default(expression, data_type, semantic)
}

fn parsed_default(expression: &str, data_type: &str, semantic: &SemanticType) -> DefaultValue {
    let token = literal_token(expression, data_type);
    match parse_scalar_text(semantic, &token) {
        Ok(value) => DefaultValue::Literal(value),
        Err(_) => DefaultValue::Server,
    }
}

fn server_default(_expression: &str, _data_type: &str, _semantic: &SemanticType) -> DefaultValue {
    DefaultValue::Server
}

// =============================================================================
// Text parsing
// =============================================================================

fn parse_error(text: &str, semantic: &SemanticType) -> DbError {
    DbError::invalid_input(format!("Cannot parse '{}' as {}", text, semantic))
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "t" | "true" | "1" | "y" | "yes" | "on" => Some(true),
        "f" | "false" | "0" | "n" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
                .or_else(|_| DateTime::parse_from_rfc3339(text))
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

fn parse_hex_bytes(text: &str) -> Option<Vec<u8>> {
    let hex = text.strip_prefix("\\x")?;
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Parse the text form of a non-composite value.
pub fn parse_scalar_text(semantic: &SemanticType, text: &str) -> DbResult<Value> {
    let err = || parse_error(text, semantic);
    let value = match semantic {
        SemanticType::Integer => Value::Integer(text.trim().parse().map_err(|_| err())?),
        SemanticType::Text | SemanticType::Varchar { .. } => Value::Text(text.to_string()),
        SemanticType::Boolean => Value::Boolean(parse_bool(text.trim()).ok_or_else(err)?),
        SemanticType::Date => {
            Value::Date(NaiveDate::parse_from_str(text, DATE_FORMAT).map_err(|_| err())?)
        }
        SemanticType::Time => {
            Value::Time(NaiveTime::parse_from_str(text, TIME_FORMAT).map_err(|_| err())?)
        }
        SemanticType::Timestamp => Value::Timestamp(parse_timestamp(text).ok_or_else(err)?),
        SemanticType::Real | SemanticType::Double => {
            Value::Float(text.trim().parse().map_err(|_| err())?)
        }
        SemanticType::Bytes => Value::Bytes(
            parse_hex_bytes(text).unwrap_or_else(|| text.as_bytes().to_vec()),
        ),
        SemanticType::Json => Value::Json(serde_json::from_str(text).map_err(|_| err())?),
        SemanticType::Uuid => Value::Uuid(uuid::Uuid::parse_str(text.trim()).map_err(|_| err())?),
        SemanticType::LargeObject => Value::LargeObject(text.trim().parse().map_err(|_| err())?),
        SemanticType::Composite(_) => return Err(err()),
    };
    Ok(value)
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Clone)]
pub struct TypeRegistry {
    records: HashMap<String, TypeRecord>,
    composites: HashMap<String, Arc<CompositeType>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TypeRegistry {
    /// Registry with every built-in type and its aliases.
    pub fn builtin() -> Self {
        use SemanticType as S;

        let mut registry = Self {
            records: HashMap::new(),
            composites: HashMap::new(),
        };
        let groups: &[(&[&str], SemanticType, ResolveFn, DefaultTransform)] = &[
            (
                &[
                    "integer", "int", "int2", "int4", "int8", "smallint", "bigint", "tinyint",
                    "mediumint", "serial", "bigserial", "smallserial",
                ],
                S::Integer,
                plain_column,
                integer_default,
            ),
            (&["text", "clob"], S::Text, plain_column, text_default),
            (
                &[
                    "character varying",
                    "varchar",
                    "character",
                    "char",
                    "bpchar",
                    "nvarchar",
                    "nchar",
                ],
                S::Varchar { max_length: None },
                bounded_column,
                text_default,
            ),
            (&["boolean", "bool"], S::Boolean, plain_column, parsed_default),
            (&["date"], S::Date, plain_column, server_default),
            (
                &["time", "time without time zone"],
                S::Time,
                plain_column,
                server_default,
            ),
            (
                &[
                    "timestamp",
                    "timestamp without time zone",
                    "timestamp with time zone",
                    "timestamptz",
                    "datetime",
                ],
                S::Timestamp,
                plain_column,
                server_default,
            ),
            (&["real", "float4"], S::Real, plain_column, parsed_default),
            (
                &["double precision", "double", "float8", "float"],
                S::Double,
                plain_column,
                parsed_default,
            ),
            (&["bytea", "blob"], S::Bytes, plain_column, parsed_default),
            (&["json", "jsonb"], S::Json, plain_column, parsed_default),
            (&["uuid"], S::Uuid, plain_column, parsed_default),
            (&["oid"], S::LargeObject, plain_column, parsed_default),
        ];
        for (names, semantic, resolve, transform) in groups {
            for name in *names {
                registry.register(TypeRecord::new(name, semantic.clone(), *resolve, *transform));
            }
        }
        registry
    }

    pub fn register(&mut self, record: TypeRecord) {
        self.records.insert(record.native.to_lowercase(), record);
    }

    /// Look a column type up by underlying name first, then formatted name.
    pub fn lookup(&self, udt_name: &str, data_type: &str) -> Option<&TypeRecord> {
        self.records
            .get(&udt_name.to_lowercase())
            .or_else(|| self.records.get(&data_type.to_lowercase()))
    }

    fn require(&self, udt_name: &str, data_type: &str, object: &str) -> DbResult<&TypeRecord> {
        self.lookup(udt_name, data_type).ok_or_else(|| {
            DbError::schema(
                format!("Unsupported column type '{}' ({})", data_type, udt_name),
                object,
            )
        })
    }

    /// Semantic type of a catalog column. Unknown types are a schema error.
    pub fn resolve_column(&self, table: &str, column: &CatalogColumn) -> DbResult<SemanticType> {
        let object = format!("{}.{}", table, column.name);
        let record = self.require(&column.udt_name, &column.data_type, &object)?;
        Ok((record.resolve)(record, column.max_length))
    }

    /// Parse a column's default expression. `None` when there is no default.
    pub fn parse_default(
        &self,
        column: &CatalogColumn,
        semantic: &SemanticType,
    ) -> Option<DefaultValue> {
        let expression = column.default_expression.as_deref()?.trim();
        if expression.is_empty() || expression.to_ascii_uppercase().starts_with("NULL") {
            return None;
        }
        let record = self.lookup(&column.udt_name, &column.data_type)?;
        let parsed = (record.default_transform)(expression, &column.data_type, semantic);
        debug!(
            column = %column.name,
            expression = %expression,
            parsed = ?parsed,
            "Parsed column default"
        );
        Some(parsed)
    }

    /// Register composite types. Names are registered before attributes are
    /// resolved, so attributes may reference other composites in any order.
    pub fn register_composites(&mut self, types: &[CompositeTypeDescription]) -> DbResult<()> {
        for desc in types {
            self.register(TypeRecord::new(
                &desc.name,
                SemanticType::Composite(desc.name.clone()),
                plain_column,
                server_default,
            ));
        }
        for desc in types {
            let mut attributes = Vec::with_capacity(desc.attributes.len());
            for attr in &desc.attributes {
                let object = format!("{}.{}", desc.name, attr.name);
                let record = self.require(&attr.udt_name, &attr.data_type, &object)?;
                let semantic = (record.resolve)(record, attr.max_length);
                attributes.push((attr.name.clone(), semantic));
            }
            let composite = CompositeType::new(&desc.name, attributes);
            self.composites
                .insert(desc.name.clone(), Arc::new(composite));
        }
        Ok(())
    }

    pub fn composite(&self, name: &str) -> Option<&Arc<CompositeType>> {
        self.composites.get(name)
    }

    /// Registered composite types, ordered by name.
    pub fn composites(&self) -> Vec<&CompositeType> {
        let mut all: Vec<&CompositeType> = self.composites.values().map(Arc::as_ref).collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    fn require_composite(&self, name: &str) -> DbResult<&Arc<CompositeType>> {
        self.composite(name)
            .ok_or_else(|| DbError::schema(format!("Unknown composite type '{}'", name), name))
    }

    /// Parse the text form of any value, composites included.
    pub fn parse_text(&self, semantic: &SemanticType, text: &str) -> DbResult<Value> {
        match semantic {
            SemanticType::Composite(name) => Ok(Value::Composite(
                self.require_composite(name)?.parse_wire(text, self)?,
            )),
            other => parse_scalar_text(other, text),
        }
    }

    /// Build a composite value from a structured document.
    pub fn composite_from_json(&self, name: &str, json: &serde_json::Value) -> DbResult<Value> {
        Ok(Value::Composite(
            self.require_composite(name)?.from_json(json, self)?,
        ))
    }

    /// Normalize a value read from the driver to the column's semantic type.
    /// Values already in the right shape pass through unchanged.
    pub fn from_wire(&self, semantic: &SemanticType, value: Value) -> DbResult<Value> {
        if value.is_null() || semantic.accepts(&value) {
            return Ok(value);
        }
        let converted = match (semantic, value) {
            (SemanticType::Boolean, Value::Integer(i)) => Value::Boolean(i != 0),
            (SemanticType::Real | SemanticType::Double, Value::Integer(i)) => {
                Value::Float(i as f64)
            }
            (SemanticType::LargeObject, Value::Integer(i)) => Value::LargeObject(
                u32::try_from(i).map_err(|_| parse_error(&i.to_string(), semantic))?,
            ),
            (SemanticType::Bytes, Value::Text(s)) => Value::Bytes(s.into_bytes()),
            (_, Value::Text(s)) => self.parse_text(semantic, &s)?,
            (_, other) => other,
        };
        Ok(converted)
    }
}
