//! Value and type models.
//!
//! `Value` is the single dynamic value type that flows between the drivers,
//! the type registry and generated entities. `SemanticType` is the tag a
//! reflected column carries; every write is checked against it.

use base64::Engine;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Text format used for dates on the wire.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Text format used for times on the wire.
pub const TIME_FORMAT: &str = "%H:%M:%S%.f";
/// Text format used for timestamps on the wire.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A scalar produced by an array-oriented numeric library (fixed-width
/// integers and floats). Converted to the native numeric value before a
/// field write is type-checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericScalar {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl NumericScalar {
    /// Integer view, if this scalar is an integer that fits in `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::I8(v) => Some(v.into()),
            Self::I16(v) => Some(v.into()),
            Self::I32(v) => Some(v.into()),
            Self::I64(v) => Some(v),
            Self::U8(v) => Some(v.into()),
            Self::U16(v) => Some(v.into()),
            Self::U32(v) => Some(v.into()),
            Self::U64(v) => i64::try_from(v).ok(),
            Self::F32(_) | Self::F64(_) => None,
        }
    }

    /// Floating point view; integers are widened.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::F32(v) => v.into(),
            Self::F64(v) => v,
            Self::U64(v) => v as f64,
            other => other.as_i64().unwrap_or_default() as f64,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32(_) | Self::F64(_))
    }

    /// Convert to the native value. Unsigned 64-bit values beyond `i64::MAX`
    /// degrade to a float.
    pub fn into_value(self) -> Value {
        match self.as_i64() {
            Some(v) if !self.is_float() => Value::Integer(v),
            _ => Value::Float(self.as_f64()),
        }
    }
}

/// An instance of a composite database type: named, ordered attribute values.
///
/// Composite values are immutable from the outside. Change a composite column
/// by assigning a whole new value.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeValue {
    type_name: String,
    fields: Vec<(String, Value)>,
}

impl CompositeValue {
    pub fn new(type_name: impl Into<String>, fields: Vec<(String, Value)>) -> Self {
        Self {
            type_name: type_name.into(),
            fields,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Read one attribute by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Attributes in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Attribute writes are rejected; build a new value instead.
    pub fn set(&mut self, name: &str, _value: Value) -> crate::error::DbResult<()> {
        Err(crate::error::DbError::unsupported(format!(
            "cannot set attribute '{}' of composite '{}', assign a new value to the column",
            name, self.type_name
        )))
    }

    /// Encode as the parenthesised row literal, e.g. `(1,"a b",)`.
    pub fn to_wire(&self) -> String {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|(_, v)| match v.to_wire_text() {
                None => String::new(),
                Some(text) => quote_composite_item(&text),
            })
            .collect();
        format!("({})", parts.join(","))
    }
}

fn quote_composite_item(text: &str) -> String {
    let needs_quotes = text.is_empty()
        || text
            .chars()
            .any(|c| matches!(c, ',' | '(' | ')' | '"' | '\\') || c.is_whitespace());
    if !needs_quotes {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push(c);
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// A dynamically typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Text(String),
    Boolean(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Float(f64),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Uuid(uuid::Uuid),
    /// Large object reference (PostgreSQL `oid`)
    LargeObject(u32),
    Composite(CompositeValue),
    /// Not yet coerced; see [`NumericScalar`]
    Numeric(NumericScalar),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the runtime type, used in type-mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Text(_) => "text",
            Self::Boolean(_) => "boolean",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Timestamp(_) => "timestamp",
            Self::Float(_) => "float",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
            Self::Uuid(_) => "uuid",
            Self::LargeObject(_) => "large_object",
            Self::Composite(_) => "composite",
            Self::Numeric(_) => "numeric_scalar",
        }
    }

    /// Replace a [`NumericScalar`] by its native value; other values pass through.
    pub fn coerce_numeric(self) -> Self {
        match self {
            Self::Numeric(n) => n.into_value(),
            other => other,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Numeric(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Numeric(n) => Some(n.as_f64()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(j) => Some(j),
            _ => None,
        }
    }

    pub fn as_composite(&self) -> Option<&CompositeValue> {
        match self {
            Self::Composite(c) => Some(c),
            _ => None,
        }
    }

    /// Text rendering used inside composite literals and by backends that
    /// store temporal and structured values as text. `None` for null.
    pub fn to_wire_text(&self) -> Option<String> {
        let text = match self {
            Self::Null => return None,
            Self::Integer(v) => v.to_string(),
            Self::Text(s) => s.clone(),
            Self::Boolean(b) => if *b { "t" } else { "f" }.to_string(),
            Self::Date(d) => d.format(DATE_FORMAT).to_string(),
            Self::Time(t) => t.format(TIME_FORMAT).to_string(),
            Self::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
            Self::Float(v) => v.to_string(),
            Self::Bytes(b) => {
                let mut hex = String::with_capacity(2 + b.len() * 2);
                hex.push_str("\\x");
                for byte in b {
                    hex.push_str(&format!("{:02x}", byte));
                }
                hex
            }
            Self::Json(j) => j.to_string(),
            Self::Uuid(u) => u.to_string(),
            Self::LargeObject(oid) => oid.to_string(),
            Self::Composite(c) => c.to_wire(),
            Self::Numeric(n) => match n.into_value() {
                Self::Integer(v) => v.to_string(),
                _ => n.as_f64().to_string(),
            },
        };
        Some(text)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(v.into())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<uuid::Uuid> for Value {
    fn from(v: uuid::Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<CompositeValue> for Value {
    fn from(v: CompositeValue) -> Self {
        Self::Composite(v)
    }
}

impl From<NumericScalar> for Value {
    fn from(v: NumericScalar) -> Self {
        Self::Numeric(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Integer(v) => serializer.serialize_i64(*v),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Boolean(b) => serializer.serialize_bool(*b),
            Self::Date(d) => serializer.collect_str(&d.format(DATE_FORMAT)),
            Self::Time(t) => serializer.collect_str(&t.format(TIME_FORMAT)),
            Self::Timestamp(ts) => serializer.collect_str(&ts.format("%Y-%m-%dT%H:%M:%S%.f")),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::Bytes(b) => {
                serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(b))
            }
            Self::Json(j) => j.serialize(serializer),
            Self::Uuid(u) => serializer.collect_str(u),
            Self::LargeObject(oid) => serializer.serialize_u32(*oid),
            Self::Composite(c) => {
                let mut map = serializer.serialize_map(Some(c.fields.len()))?;
                for (name, value) in &c.fields {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
            Self::Numeric(n) => n.into_value().serialize(serializer),
        }
    }
}

/// Semantic type of a reflected column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SemanticType {
    Integer,
    Text,
    /// Bounded text; `None` when the catalog reports no limit
    Varchar { max_length: Option<usize> },
    Boolean,
    Date,
    Time,
    Timestamp,
    Real,
    Double,
    Bytes,
    Json,
    Uuid,
    LargeObject,
    /// Custom composite type, by catalog name
    Composite(String),
}

impl SemanticType {
    /// Whether a (numeric-coerced) value has this type's runtime shape.
    /// Null is handled by the nullability check, not here.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Integer, Value::Integer(_))
            | (Self::Text | Self::Varchar { .. }, Value::Text(_))
            | (Self::Boolean, Value::Boolean(_))
            | (Self::Date, Value::Date(_))
            | (Self::Time, Value::Time(_))
            | (Self::Timestamp, Value::Timestamp(_))
            | (Self::Real | Self::Double, Value::Float(_))
            | (Self::Bytes, Value::Bytes(_))
            | (Self::Json, Value::Json(_))
            | (Self::Uuid, Value::Uuid(_))
            | (Self::LargeObject, Value::LargeObject(_)) => true,
            (Self::Composite(name), Value::Composite(c)) => c.type_name() == name,
            _ => false,
        }
    }

    pub fn max_length(&self) -> Option<usize> {
        match self {
            Self::Varchar { max_length } => *max_length,
            _ => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Composite(_))
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::Text => write!(f, "text"),
            Self::Varchar {
                max_length: Some(n),
            } => write!(f, "varchar({})", n),
            Self::Varchar { max_length: None } => write!(f, "varchar"),
            Self::Boolean => write!(f, "boolean"),
            Self::Date => write!(f, "date"),
            Self::Time => write!(f, "time"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Real => write!(f, "real"),
            Self::Double => write!(f, "double"),
            Self::Bytes => write!(f, "bytes"),
            Self::Json => write!(f, "json"),
            Self::Uuid => write!(f, "uuid"),
            Self::LargeObject => write!(f, "large_object"),
            Self::Composite(name) => write!(f, "composite:{}", name),
        }
    }
}

impl Serialize for SemanticType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One result row: column names shared across the result set plus values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Value of the first column with this name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.values.get(i))
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_scalar_coercion() {
        assert_eq!(NumericScalar::I32(7).into_value(), Value::Integer(7));
        assert_eq!(NumericScalar::U8(255).into_value(), Value::Integer(255));
        assert_eq!(NumericScalar::F32(0.5).into_value(), Value::Float(0.5));
        assert_eq!(
            NumericScalar::U64(u64::MAX).into_value(),
            Value::Float(u64::MAX as f64)
        );
        assert_eq!(
            Value::Numeric(NumericScalar::I64(3)).coerce_numeric(),
            Value::Integer(3)
        );
    }

    #[test]
    fn test_semantic_type_accepts() {
        assert!(SemanticType::Integer.accepts(&Value::Integer(1)));
        assert!(!SemanticType::Integer.accepts(&Value::Float(1.0)));
        assert!(
            SemanticType::Varchar {
                max_length: Some(5)
            }
            .accepts(&Value::from("abc"))
        );
        assert!(SemanticType::Double.accepts(&Value::Float(1.5)));
        assert!(!SemanticType::Boolean.accepts(&Value::Integer(1)));

        let addr = CompositeValue::new("address", vec![]);
        assert!(SemanticType::Composite("address".into()).accepts(&Value::from(addr.clone())));
        assert!(!SemanticType::Composite("point".into()).accepts(&Value::from(addr)));
    }

    #[test]
    fn test_semantic_type_display() {
        assert_eq!(
            SemanticType::Varchar {
                max_length: Some(5)
            }
            .to_string(),
            "varchar(5)"
        );
        assert_eq!(
            SemanticType::Composite("address".into()).to_string(),
            "composite:address"
        );
    }

    #[test]
    fn test_composite_wire_encoding() {
        let value = CompositeValue::new(
            "item",
            vec![
                ("id".into(), Value::Integer(1)),
                ("name".into(), Value::from("a \"b\"")),
                ("flag".into(), Value::Boolean(true)),
                ("note".into(), Value::Null),
                ("empty".into(), Value::from("")),
            ],
        );
        assert_eq!(value.to_wire(), r#"(1,"a ""b""",t,,"")"#);
    }

    #[test]
    fn test_composite_set_is_unsupported() {
        let mut value = CompositeValue::new("item", vec![("id".into(), Value::Integer(1))]);
        let err = value.set("id", Value::Integer(2)).unwrap_err();
        assert!(matches!(err, crate::error::DbError::Unsupported { .. }));
        assert_eq!(value.get("id"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_value_serialize() {
        let bytes = serde_json::to_value(Value::Bytes(vec![1, 2, 3])).unwrap();
        assert_eq!(bytes, serde_json::json!("AQID"));

        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(
            serde_json::to_value(Value::Date(date)).unwrap(),
            serde_json::json!("2024-02-29")
        );
        assert_eq!(
            serde_json::to_value(Value::Null).unwrap(),
            serde_json::Value::Null
        );
    }

    #[test]
    fn test_row_lookup() {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string()].into();
        let row = Row::new(columns, vec![Value::Integer(1), Value::from("x")]);
        assert_eq!(row.get("name"), Some(&Value::from("x")));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.get_index(0), Some(&Value::Integer(1)));
        assert_eq!(
            serde_json::to_value(&row).unwrap(),
            serde_json::json!({"id": 1, "name": "x"})
        );
    }

    #[test]
    fn test_bytes_wire_text() {
        assert_eq!(
            Value::Bytes(vec![0xde, 0xad]).to_wire_text().as_deref(),
            Some("\\xdead")
        );
    }
}
