//! Schema reflection.
//!
//! Reads the catalog of one schema and normalizes it into a
//! [`SchemaDescription`]: tables and views with their columns, primary keys
//! and foreign keys, reverse edges, composite types and routines.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Database-specific implementations are in their respective
//! submodules (postgres, sqlite), each producing the same normalized records.
//!
//! Every catalog read goes through [`Session::fetch_once`], so a reflection
//! pass never recurses into a reconnect. Any failure aborts the whole pass.

use crate::db::driver::Statement;
use crate::db::session::Session;
use crate::error::{DbError, DbResult};
use crate::models::{
    CatalogColumn, CompositeAttribute, CompositeTypeDescription, DatabaseType, ForeignKeyEdge,
    Row, RoutineDescription, RoutineKind, RoutineParam, SchemaDescription, TableDescription,
    TableType, Value,
};
use tracing::{debug, info, warn};

/// Schema reflector for database introspection.
pub struct SchemaReflector;

impl SchemaReflector {
    /// Reflect every table, view, composite type and routine in `schema`.
    pub fn reflect(session: &Session, schema: &str) -> DbResult<SchemaDescription> {
        let backend = session.backend();
        let mut description = SchemaDescription::new(backend, schema);
        match backend {
            DatabaseType::PostgreSQL => {
                description.tables = postgres::tables(session, schema)?;
                description.composites = postgres::composites(session, schema)?;
                description.routines = postgres::routines(session, schema)?;
            }
            DatabaseType::SQLite => {
                description.tables = sqlite::tables(session)?;
            }
        }
        description.link_reverse_edges();
        info!(
            backend = %backend,
            schema = schema,
            tables = description.tables.len(),
            composites = description.composites.len(),
            routines = description.routines.len(),
            "Reflected schema"
        );
        Ok(description)
    }
}

/// Run one catalog read. Connection loss stays retryable; anything else is a
/// schema-load failure naming the object being read.
fn catalog_read(session: &Session, statement: Statement, object: &str) -> DbResult<Vec<Row>> {
    session.fetch_once(&statement).map_err(|e| {
        if e.is_retryable() {
            e
        } else {
            DbError::schema(format!("Catalog read failed: {}", e), object)
        }
    })
}

fn get_string(row: &Row, column: &str) -> DbResult<String> {
    match row.get(column) {
        Some(Value::Text(s)) => Ok(s.clone()),
        other => Err(DbError::schema(
            format!("Unexpected catalog value {:?}", other),
            column,
        )),
    }
}

fn get_optional_string(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(Value::as_str).map(String::from)
}

fn get_i64(row: &Row, column: &str) -> Option<i64> {
    row.get(column).and_then(Value::as_i64)
}

fn get_flag(row: &Row, column: &str) -> bool {
    match row.get(column) {
        Some(Value::Boolean(b)) => *b,
        Some(Value::Integer(i)) => *i != 0,
        _ => false,
    }
}

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const LIST_TABLES: &str = r#"
            SELECT
                t.table_name::text AS table_name,
                t.table_type::text AS table_type
            FROM information_schema.tables t
            WHERE t.table_schema = $1::text
            AND t.table_type IN ('BASE TABLE', 'VIEW')
            ORDER BY t.table_name
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
            SELECT
                c.column_name::text AS column_name,
                c.data_type::text AS data_type,
                c.udt_name::text AS udt_name,
                c.ordinal_position::int4 AS ordinal_position,
                c.column_default::text AS column_default,
                (c.is_nullable = 'YES') AS nullable,
                (c.is_updatable = 'YES') AS updatable,
                c.character_maximum_length::int4 AS max_length
            FROM information_schema.columns c
            WHERE c.table_schema = $1::text AND c.table_name = $2::text
            ORDER BY c.ordinal_position
            "#;

        pub const DESCRIBE_PRIMARY_KEY: &str = r#"
            SELECT kcu.column_name::text AS column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
                AND tc.table_name = kcu.table_name
            WHERE tc.table_schema = $1::text
            AND tc.table_name = $2::text
            AND tc.constraint_type = 'PRIMARY KEY'
            ORDER BY kcu.ordinal_position
            "#;

        pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
            SELECT
                kcu1.column_name::text AS column_name,
                kcu2.table_name::text AS referenced_table,
                kcu2.column_name::text AS referenced_column
            FROM information_schema.referential_constraints rc
            JOIN information_schema.key_column_usage kcu1
                ON kcu1.constraint_catalog = rc.constraint_catalog
                AND kcu1.constraint_schema = rc.constraint_schema
                AND kcu1.constraint_name = rc.constraint_name
            JOIN information_schema.key_column_usage kcu2
                ON kcu2.constraint_catalog = rc.unique_constraint_catalog
                AND kcu2.constraint_schema = rc.unique_constraint_schema
                AND kcu2.constraint_name = rc.unique_constraint_name
                AND kcu2.ordinal_position = kcu1.position_in_unique_constraint
            WHERE kcu1.table_schema = $1::text AND kcu1.table_name = $2::text
            ORDER BY kcu1.ordinal_position
            "#;

        pub const LIST_COMPOSITE_ATTRIBUTES: &str = r#"
            SELECT
                a.udt_name::text AS type_name,
                a.attribute_name::text AS attribute_name,
                a.data_type::text AS data_type,
                a.attribute_udt_name::text AS udt_name,
                a.character_maximum_length::int4 AS max_length
            FROM information_schema.attributes a
            WHERE a.udt_schema = $1::text
            ORDER BY a.udt_name, a.ordinal_position
            "#;

        pub const LIST_ROUTINES: &str = r#"
            SELECT
                r.specific_name::text AS specific_name,
                r.routine_name::text AS routine_name,
                r.routine_type::text AS routine_type,
                r.data_type::text AS data_type,
                r.type_udt_name::text AS type_udt_name
            FROM information_schema.routines r
            WHERE r.specific_schema = $1::text
            AND r.routine_type IN ('FUNCTION', 'PROCEDURE')
            ORDER BY r.routine_name, r.specific_name
            "#;

        pub const LIST_ROUTINE_PARAMETERS: &str = r#"
            SELECT
                p.specific_name::text AS specific_name,
                p.parameter_name::text AS parameter_name,
                p.parameter_mode::text AS parameter_mode,
                p.data_type::text AS data_type,
                p.udt_name::text AS udt_name
            FROM information_schema.parameters p
            WHERE p.specific_schema = $1::text
            ORDER BY p.specific_name, p.ordinal_position
            "#;
    }

    pub mod sqlite {
        pub const LIST_TABLES: &str = r#"
            SELECT name, type FROM sqlite_master
            WHERE type IN ('table', 'view')
            AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#;

        pub const DESCRIBE_COLUMNS: &str =
            r#"SELECT cid, name, type, "notnull", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid"#;

        pub const DESCRIBE_FOREIGN_KEYS: &str =
            r#"SELECT "from", "table", "to" FROM pragma_foreign_key_list(?) ORDER BY id, seq"#;
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod postgres {
    use super::*;
    use std::collections::HashMap;

    pub fn tables(session: &Session, schema: &str) -> DbResult<Vec<TableDescription>> {
        let rows = catalog_read(
            session,
            Statement::new(queries::postgres::LIST_TABLES).bind(schema),
            schema,
        )?;
        let mut tables = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = get_string(row, "table_name")?;
            let table_type = TableType::parse(&get_string(row, "table_type")?);
            tables.push(describe_table(session, schema, name, table_type)?);
        }
        debug!(count = tables.len(), schema = schema, "Listed PostgreSQL tables");
        Ok(tables)
    }

    fn describe_table(
        session: &Session,
        schema: &str,
        name: String,
        table_type: TableType,
    ) -> DbResult<TableDescription> {
        let pk_rows = catalog_read(
            session,
            Statement::new(queries::postgres::DESCRIBE_PRIMARY_KEY)
                .bind(schema)
                .bind(name.as_str()),
            &name,
        )?;
        let primary_key = pk_rows
            .iter()
            .map(|r| get_string(r, "column_name"))
            .collect::<DbResult<Vec<_>>>()?;

        let column_rows = catalog_read(
            session,
            Statement::new(queries::postgres::DESCRIBE_COLUMNS)
                .bind(schema)
                .bind(name.as_str()),
            &name,
        )?;
        let mut table = TableDescription::new(name, table_type);
        for row in &column_rows {
            let column_name = get_string(row, "column_name")?;
            let mut column = CatalogColumn::new(
                column_name.as_str(),
                get_string(row, "data_type")?,
                get_i64(row, "ordinal_position").unwrap_or_default() as i32,
            )
            .with_udt_name(get_string(row, "udt_name")?)
            .with_nullable(get_flag(row, "nullable"))
            .with_updatable(get_flag(row, "updatable"))
            .with_max_length(get_i64(row, "max_length").map(|n| n as usize))
            .with_primary_key(primary_key.contains(&column_name));
            column.default_expression = get_optional_string(row, "column_default");
            table = table.with_column(column);
        }

        let fk_rows = catalog_read(
            session,
            Statement::new(queries::postgres::DESCRIBE_FOREIGN_KEYS)
                .bind(schema)
                .bind(table.name.as_str()),
            &table.name,
        )?;
        for row in &fk_rows {
            table = table.with_foreign_key(ForeignKeyEdge::new(
                get_string(row, "column_name")?,
                get_string(row, "referenced_table")?,
                get_string(row, "referenced_column")?,
            ));
        }
        Ok(table)
    }

    pub fn composites(session: &Session, schema: &str) -> DbResult<Vec<CompositeTypeDescription>> {
        let rows = catalog_read(
            session,
            Statement::new(queries::postgres::LIST_COMPOSITE_ATTRIBUTES).bind(schema),
            schema,
        )?;
        let mut composites: Vec<CompositeTypeDescription> = Vec::new();
        for row in &rows {
            let type_name = get_string(row, "type_name")?;
            let attribute = CompositeAttribute {
                name: get_string(row, "attribute_name")?,
                data_type: get_string(row, "data_type")?,
                udt_name: get_string(row, "udt_name")?,
                max_length: get_i64(row, "max_length").map(|n| n as usize),
            };
            match composites.last_mut() {
                Some(last) if last.name == type_name => last.attributes.push(attribute),
                _ => composites.push(CompositeTypeDescription {
                    name: type_name,
                    attributes: vec![attribute],
                }),
            }
        }
        debug!(count = composites.len(), schema = schema, "Listed composite types");
        Ok(composites)
    }

    /// Declared type name, preferring the underlying name for user-defined
    /// and array types.
    fn type_name(data_type: String, udt_name: Option<String>) -> String {
        match udt_name {
            Some(udt) if data_type == "USER-DEFINED" || data_type == "ARRAY" => udt,
            _ => data_type,
        }
    }

    pub fn routines(session: &Session, schema: &str) -> DbResult<Vec<RoutineDescription>> {
        let param_rows = catalog_read(
            session,
            Statement::new(queries::postgres::LIST_ROUTINE_PARAMETERS).bind(schema),
            schema,
        )?;
        let mut params: HashMap<String, (Vec<RoutineParam>, Vec<RoutineParam>)> = HashMap::new();
        for row in &param_rows {
            let specific = get_string(row, "specific_name")?;
            let mode = get_optional_string(row, "parameter_mode").unwrap_or_else(|| "IN".into());
            let param = RoutineParam {
                name: get_optional_string(row, "parameter_name").filter(|n| !n.is_empty()),
                data_type: get_string(row, "data_type")?,
                udt_name: get_string(row, "udt_name")?,
            };
            let entry = params.entry(specific).or_default();
            match mode.as_str() {
                "OUT" => entry.1.push(param),
                "INOUT" => {
                    entry.0.push(param.clone());
                    entry.1.push(param);
                }
                _ => entry.0.push(param),
            }
        }

        let rows = catalog_read(
            session,
            Statement::new(queries::postgres::LIST_ROUTINES).bind(schema),
            schema,
        )?;
        let mut routines: Vec<RoutineDescription> = Vec::new();
        for row in &rows {
            let name = get_string(row, "routine_name")?;
            let kind = RoutineKind::parse(&get_string(row, "routine_type")?);
            let return_type = get_optional_string(row, "data_type")
                .map(|t| type_name(t, get_optional_string(row, "type_udt_name")));
            if return_type.as_deref() == Some("trigger") {
                continue;
            }
            if routines.iter().any(|r| r.name == name) {
                warn!(routine = %name, "Skipping overloaded routine, only the first is exposed");
                continue;
            }
            let (in_params, out_params) = params
                .remove(&get_string(row, "specific_name")?)
                .unwrap_or_default();
            routines.push(RoutineDescription {
                name,
                kind,
                in_params,
                out_params,
                return_type: match kind {
                    RoutineKind::Procedure => None,
                    RoutineKind::Function => return_type,
                },
            });
        }
        debug!(count = routines.len(), schema = schema, "Listed routines");
        Ok(routines)
    }
}

mod sqlite {
    use super::*;

    /// Split a declared type such as `VARCHAR(5)` into its lowercase base
    /// name and length. Columns declared without a type read as text.
    pub(super) fn parse_declared_type(declared: &str) -> (String, Option<usize>) {
        let declared = declared.trim();
        if declared.is_empty() {
            return ("text".to_string(), None);
        }
        match declared.split_once('(') {
            Some((base, rest)) => {
                let length = rest
                    .trim_end_matches(')')
                    .split(',')
                    .next()
                    .and_then(|n| n.trim().parse().ok());
                (base.trim().to_lowercase(), length)
            }
            None => (declared.to_lowercase(), None),
        }
    }

    struct PendingForeignKey {
        column: String,
        referenced_table: String,
        referenced_column: Option<String>,
    }

    pub fn tables(session: &Session) -> DbResult<Vec<TableDescription>> {
        let rows = catalog_read(session, Statement::new(queries::sqlite::LIST_TABLES), "main")?;
        let mut tables = Vec::with_capacity(rows.len());
        let mut pending = Vec::new();
        for row in &rows {
            let name = get_string(row, "name")?;
            let table_type = TableType::parse(&get_string(row, "type")?);
            let (table, fks) = describe_table(session, name, table_type)?;
            pending.push(fks);
            tables.push(table);
        }

        // An omitted target column means the referenced table's primary key
        let mut resolved = Vec::with_capacity(tables.len());
        for fks in pending {
            let mut edges = Vec::with_capacity(fks.len());
            for fk in fks {
                let referenced_column = match fk.referenced_column {
                    Some(column) => column,
                    None => tables
                        .iter()
                        .find(|t: &&TableDescription| t.name == fk.referenced_table)
                        .and_then(|t| t.primary_key().first().map(|c| c.to_string()))
                        .ok_or_else(|| {
                            DbError::schema(
                                format!(
                                    "Cannot resolve the column referenced by '{}'",
                                    fk.column
                                ),
                                fk.referenced_table.as_str(),
                            )
                        })?,
                };
                edges.push(ForeignKeyEdge::new(
                    fk.column,
                    fk.referenced_table,
                    referenced_column,
                ));
            }
            resolved.push(edges);
        }
        for (table, edges) in tables.iter_mut().zip(resolved) {
            table.foreign_keys = edges;
        }
        debug!(count = tables.len(), "Listed SQLite tables");
        Ok(tables)
    }

    fn describe_table(
        session: &Session,
        name: String,
        table_type: TableType,
    ) -> DbResult<(TableDescription, Vec<PendingForeignKey>)> {
        let rows = catalog_read(
            session,
            Statement::new(queries::sqlite::DESCRIBE_COLUMNS).bind(name.as_str()),
            &name,
        )?;
        let updatable = table_type == TableType::Table;
        let mut table = TableDescription::new(name, table_type);
        for row in &rows {
            let declared = get_optional_string(row, "type").unwrap_or_default();
            let (base, max_length) = parse_declared_type(&declared);
            let is_pk = get_i64(row, "pk").unwrap_or(0) > 0;
            let mut column = CatalogColumn::new(
                get_string(row, "name")?,
                base,
                get_i64(row, "cid").unwrap_or_default() as i32 + 1,
            )
            .with_nullable(!get_flag(row, "notnull") && !is_pk)
            .with_updatable(updatable)
            .with_max_length(max_length)
            .with_primary_key(is_pk);
            column.default_expression = get_optional_string(row, "dflt_value");
            table = table.with_column(column);
        }

        let fk_rows = catalog_read(
            session,
            Statement::new(queries::sqlite::DESCRIBE_FOREIGN_KEYS).bind(table.name.as_str()),
            &table.name,
        )?;
        let fks = fk_rows
            .iter()
            .map(|row| {
                Ok(PendingForeignKey {
                    column: get_string(row, "from")?,
                    referenced_table: get_string(row, "table")?,
                    referenced_column: get_optional_string(row, "to"),
                })
            })
            .collect::<DbResult<Vec<_>>>()?;
        Ok((table, fks))
    }
}
