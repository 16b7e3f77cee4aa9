//! Statement builders for entity persistence.

use crate::db::driver::Statement;
use crate::db::sql::{Placeholders, quote_ident, select_expr, where_clause};
use crate::entity::descriptor::{ColumnDescriptor, EntityType};
use crate::models::{DatabaseType, Value};

fn select_list<'a>(
    backend: DatabaseType,
    columns: impl Iterator<Item = &'a ColumnDescriptor>,
) -> String {
    columns
        .map(|c| select_expr(backend, &c.name, c.semantic.is_composite()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `"a" = $1::"int4" AND "b" = $2::"text"`
fn equality_predicate(
    placeholders: &mut Placeholders,
    columns: &[(&ColumnDescriptor, Value)],
) -> (String, Vec<Value>) {
    let mut parts = Vec::with_capacity(columns.len());
    let mut params = Vec::with_capacity(columns.len());
    for (column, value) in columns {
        parts.push(format!(
            "{} = {}",
            quote_ident(&column.name),
            placeholders.next(Some(column.native_type.as_str()))
        ));
        params.push(value.clone());
    }
    (parts.join(" AND "), params)
}

/// Every column of the entity, with a raw filter fragment.
pub fn select(
    entity: &EntityType,
    backend: DatabaseType,
    filter: Option<&str>,
    params: &[Value],
) -> Statement {
    Statement::new(format!(
        "SELECT {} FROM {}{}",
        select_list(backend, entity.columns().iter()),
        quote_ident(entity.name()),
        where_clause(filter)
    ))
    .bind_all(params.iter().cloned())
}

/// First row matching a raw filter fragment.
pub fn select_first(
    entity: &EntityType,
    backend: DatabaseType,
    filter: Option<&str>,
    params: &[Value],
) -> Statement {
    let mut statement = select(entity, backend, filter, params);
    statement.sql.push_str(" LIMIT 1");
    statement
}

/// Rows whose columns equal the given values.
pub fn select_where(
    entity: &EntityType,
    backend: DatabaseType,
    key: &[(&ColumnDescriptor, Value)],
) -> Statement {
    let mut placeholders = Placeholders::new(backend);
    let (predicate, params) = equality_predicate(&mut placeholders, key);
    select(entity, backend, Some(predicate.as_str()), &params)
}

pub fn count(entity: &EntityType, filter: Option<&str>, params: &[Value]) -> Statement {
    Statement::new(format!(
        "SELECT COUNT(*) AS \"count\" FROM {}{}",
        quote_ident(entity.name()),
        where_clause(filter)
    ))
    .bind_all(params.iter().cloned())
}

pub fn delete(entity: &EntityType, filter: Option<&str>, params: &[Value]) -> Statement {
    Statement::new(format!(
        "DELETE FROM {}{}",
        quote_ident(entity.name()),
        where_clause(filter)
    ))
    .bind_all(params.iter().cloned())
}

pub fn delete_where(
    entity: &EntityType,
    backend: DatabaseType,
    key: &[(&ColumnDescriptor, Value)],
) -> Statement {
    let mut placeholders = Placeholders::new(backend);
    let (predicate, params) = equality_predicate(&mut placeholders, key);
    delete(entity, Some(predicate.as_str()), &params)
}

/// Single-row insert of the supplied columns, returning the columns the
/// server computes.
pub fn insert(
    entity: &EntityType,
    backend: DatabaseType,
    values: &[(&ColumnDescriptor, Value)],
) -> Statement {
    let table = quote_ident(entity.name());
    let mut sql = if values.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", table)
    } else {
        let mut placeholders = Placeholders::new(backend);
        let names: Vec<String> = values.iter().map(|(c, _)| quote_ident(&c.name)).collect();
        let slots: Vec<String> = values
            .iter()
            .map(|(c, _)| placeholders.next(Some(c.native_type.as_str())))
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            names.join(", "),
            slots.join(", ")
        )
    };
    let returning: Vec<&ColumnDescriptor> = entity
        .columns()
        .iter()
        .filter(|c| c.get_value_on_insert)
        .collect();
    if !returning.is_empty() {
        sql.push_str(" RETURNING ");
        sql.push_str(&select_list(backend, returning.into_iter()));
    }
    Statement::new(sql).bind_all(values.iter().map(|(_, v)| v.clone()))
}

/// One multi-row insert.
pub fn insert_many(
    entity: &EntityType,
    backend: DatabaseType,
    columns: &[&ColumnDescriptor],
    rows: Vec<Vec<Value>>,
) -> Statement {
    let mut placeholders = Placeholders::new(backend);
    let tuples: Vec<String> = rows
        .iter()
        .map(|_| {
            let slots: Vec<String> = columns
                .iter()
                .map(|c| placeholders.next(Some(c.native_type.as_str())))
                .collect();
            format!("({})", slots.join(", "))
        })
        .collect();
    let names: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
    Statement::new(format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(entity.name()),
        names.join(", "),
        tuples.join(", ")
    ))
    .bind_all(rows.into_iter().flatten())
}

/// Update the given columns of the rows matching `key`.
pub fn update(
    entity: &EntityType,
    backend: DatabaseType,
    set: &[(&ColumnDescriptor, Value)],
    key: &[(&ColumnDescriptor, Value)],
) -> Statement {
    let mut placeholders = Placeholders::new(backend);
    let assignments: Vec<String> = set
        .iter()
        .map(|(c, _)| {
            format!(
                "{} = {}",
                quote_ident(&c.name),
                placeholders.next(Some(c.native_type.as_str()))
            )
        })
        .collect();
    let (predicate, key_params) = equality_predicate(&mut placeholders, key);
    Statement::new(format!(
        "UPDATE {} SET {} WHERE {}",
        quote_ident(entity.name()),
        assignments.join(", "),
        predicate
    ))
    .bind_all(set.iter().map(|(_, v)| v.clone()))
    .bind_all(key_params)
}
