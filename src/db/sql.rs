//! SQL text helpers shared by the persistence layer.
//!
//! Only identifiers and placeholders are ever interpolated into SQL text.
//! Values always travel as bound parameters.

use crate::models::DatabaseType;

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Hands out positional placeholders in the backend's syntax.
///
/// On PostgreSQL each placeholder can carry a cast to the column's catalog
/// type, so untyped NULLs, composites sent as text and integer literals bound
/// to float columns all resolve on the server.
#[derive(Debug, Clone)]
pub struct Placeholders {
    backend: DatabaseType,
    count: usize,
}

impl Placeholders {
    pub fn new(backend: DatabaseType) -> Self {
        Self { backend, count: 0 }
    }

    /// Next placeholder, optionally cast to `cast_type`.
    pub fn next(&mut self, cast_type: Option<&str>) -> String {
        self.count += 1;
        match self.backend {
            DatabaseType::PostgreSQL => match cast_type {
                Some(ty) => format!("${}::{}", self.count, quote_ident(ty)),
                None => format!("${}", self.count),
            },
            DatabaseType::SQLite => "?".to_string(),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Select-list expression for one column. PostgreSQL composites are read in
/// their text form and parsed client-side.
pub fn select_expr(backend: DatabaseType, column: &str, is_composite: bool) -> String {
    let ident = quote_ident(column);
    if is_composite && backend == DatabaseType::PostgreSQL {
        format!("{}::text AS {}", ident, ident)
    } else {
        ident
    }
}

/// ` WHERE <filter>` or nothing.
pub fn where_clause(filter: Option<&str>) -> String {
    match filter.map(str::trim) {
        Some(f) if !f.is_empty() => format!(" WHERE {}", f),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_postgres_placeholders_are_numbered_and_cast() {
        let mut ph = Placeholders::new(DatabaseType::PostgreSQL);
        assert_eq!(ph.next(Some("int4")), "$1::\"int4\"");
        assert_eq!(ph.next(None), "$2");
        assert_eq!(ph.count(), 2);
    }

    #[test]
    fn test_sqlite_placeholders_ignore_casts() {
        let mut ph = Placeholders::new(DatabaseType::SQLite);
        assert_eq!(ph.next(Some("varchar")), "?");
        assert_eq!(ph.next(None), "?");
    }

    #[test]
    fn test_select_expr() {
        assert_eq!(
            select_expr(DatabaseType::PostgreSQL, "addr", true),
            "\"addr\"::text AS \"addr\""
        );
        assert_eq!(select_expr(DatabaseType::SQLite, "addr", true), "\"addr\"");
        assert_eq!(select_expr(DatabaseType::PostgreSQL, "id", false), "\"id\"");
    }

    #[test]
    fn test_where_clause() {
        assert_eq!(where_clause(None), "");
        assert_eq!(where_clause(Some("  ")), "");
        assert_eq!(where_clause(Some("id = $1")), " WHERE id = $1");
    }
}
