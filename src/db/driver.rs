//! Blocking driver seam.
//!
//! A [`Connection`] is one live database handle. Every call runs in its own
//! transaction: begin, run the statement, commit. A failed statement is
//! rolled back before the error is returned, so a connection is never left
//! inside an open transaction.
//!
//! The bundled drivers wrap `sqlx` connections and drive them on a private
//! current-thread runtime, which makes them unusable from inside another
//! async runtime.

use crate::db::{postgres::PgDriver, sqlite::SqliteDriver};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, Row, Value};

/// SQL text plus positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append one positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Append several positional parameters.
    pub fn bind_all(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.params.extend(values);
        self
    }
}

/// A live, blocking database connection.
pub trait Connection: Send {
    fn backend(&self) -> DatabaseType;

    /// Run a statement and return its rows.
    fn fetch(&mut self, statement: &Statement) -> DbResult<Vec<Row>>;

    /// Run a statement and return the number of affected rows.
    fn execute(&mut self, statement: &Statement) -> DbResult<u64>;

    /// Close the connection.
    fn close(self: Box<Self>) -> DbResult<()>;
}

/// Produces a fresh connection; called once per (re)connect.
pub type ConnectionFactory = Box<dyn Fn() -> DbResult<Box<dyn Connection>> + Send + Sync>;

/// Open a connection to the database named by `connection_string`.
pub fn open(connection_string: &str) -> DbResult<Box<dyn Connection>> {
    match DatabaseType::from_connection_string(connection_string) {
        Some(DatabaseType::PostgreSQL) => Ok(Box::new(PgDriver::connect(connection_string)?)),
        Some(DatabaseType::SQLite) => Ok(Box::new(SqliteDriver::connect(connection_string)?)),
        None => Err(DbError::invalid_input(
            "Unknown database type in connection string, use a postgres:// or sqlite: URL",
        )),
    }
}

/// Build a factory that opens `connection_string` on every call.
pub fn url_factory(connection_string: impl Into<String>) -> ConnectionFactory {
    let connection_string = connection_string.into();
    Box::new(move || open(&connection_string))
}

/// Create the single-threaded runtime a driver blocks on.
pub(crate) fn blocking_runtime() -> DbResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| DbError::internal(format!("Failed to start driver runtime: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_builder() {
        let stmt = Statement::new("SELECT * FROM t WHERE a = ? AND b = ?")
            .bind(1)
            .bind("x");
        assert_eq!(stmt.params, vec![Value::Integer(1), Value::from("x")]);

        let stmt = Statement::new("SELECT 1").bind_all(vec![Value::Null, Value::Boolean(true)]);
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn test_open_unknown_scheme() {
        let err = open("mysql://localhost/db").err().unwrap();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert!(!err.is_retryable());
    }
}
