//! Error types for schema-mirror.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Variants fall into the classes callers need to tell apart: validation and
//! permission failures raised before anything reaches the database, transient
//! connection failures that the session retries, and database errors that are
//! surfaced as-is.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "23505" for unique violation
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Permission denied: {operation} - {reason}")]
    Permission { operation: String, reason: String },

    #[error("The value of [{column}] cannot be null")]
    NullViolation { column: String },

    #[error("Value of [{column}] should be of type [{expected}] not [{actual}]")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("Value length [{actual}] of [{column}] should not exceed [{max}]")]
    LengthViolation {
        column: String,
        actual: usize,
        max: usize,
    },

    #[error("{entity} does not have an attribute {field}")]
    UnknownField { entity: String, field: String },

    #[error(
        "{operation} on '{entity}' needs columns to match on, is the table missing a primary key?"
    )]
    MissingPrimaryKey { entity: String, operation: String },

    #[error("Invalid document text for [{column}]: {message} (text: {text})")]
    Syntax {
        column: String,
        text: String,
        message: String,
    },

    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a permission error.
    pub fn permission(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Permission {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn null_violation(column: impl Into<String>) -> Self {
        Self::NullViolation {
            column: column.into(),
        }
    }

    pub fn type_mismatch(
        column: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            column: column.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn length_violation(column: impl Into<String>, actual: usize, max: usize) -> Self {
        Self::LengthViolation {
            column: column.into(),
            actual,
            max,
        }
    }

    pub fn unknown_field(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            entity: entity.into(),
            field: field.into(),
        }
    }

    pub fn missing_primary_key(entity: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::MissingPrimaryKey {
            entity: entity.into(),
            operation: operation.into(),
        }
    }

    pub fn syntax(
        column: impl Into<String>,
        text: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Syntax {
            column: column.into(),
            text: text.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// SQLSTATE reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Only lost connections are retried; everything else propagates immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Check if this error was raised by client-side validation before any
    /// statement was issued.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NullViolation { .. }
                | Self::TypeMismatch { .. }
                | Self::LengthViolation { .. }
                | Self::UnknownField { .. }
                | Self::MissingPrimaryKey { .. }
                | Self::Syntax { .. }
        )
    }

    /// Check if this error is a uniqueness, foreign-key, not-null or check
    /// constraint violation reported by the database (SQLSTATE class 23).
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Self::Database {
                sql_state: Some(code),
                ..
            } => code.starts_with("23") || is_sqlite_constraint_code(code),
            _ => false,
        }
    }
}

/// SQLite reports extended result codes rather than SQLSTATE; 19 is
/// SQLITE_CONSTRAINT and its extended codes share the low byte.
fn is_sqlite_constraint_code(code: &str) -> bool {
    code.parse::<i64>().is_ok_and(|c| c & 0xff == 19)
}

/// SQLSTATE codes that mean the session itself is gone.
fn is_connection_sql_state(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03")
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            // A malformed connection string fails the same way on every attempt
            sqlx::Error::Configuration(msg) => {
                DbError::invalid_input(format!("Invalid connection configuration: {}", msg))
            }
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                if code.as_deref().is_some_and(is_connection_sql_state) {
                    return DbError::connection(
                        db_err.message(),
                        "The server closed the session, reconnect and retry",
                    );
                }
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax, referenced objects and constraints",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => {
                DbError::connection("Timed out acquiring a connection", "Retry the operation")
            }
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::schema(
                format!("Type not found: {}", type_name),
                type_name.to_string(),
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::schema(format!("Column not found: {}", col), col.to_string())
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::AnyDriverError(err) => DbError::connection(
                format!("Driver error: {}", err),
                "Check database driver configuration",
            ),
            sqlx::Error::WorkerCrashed => {
                DbError::connection("Database worker crashed", "Reconnect to the database")
            }
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(err.sql_state(), Some("42601"));
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(!DbError::permission("write", "read-only").is_retryable());
        assert!(!DbError::database("dup", Some("23505".into()), "").is_retryable());
    }

    #[test]
    fn test_validation_classification() {
        assert!(DbError::null_violation("name").is_validation());
        assert!(DbError::length_violation("name", 8, 5).is_validation());
        assert!(DbError::missing_primary_key("t", "update").is_validation());
        assert!(!DbError::permission("set", "not updatable").is_validation());
        assert!(!DbError::unsupported("set sub-field").is_validation());
    }

    #[test]
    fn test_constraint_violation_postgres_and_sqlite() {
        assert!(DbError::database("dup", Some("23505".into()), "").is_constraint_violation());
        assert!(DbError::database("fk", Some("787".into()), "").is_constraint_violation());
        assert!(DbError::database("unique", Some("2067".into()), "").is_constraint_violation());
        assert!(!DbError::database("syntax", Some("42601".into()), "").is_constraint_violation());
        assert!(!DbError::database("none", None, "").is_constraint_violation());
    }

    #[test]
    fn test_length_violation_message_cites_both_lengths() {
        let err = DbError::length_violation("name", 8, 5);
        let msg = err.to_string();
        assert!(msg.contains("[8]"));
        assert!(msg.contains("[5]"));
    }

    #[test]
    fn test_configuration_error_is_not_retried() {
        let err = DbError::from(sqlx::Error::Configuration("unknown sslmode".into()));
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("unknown sslmode"));
    }

    #[test]
    fn test_connection_sql_states() {
        assert!(is_connection_sql_state("08006"));
        assert!(is_connection_sql_state("57P01"));
        assert!(!is_connection_sql_state("23505"));
    }
}
