//! SQLite driver.
//!
//! Wraps a single `sqlx::SqliteConnection`. Statements use `?` placeholders.
//! SQLite is dynamically typed, so values are decoded by their storage class
//! and converted to the column's semantic type by the type registry.

use crate::db::driver::{Connection, Statement, blocking_runtime};
use crate::error::{DbError, DbResult};
use crate::models::value::{DATE_FORMAT, TIME_FORMAT, TIMESTAMP_FORMAT};
use crate::models::{DatabaseType, Row, Value};
use sqlx::Connection as _;
use sqlx::Row as _;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteRow};
use sqlx::{Column, Executor, Sqlite, SqliteConnection, Transaction, TypeInfo, ValueRef};
use std::str::FromStr;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

pub struct SqliteDriver {
    runtime: Runtime,
    conn: SqliteConnection,
}

impl SqliteDriver {
    pub fn connect(connection_string: &str) -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str(connection_string)
            .map_err(|e| {
                DbError::connection(
                    format!("Invalid SQLite connection string: {}", e),
                    "Check the connection URL format: sqlite:path/to/db.sqlite",
                )
            })?
            .create_if_missing(true)
            .foreign_keys(true);
        let runtime = blocking_runtime()?;
        let conn = runtime
            .block_on(SqliteConnection::connect_with(&options))
            .map_err(|e| {
                DbError::connection(
                    format!("Failed to connect: {}", e),
                    "Check that the database file exists and is readable",
                )
            })?;
        info!(filename = %options.get_filename().display(), "Opened SQLite database");
        Ok(Self { runtime, conn })
    }
}

impl Connection for SqliteDriver {
    fn backend(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    fn fetch(&mut self, statement: &Statement) -> DbResult<Vec<Row>> {
        debug!(sql = %statement.sql, params = statement.params.len(), "Fetching rows");
        let rows = self
            .runtime
            .block_on(fetch_rows(&mut self.conn, statement))?;
        decode_rows(&rows)
    }

    fn execute(&mut self, statement: &Statement) -> DbResult<u64> {
        debug!(sql = %statement.sql, params = statement.params.len(), "Executing statement");
        self.runtime
            .block_on(execute_statement(&mut self.conn, statement))
    }

    fn close(self: Box<Self>) -> DbResult<()> {
        let Self { runtime, conn } = *self;
        runtime.block_on(conn.close()).map_err(DbError::from)
    }
}

async fn fetch_rows(conn: &mut SqliteConnection, statement: &Statement) -> DbResult<Vec<SqliteRow>> {
    let mut tx = conn.begin().await?;
    let result = if statement.params.is_empty() {
        (&mut *tx).fetch_all(statement.sql.as_str()).await
    } else {
        build_query(statement).fetch_all(&mut *tx).await
    };
    finish(tx, result).await
}

async fn execute_statement(conn: &mut SqliteConnection, statement: &Statement) -> DbResult<u64> {
    let mut tx = conn.begin().await?;
    let result = if statement.params.is_empty() {
        (&mut *tx).execute(statement.sql.as_str()).await
    } else {
        build_query(statement).execute(&mut *tx).await
    };
    finish(tx, result.map(|r| r.rows_affected())).await
}

/// Commit on success, roll back on failure.
async fn finish<T>(tx: Transaction<'_, Sqlite>, result: Result<T, sqlx::Error>) -> DbResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Rollback failed");
            }
            Err(e.into())
        }
    }
}

fn build_query(statement: &Statement) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    statement
        .params
        .iter()
        .fold(sqlx::query(&statement.sql), bind_param)
}

fn bind_param<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Integer(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Boolean(v) => query.bind(*v),
        // Temporal and structured values are stored as text
        Value::Date(v) => query.bind(v.format(DATE_FORMAT).to_string()),
        Value::Time(v) => query.bind(v.format(TIME_FORMAT).to_string()),
        Value::Timestamp(v) => query.bind(v.format(TIMESTAMP_FORMAT).to_string()),
        Value::Float(v) => query.bind(*v),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Json(v) => query.bind(v.to_string()),
        Value::Uuid(v) => query.bind(v.to_string()),
        Value::LargeObject(v) => query.bind(i64::from(*v)),
        Value::Composite(v) => query.bind(v.to_wire()),
        Value::Numeric(n) => match n.as_i64() {
            Some(v) if !n.is_float() => query.bind(v),
            _ => query.bind(n.as_f64()),
        },
    }
}

fn decode_rows(rows: &[SqliteRow]) -> DbResult<Vec<Row>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let columns: Arc<[String]> = first
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    rows.iter()
        .map(|row| {
            let values = (0..row.len())
                .map(|i| decode_value(row, i))
                .collect::<DbResult<Vec<_>>>()?;
            Ok(Row::new(Arc::clone(&columns), values))
        })
        .collect()
}

/// Decode by the value's storage class.
fn decode_value(row: &SqliteRow, index: usize) -> DbResult<Value> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_string();
    let value = match storage.as_str() {
        "INTEGER" | "BOOLEAN" => Value::Integer(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" | "NUMERIC" => Value::Float(row.try_get_unchecked::<f64, _>(index)?),
        "BLOB" => Value::Bytes(row.try_get_unchecked::<Vec<u8>, _>(index)?),
        _ => Value::Text(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}
