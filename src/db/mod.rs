//! Database access layer.
//!
//! This module provides:
//! - The blocking driver seam and the bundled PostgreSQL and SQLite drivers
//! - Session management with reconnect and retry
//! - Schema reflection
//! - The native-to-semantic type registry
//! - SQL building helpers

pub mod driver;
pub mod postgres;
pub mod schema;
pub mod session;
pub mod sql;
pub mod sqlite;
pub mod types;

pub use driver::{Connection, ConnectionFactory, Statement, open, url_factory};
pub use schema::SchemaReflector;
pub use session::{Hook, Session};
pub use types::{DefaultValue, TypeRegistry};
