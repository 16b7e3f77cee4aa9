//! schema-mirror library
//!
//! Reflects a live PostgreSQL or SQLite schema at runtime and builds an
//! entity model from it: one [`Table`](entity::Table) handle per table or
//! view, validated field access that persists every write immediately, and
//! navigation along foreign keys in both directions.
//!
//! ```ignore
//! use schema_mirror::{Database, fields};
//!
//! let db = Database::connect("sqlite:shop.db")?;
//! let customers = db.table("customer")?;
//! let mut ada = customers.create(fields! { "name" => "ada" })?;
//! ada.reverse("orders")?.append_new(fields! { "total" => 12 })?;
//! ```

pub mod config;
pub mod database;
pub mod db;
pub mod entity;
pub mod error;
pub mod macros;
pub mod models;

pub use config::Config;
pub use database::Database;
pub use entity::{EntityInstance, Fields, Model, Table};
pub use error::{DbError, DbResult};
pub use models::{Row, Value};
