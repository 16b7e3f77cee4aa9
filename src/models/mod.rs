//! Data models for schema-mirror.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod schema;
pub mod value;

// Re-export commonly used types
pub use connection::{DatabaseType, masked_connection_string};
pub use schema::{
    CatalogColumn, CompositeAttribute, CompositeTypeDescription, ForeignKeyEdge, ReturnKind,
    ReverseEdge, RoutineDescription, RoutineKind, RoutineParam, SchemaDescription,
    TableDescription, TableType,
};
pub use value::{CompositeValue, NumericScalar, Row, SemanticType, Value};
