//! Entity and column descriptors.
//!
//! Descriptors are built once per schema load and never change afterwards.
//! Relationship targets are stored as indexes into the owning model's entity
//! list, resolved when the model is built.

use crate::db::types::DefaultValue;
use crate::error::{DbError, DbResult};
use crate::models::{SemanticType, TableType, Value};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct ForeignKeyDescriptor {
    #[serde(skip)]
    pub referenced_entity: usize,
    pub referenced_table: String,
    pub referenced_column: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Index in the entity's column list and in every selected row
    #[serde(skip)]
    pub index: usize,
    pub ordinal_position: i32,
    /// Catalog type name, used to cast bound parameters
    pub native_type: String,
    #[serde(rename = "type")]
    pub semantic: SemanticType,
    pub nullable: bool,
    pub updatable: bool,
    pub primary_key: bool,
    pub get_value_on_insert: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<ForeignKeyDescriptor>,
}

impl ColumnDescriptor {
    /// Value a new instance starts with.
    pub fn initial_value(&self) -> Value {
        self.default
            .as_ref()
            .and_then(DefaultValue::literal)
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn check_updatable(&self, entity: &str) -> DbResult<()> {
        if self.updatable {
            Ok(())
        } else {
            Err(DbError::permission(
                format!("write {}.{}", entity, self.name),
                format!("column [{}] is not updatable", self.name),
            ))
        }
    }

    /// Check a value against the column's nullability, type and length.
    /// Returns the value as it will be stored: numeric scalars are coerced
    /// and document text is parsed.
    pub fn validate(&self, value: Value) -> DbResult<Value> {
        let value = value.coerce_numeric();
        if value.is_null() {
            return if self.nullable {
                Ok(Value::Null)
            } else {
                Err(DbError::null_violation(&self.name))
            };
        }
        let value = match (&self.semantic, value) {
            (SemanticType::Json, Value::Text(text)) => match serde_json::from_str(&text) {
                Ok(doc) => Value::Json(doc),
                Err(e) => return Err(DbError::syntax(&self.name, text, e.to_string())),
            },
            (_, value) => value,
        };
        if !self.semantic.accepts(&value) {
            return Err(DbError::type_mismatch(
                &self.name,
                self.semantic.to_string(),
                match &value {
                    Value::Composite(c) => format!("composite:{}", c.type_name()),
                    other => other.type_name().to_string(),
                },
            ));
        }
        if let (Some(max), Value::Text(s)) = (self.semantic.max_length(), &value) {
            let actual = s.chars().count();
            if actual > max {
                return Err(DbError::length_violation(&self.name, actual, max));
            }
        }
        Ok(value)
    }
}

/// Synthetic collection of the rows of another entity that reference this
/// one.
#[derive(Debug, Clone, Serialize)]
pub struct ReverseCollectionDescriptor {
    pub name: String,
    #[serde(skip)]
    pub referencing_entity: usize,
    pub referencing_table: String,
    pub referencing_column: String,
    /// Column of the owning entity the reference points at
    pub target_column: String,
    #[serde(skip)]
    pub target_index: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityType {
    pub(crate) name: String,
    pub(crate) kind: TableType,
    pub(crate) columns: Vec<ColumnDescriptor>,
    #[serde(skip)]
    pub(crate) by_name: HashMap<String, usize>,
    pub(crate) primary_key: Vec<String>,
    pub(crate) get_value_on_insert: Vec<String>,
    #[serde(rename = "reverse_collections")]
    pub(crate) reverse: Vec<ReverseCollectionDescriptor>,
}

impl EntityType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TableType {
        self.kind
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.by_name.get(name).map(|&i| &self.columns[i])
    }

    /// Column by name; unknown names are a validation error.
    pub fn require_column(&self, name: &str) -> DbResult<&ColumnDescriptor> {
        self.column(name)
            .ok_or_else(|| DbError::unknown_field(&self.name, name))
    }

    /// Primary-key column names in ordinal order.
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn get_value_on_insert(&self) -> &[String] {
        &self.get_value_on_insert
    }

    pub fn reverse_collections(&self) -> &[ReverseCollectionDescriptor] {
        &self.reverse
    }

    pub fn reverse_collection(&self, name: &str) -> Option<&ReverseCollectionDescriptor> {
        self.reverse.iter().find(|r| r.name == name)
    }

    /// Primary-key descriptors, or an error naming `operation` when the
    /// entity has none.
    pub fn require_primary_key(&self, operation: &str) -> DbResult<Vec<&ColumnDescriptor>> {
        if self.primary_key.is_empty() {
            return Err(DbError::missing_primary_key(&self.name, operation));
        }
        Ok(self
            .primary_key
            .iter()
            .filter_map(|name| self.column(name))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NumericScalar;

    fn column(semantic: SemanticType, nullable: bool) -> ColumnDescriptor {
        ColumnDescriptor {
            name: "c".into(),
            index: 0,
            ordinal_position: 1,
            native_type: "text".into(),
            semantic,
            nullable,
            updatable: true,
            primary_key: false,
            get_value_on_insert: false,
            default: None,
            foreign_key: None,
        }
    }

    #[test]
    fn test_validate_null() {
        let col = column(SemanticType::Text, false);
        assert!(matches!(
            col.validate(Value::Null).unwrap_err(),
            DbError::NullViolation { .. }
        ));
        let col = column(SemanticType::Text, true);
        assert_eq!(col.validate(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_validate_type_mismatch_names_both_types() {
        let col = column(SemanticType::Integer, true);
        let err = col.validate(Value::from("1")).unwrap_err();
        match err {
            DbError::TypeMismatch {
                expected, actual, ..
            } => {
                assert_eq!(expected, "integer");
                assert_eq!(actual, "text");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validate_coerces_numeric_scalars() {
        let col = column(SemanticType::Integer, true);
        assert_eq!(
            col.validate(Value::Numeric(NumericScalar::I16(7))).unwrap(),
            Value::Integer(7)
        );
        let col = column(SemanticType::Double, true);
        assert_eq!(
            col.validate(Value::Numeric(NumericScalar::F32(0.5))).unwrap(),
            Value::Float(0.5)
        );
    }

    #[test]
    fn test_validate_length_counts_characters() {
        let col = column(
            SemanticType::Varchar {
                max_length: Some(5),
            },
            true,
        );
        assert!(col.validate(Value::from("héllo")).is_ok());
        match col.validate(Value::from("toolong!")).unwrap_err() {
            DbError::LengthViolation { actual, max, .. } => {
                assert_eq!((actual, max), (8, 5));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validate_document_text() {
        let col = column(SemanticType::Json, true);
        assert_eq!(
            col.validate(Value::from(r#"{"a": [1]}"#)).unwrap(),
            Value::Json(serde_json::json!({"a": [1]}))
        );
        match col.validate(Value::from("{nope")).unwrap_err() {
            DbError::Syntax { text, .. } => assert_eq!(text, "{nope"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_not_updatable_is_permission_error() {
        let mut col = column(SemanticType::Text, true);
        col.updatable = false;
        assert!(matches!(
            col.check_updatable("v").unwrap_err(),
            DbError::Permission { .. }
        ));
    }
}
