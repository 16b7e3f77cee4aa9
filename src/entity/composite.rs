//! Custom composite types.
//!
//! A composite type is discovered from the catalog and described by its
//! ordered, typed attributes. Values are [`CompositeValue`]s, which are
//! read-only from the outside; a column holding a composite changes only by
//! assigning a whole new value.

use crate::db::types::TypeRegistry;
use crate::error::{DbError, DbResult};
use crate::models::{CompositeValue, SemanticType, Value};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeAttributeType {
    pub name: String,
    #[serde(rename = "type")]
    pub semantic: SemanticType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeType {
    name: String,
    attributes: Vec<CompositeAttributeType>,
}

impl CompositeType {
    pub fn new(name: &str, attributes: Vec<(String, SemanticType)>) -> Self {
        Self {
            name: name.to_string(),
            attributes: attributes
                .into_iter()
                .map(|(name, semantic)| CompositeAttributeType { name, semantic })
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[CompositeAttributeType] {
        &self.attributes
    }

    fn attribute_path(&self, attribute: &str) -> String {
        format!("{}.{}", self.name, attribute)
    }

    /// Build a value from attribute values in declaration order, checking
    /// each against its attribute type.
    pub fn build(&self, values: Vec<Value>) -> DbResult<CompositeValue> {
        if values.len() != self.attributes.len() {
            return Err(DbError::invalid_input(format!(
                "Composite '{}' has {} attributes, got {} values",
                self.name,
                self.attributes.len(),
                values.len()
            )));
        }
        let mut fields = Vec::with_capacity(values.len());
        for (attr, value) in self.attributes.iter().zip(values) {
            let value = value.coerce_numeric();
            if !value.is_null() && !attr.semantic.accepts(&value) {
                return Err(DbError::type_mismatch(
                    self.attribute_path(&attr.name),
                    attr.semantic.to_string(),
                    value.type_name(),
                ));
            }
            if let (Some(max), Value::Text(s)) = (attr.semantic.max_length(), &value) {
                let actual = s.chars().count();
                if actual > max {
                    return Err(DbError::length_violation(
                        self.attribute_path(&attr.name),
                        actual,
                        max,
                    ));
                }
            }
            fields.push((attr.name.clone(), value));
        }
        Ok(CompositeValue::new(&self.name, fields))
    }

    /// Decode the parenthesized row literal, e.g. `(1,"a, b",)`.
    pub fn parse_wire(&self, text: &str, registry: &TypeRegistry) -> DbResult<CompositeValue> {
        let items = split_row_literal(text).ok_or_else(|| {
            DbError::invalid_input(format!(
                "Malformed value for composite '{}': {}",
                self.name, text
            ))
        })?;
        if items.len() != self.attributes.len() {
            return Err(DbError::invalid_input(format!(
                "Composite '{}' has {} attributes, got {} in {}",
                self.name,
                self.attributes.len(),
                items.len(),
                text
            )));
        }
        let values = self
            .attributes
            .iter()
            .zip(items)
            .map(|(attr, item)| match item {
                None => Ok(Value::Null),
                Some(s) => registry.parse_text(&attr.semantic, &s),
            })
            .collect::<DbResult<Vec<_>>>()?;
        self.build(values)
    }

    /// Convert a structured document into a value. Objects are matched by
    /// attribute name (missing attributes are null), arrays by position.
    pub fn from_json(
        &self,
        json: &serde_json::Value,
        registry: &TypeRegistry,
    ) -> DbResult<CompositeValue> {
        let items: Vec<Option<&serde_json::Value>> = match json {
            serde_json::Value::Object(map) => {
                if let Some(unknown) = map
                    .keys()
                    .find(|k| !self.attributes.iter().any(|a| &a.name == *k))
                {
                    return Err(DbError::unknown_field(&self.name, unknown.as_str()));
                }
                self.attributes.iter().map(|a| map.get(&a.name)).collect()
            }
            serde_json::Value::Array(items) => items.iter().map(Some).collect(),
            other => {
                return Err(DbError::type_mismatch(
                    &self.name,
                    "object or array",
                    json_kind(other),
                ));
            }
        };
        if items.len() != self.attributes.len() {
            return Err(DbError::invalid_input(format!(
                "Composite '{}' has {} attributes, got {}",
                self.name,
                self.attributes.len(),
                items.len()
            )));
        }
        let values = self
            .attributes
            .iter()
            .zip(items)
            .map(|(attr, item)| {
                let path = self.attribute_path(&attr.name);
                match item {
                    None | Some(serde_json::Value::Null) => Ok(Value::Null),
                    Some(v) => json_to_value(&path, &attr.semantic, v, registry),
                }
            })
            .collect::<DbResult<Vec<_>>>()?;
        self.build(values)
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn json_to_value(
    path: &str,
    semantic: &SemanticType,
    json: &serde_json::Value,
    registry: &TypeRegistry,
) -> DbResult<Value> {
    use serde_json::Value as J;

    let mismatch = || DbError::type_mismatch(path, semantic.to_string(), json_kind(json));
    match (semantic, json) {
        (SemanticType::Json, v) => Ok(Value::Json(v.clone())),
        (SemanticType::Composite(name), v) => registry.composite_from_json(name, v),
        (SemanticType::Text | SemanticType::Varchar { .. }, J::String(s)) => {
            Ok(Value::Text(s.clone()))
        }
        (_, J::String(s)) => registry.parse_text(semantic, s),
        (SemanticType::Integer, J::Number(n)) => n.as_i64().map(Value::Integer).ok_or_else(mismatch),
        (SemanticType::LargeObject, J::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Value::LargeObject)
            .ok_or_else(mismatch),
        (SemanticType::Real | SemanticType::Double, J::Number(n)) => {
            n.as_f64().map(Value::Float).ok_or_else(mismatch)
        }
        (SemanticType::Boolean, J::Bool(b)) => Ok(Value::Boolean(*b)),
        _ => Err(mismatch()),
    }
}

/// Split a row literal into its items. `None` items are SQL nulls (an empty
/// unquoted item); a quoted empty item is the empty string.
fn split_row_literal(text: &str) -> Option<Vec<Option<String>>> {
    let inner = text.trim().strip_prefix('(')?.strip_suffix(')')?;
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quoted_item = false;
    let mut in_quotes = false;
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => {
                in_quotes = true;
                quoted_item = true;
            }
            '\\' => current.push(chars.next()?),
            ',' if !in_quotes => {
                items.push(finish_item(&mut current, &mut quoted_item));
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        return None;
    }
    items.push(finish_item(&mut current, &mut quoted_item));
    Some(items)
}

fn finish_item(current: &mut String, quoted: &mut bool) -> Option<String> {
    let item = std::mem::take(current);
    let was_quoted = std::mem::replace(quoted, false);
    if item.is_empty() && !was_quoted {
        None
    } else {
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CompositeAttribute, CompositeTypeDescription};
    use serde_json::json;

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::builtin();
        let attr = |name: &str, data_type: &str, udt: &str, max_length| CompositeAttribute {
            name: name.into(),
            data_type: data_type.into(),
            udt_name: udt.into(),
            max_length,
        };
        registry
            .register_composites(&[CompositeTypeDescription {
                name: "address".into(),
                attributes: vec![
                    attr("street", "text", "text", None),
                    attr("zip", "character varying", "varchar", Some(5)),
                    attr("floor", "integer", "int4", None),
                ],
            }])
            .unwrap();
        registry
    }

    #[test]
    fn test_split_row_literal() {
        assert_eq!(
            split_row_literal(r#"(1,"a, b",)"#).unwrap(),
            vec![Some("1".into()), Some("a, b".into()), None]
        );
        assert_eq!(
            split_row_literal(r#"("say ""hi""","",x\,y)"#).unwrap(),
            vec![Some("say \"hi\"".into()), Some(String::new()), Some("x,y".into())]
        );
        assert!(split_row_literal("1,2").is_none());
        assert!(split_row_literal("(\"open)").is_none());
    }

    #[test]
    fn test_parse_wire() {
        let registry = registry();
        let address = registry.composite("address").unwrap();
        let value = address
            .parse_wire(r#"("1 Main St",12345,3)"#, &registry)
            .unwrap();
        assert_eq!(value.get("street"), Some(&Value::from("1 Main St")));
        assert_eq!(value.get("zip"), Some(&Value::from("12345")));
        assert_eq!(value.get("floor"), Some(&Value::Integer(3)));

        let value = address.parse_wire("(,,)", &registry).unwrap();
        assert_eq!(value.get("floor"), Some(&Value::Null));
    }

    #[test]
    fn test_wire_round_trip() {
        let registry = registry();
        let address = registry.composite("address").unwrap();
        let value = address
            .build(vec![Value::from("a \"quoted\", street"), Value::Null, 2.into()])
            .unwrap();
        let parsed = address.parse_wire(&value.to_wire(), &registry).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn test_from_json_object_and_array() {
        let registry = registry();
        let address = registry.composite("address").unwrap();
        let from_object = address
            .from_json(&json!({"street": "Elm", "floor": 2}), &registry)
            .unwrap();
        assert_eq!(from_object.get("zip"), Some(&Value::Null));
        assert_eq!(from_object.get("floor"), Some(&Value::Integer(2)));

        let from_array = address
            .from_json(&json!(["Elm", null, 2]), &registry)
            .unwrap();
        assert_eq!(from_array, from_object);
    }

    #[test]
    fn test_from_json_rejects_bad_input() {
        let registry = registry();
        let address = registry.composite("address").unwrap();
        let err = address
            .from_json(&json!({"street": "Elm", "planet": "Mars"}), &registry)
            .unwrap_err();
        assert!(matches!(err, DbError::UnknownField { .. }));

        let err = address
            .from_json(&json!({"zip": "1234567"}), &registry)
            .unwrap_err();
        assert!(matches!(err, DbError::LengthViolation { .. }));

        let err = address.from_json(&json!({"floor": "x"}), &registry).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));

        let err = address.from_json(&json!(42), &registry).unwrap_err();
        assert!(matches!(err, DbError::TypeMismatch { .. }));
    }

    #[test]
    fn test_sub_field_writes_are_unsupported() {
        let registry = registry();
        let address = registry.composite("address").unwrap();
        let mut value = address.from_json(&json!(["Elm", null, 1]), &registry).unwrap();
        let err = value.set("street", Value::from("Oak")).unwrap_err();
        assert!(matches!(err, DbError::Unsupported { .. }));
        assert_eq!(value.get("street"), Some(&Value::from("Elm")));
    }
}
