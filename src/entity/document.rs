//! Structured document columns.
//!
//! Nested edits are addressed with JSON pointers (`/a/0/b`). Each edit is
//! applied to a copy of the document, which is then written back with one
//! whole-document field write. A failed write leaves the instance unchanged.

use crate::entity::instance::EntityInstance;
use crate::error::{DbError, DbResult};
use crate::models::Value;
use serde_json::Value as Json;

pub struct DocumentMut<'a> {
    instance: &'a mut EntityInstance,
    column: usize,
}

impl<'a> DocumentMut<'a> {
    pub(super) fn new(instance: &'a mut EntityInstance, column: usize) -> Self {
        Self { instance, column }
    }

    fn column_name(&self) -> String {
        self.instance.entity.columns()[self.column].name.clone()
    }

    /// Current document; `Json::Null` when the column is null.
    pub fn get(&self) -> &Json {
        match &self.instance.values[self.column] {
            Value::Json(doc) => doc,
            _ => &Json::Null,
        }
    }

    pub fn pointer(&self, pointer: &str) -> Option<&Json> {
        self.get().pointer(pointer)
    }

    fn write(&mut self, doc: Json) -> DbResult<()> {
        let name = self.column_name();
        self.instance.set(&name, Value::Json(doc))
    }

    /// Set the value at `pointer`. The empty pointer replaces the whole
    /// document; `-` as the last array token appends.
    pub fn set(&mut self, pointer: &str, value: Json) -> DbResult<()> {
        let mut doc = self.get().clone();
        if pointer.is_empty() {
            return self.write(value);
        }
        let (parent, token) = split_pointer(pointer)?;
        let target = container_mut(&mut doc, parent, pointer)?;
        if target.is_null() {
            *target = Json::Object(Default::default());
        }
        match target {
            Json::Object(map) => {
                map.insert(token, value);
            }
            Json::Array(items) => match token.as_str() {
                "-" => items.push(value),
                index => {
                    let i = parse_index(index, pointer)?;
                    match i.cmp(&items.len()) {
                        std::cmp::Ordering::Less => items[i] = value,
                        std::cmp::Ordering::Equal => items.push(value),
                        std::cmp::Ordering::Greater => {
                            return Err(out_of_range(pointer));
                        }
                    }
                }
            },
            _ => return Err(not_a_container(pointer)),
        }
        self.write(doc)
    }

    /// Remove and return the value at `pointer`, or `None` if absent.
    pub fn remove(&mut self, pointer: &str) -> DbResult<Option<Json>> {
        let mut doc = self.get().clone();
        let (parent, token) = split_pointer(pointer)?;
        let removed = match doc.pointer_mut(parent) {
            Some(Json::Object(map)) => map.remove(&token),
            Some(Json::Array(items)) => {
                let i = parse_index(&token, pointer)?;
                (i < items.len()).then(|| items.remove(i))
            }
            _ => None,
        };
        if removed.is_some() {
            self.write(doc)?;
        }
        Ok(removed)
    }

    /// Append to the array at `pointer`.
    pub fn push(&mut self, pointer: &str, value: Json) -> DbResult<()> {
        let mut doc = self.get().clone();
        match container_mut(&mut doc, pointer, pointer)? {
            Json::Array(items) => items.push(value),
            _ => return Err(not_a_container(pointer)),
        }
        self.write(doc)
    }
}

fn not_a_container(pointer: &str) -> DbError {
    DbError::invalid_input(format!("No object or array at '{}'", pointer))
}

fn out_of_range(pointer: &str) -> DbError {
    DbError::invalid_input(format!("Array index out of range at '{}'", pointer))
}

fn parse_index(token: &str, pointer: &str) -> DbResult<usize> {
    token
        .parse()
        .map_err(|_| DbError::invalid_input(format!("Invalid array index at '{}'", pointer)))
}

fn container_mut<'d>(doc: &'d mut Json, path: &str, pointer: &str) -> DbResult<&'d mut Json> {
    doc.pointer_mut(path).ok_or_else(|| not_a_container(pointer))
}

/// Split `/a/b~1c` into the parent pointer `/a` and the unescaped last
/// token `b/c`.
fn split_pointer(pointer: &str) -> DbResult<(&str, String)> {
    if !pointer.starts_with('/') {
        return Err(DbError::invalid_input(format!(
            "Invalid JSON pointer '{}'",
            pointer
        )));
    }
    let split = pointer.rfind('/').unwrap_or(0);
    let token = pointer[split + 1..].replace("~1", "/").replace("~0", "~");
    Ok((&pointer[..split], token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pointer() {
        assert_eq!(split_pointer("/a").unwrap(), ("", "a".to_string()));
        assert_eq!(split_pointer("/a/0").unwrap(), ("/a", "0".to_string()));
        assert_eq!(split_pointer("/x/b~1c~0").unwrap(), ("/x", "b/c~".to_string()));
        assert!(split_pointer("a").is_err());
    }
}
