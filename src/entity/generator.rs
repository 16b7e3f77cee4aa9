//! Entity model generation.
//!
//! Turns a reflected [`SchemaDescription`] into a [`Model`]: one
//! [`EntityType`] per table or view, with resolved semantic types, parsed
//! defaults, forward references and reverse collections.
//!
//! The build runs in two passes. The first assigns every table an index, the
//! second builds descriptors, so relationships resolve regardless of the
//! order tables were reflected in.

use crate::db::types::{DefaultValue, TypeRegistry};
use crate::entity::descriptor::{
    ColumnDescriptor, EntityType, ForeignKeyDescriptor, ReverseCollectionDescriptor,
};
use crate::error::DbResult;
use crate::models::{
    DatabaseType, RoutineDescription, SchemaDescription, SemanticType, TableDescription,
};
use serde::ser::SerializeStruct;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Every entity type of one schema load.
#[derive(Debug)]
pub struct Model {
    backend: DatabaseType,
    schema: String,
    entities: Vec<Arc<EntityType>>,
    by_name: HashMap<String, usize>,
    registry: Arc<TypeRegistry>,
    routines: Vec<RoutineDescription>,
}

impl Model {
    pub fn generate(description: &SchemaDescription) -> DbResult<Self> {
        let mut registry = TypeRegistry::builtin();
        registry.register_composites(&description.composites)?;

        let by_name: HashMap<String, usize> = description
            .tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();

        let entities = description
            .tables
            .iter()
            .map(|table| build_entity(table, description.backend, &registry, &by_name))
            .collect::<DbResult<Vec<_>>>()?
            .into_iter()
            .map(Arc::new)
            .collect();

        info!(
            entities = by_name.len(),
            composites = description.composites.len(),
            routines = description.routines.len(),
            "Generated entity model"
        );
        Ok(Self {
            backend: description.backend,
            schema: description.schema.clone(),
            entities,
            by_name,
            registry: Arc::new(registry),
            routines: description.routines.clone(),
        })
    }

    pub fn backend(&self) -> DatabaseType {
        self.backend
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn entity(&self, name: &str) -> Option<&Arc<EntityType>> {
        self.by_name.get(name).map(|&i| &self.entities[i])
    }

    pub(crate) fn entity_at(&self, index: usize) -> &Arc<EntityType> {
        &self.entities[index]
    }

    /// Entity types in reflection order.
    pub fn entities(&self) -> &[Arc<EntityType>] {
        &self.entities
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn routines(&self) -> &[RoutineDescription] {
        &self.routines
    }

    pub fn routine(&self, name: &str) -> Option<&RoutineDescription> {
        self.routines.iter().find(|r| r.name == name)
    }
}

impl serde::Serialize for Model {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let tables: Vec<&EntityType> = self.entities.iter().map(Arc::as_ref).collect();
        let mut s = serializer.serialize_struct("Model", 5)?;
        s.serialize_field("backend", &self.backend)?;
        s.serialize_field("schema", &self.schema)?;
        s.serialize_field("tables", &tables)?;
        s.serialize_field("composites", &self.registry.composites())?;
        s.serialize_field("routines", &self.routines)?;
        s.end()
    }
}

fn build_entity(
    table: &TableDescription,
    backend: DatabaseType,
    registry: &TypeRegistry,
    entity_index: &HashMap<String, usize>,
) -> DbResult<EntityType> {
    let primary_key: Vec<String> = table.primary_key().into_iter().map(String::from).collect();
    // SQLite fills a lone INTEGER PRIMARY KEY from the rowid
    let rowid_alias = backend == DatabaseType::SQLite
        && primary_key.len() == 1
        && table
            .columns
            .iter()
            .any(|c| c.is_primary_key && c.data_type.eq_ignore_ascii_case("integer"));

    let mut columns = Vec::with_capacity(table.columns.len());
    for (index, col) in table.columns.iter().enumerate() {
        let semantic = registry.resolve_column(&table.name, col)?;
        let default = registry.parse_default(col, &semantic);
        let get_value_on_insert = matches!(default, Some(DefaultValue::Server))
            || (rowid_alias && col.is_primary_key);

        let foreign_key = table
            .foreign_keys
            .iter()
            .find(|fk| fk.column == col.name)
            .and_then(|fk| match entity_index.get(&fk.referenced_table) {
                Some(&referenced_entity) => Some(ForeignKeyDescriptor {
                    referenced_entity,
                    referenced_table: fk.referenced_table.clone(),
                    referenced_column: fk.referenced_column.clone(),
                }),
                None => {
                    warn!(
                        table = %table.name,
                        column = %col.name,
                        referenced = %fk.referenced_table,
                        "Foreign key target is outside the reflected schema"
                    );
                    None
                }
            });

        columns.push(ColumnDescriptor {
            name: col.name.clone(),
            index,
            ordinal_position: col.ordinal_position,
            native_type: native_type(col.udt_name.as_str(), &semantic),
            semantic,
            nullable: col.nullable,
            updatable: col.updatable,
            primary_key: col.is_primary_key,
            get_value_on_insert,
            default,
            foreign_key,
        });
    }
    let by_name: HashMap<String, usize> = columns
        .iter()
        .map(|c| (c.name.clone(), c.index))
        .collect();

    let mut reverse: Vec<ReverseCollectionDescriptor> = Vec::new();
    for edge in &table.referenced_by {
        let name = format!("{}s", edge.referencing_table);
        if by_name.contains_key(&name) {
            debug!(
                table = %table.name,
                collection = %name,
                "Column shadows reverse collection"
            );
            continue;
        }
        if reverse.iter().any(|r| r.name == name) {
            warn!(
                table = %table.name,
                collection = %name,
                column = %edge.referencing_column,
                "Duplicate reverse collection name, keeping the first reference"
            );
            continue;
        }
        let (Some(&referencing_entity), Some(&target_index)) = (
            entity_index.get(&edge.referencing_table),
            by_name.get(&edge.target_column),
        ) else {
            continue;
        };
        reverse.push(ReverseCollectionDescriptor {
            name,
            referencing_entity,
            referencing_table: edge.referencing_table.clone(),
            referencing_column: edge.referencing_column.clone(),
            target_column: edge.target_column.clone(),
            target_index,
        });
    }

    let get_value_on_insert = columns
        .iter()
        .filter(|c| c.get_value_on_insert)
        .map(|c| c.name.clone())
        .collect();

    debug!(
        table = %table.name,
        columns = columns.len(),
        reverse = reverse.len(),
        "Built entity type"
    );
    Ok(EntityType {
        name: table.name.clone(),
        kind: table.table_type,
        columns,
        by_name,
        primary_key,
        get_value_on_insert,
        reverse,
    })
}

/// Type name bound parameters are cast to.
fn native_type(udt_name: &str, semantic: &SemanticType) -> String {
    match semantic {
        SemanticType::Composite(name) => name.clone(),
        _ => udt_name.to_string(),
    }
}
