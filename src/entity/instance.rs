//! Entity instances.
//!
//! An instance is one row bound to its [`EntityType`]. Field writes are
//! validated and then persisted immediately with a single-column UPDATE
//! keyed by the primary key; the in-memory value changes only after the
//! statement succeeds.

use crate::entity::descriptor::{ColumnDescriptor, EntityType};
use crate::entity::document::DocumentMut;
use crate::entity::relations::{ForeignKeyRef, ReverseCollection};
use crate::entity::statements;
use crate::entity::suspension::{inserts_suspended, suspend_inserts};
use crate::entity::{Context, Fields};
use crate::error::{DbError, DbResult};
use crate::models::{Row, SemanticType, Value};
use serde::ser::SerializeMap;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Built in memory, no row yet
    Detached,
    /// Backed by a row
    Live,
    /// Row deleted; further writes are rejected
    Deleted,
}

pub struct EntityInstance {
    pub(super) ctx: Context,
    pub(super) entity: Arc<EntityType>,
    pub(super) values: Vec<Value>,
    /// Columns given a value while detached; these make up the INSERT
    assigned: Vec<bool>,
    state: InstanceState,
    /// Referenced rows by foreign-key column index, loaded on first access
    pub(super) references: HashMap<usize, Option<EntityInstance>>,
    collections: HashMap<String, ReverseCollection>,
}

impl EntityInstance {
    fn detached(ctx: Context, entity: Arc<EntityType>) -> Self {
        let values = entity
            .columns()
            .iter()
            .map(ColumnDescriptor::initial_value)
            .collect();
        let assigned = vec![false; entity.columns().len()];
        Self {
            ctx,
            entity,
            values,
            assigned,
            state: InstanceState::Detached,
            references: HashMap::new(),
            collections: HashMap::new(),
        }
    }

    /// Build an instance from field values, seeded with column defaults.
    /// The row is inserted unless inserts are suspended on this thread.
    pub(crate) fn construct(ctx: Context, entity: Arc<EntityType>, fields: Fields) -> DbResult<Self> {
        let mut instance = Self::detached(ctx, entity);
        instance.apply_fields(fields)?;
        if !inserts_suspended() {
            instance.insert_row()?;
        }
        Ok(instance)
    }

    /// Build an instance and insert its row regardless of suspension.
    pub(crate) fn create(ctx: Context, entity: Arc<EntityType>, fields: Fields) -> DbResult<Self> {
        let mut instance = Self::detached(ctx, entity);
        instance.apply_fields(fields)?;
        instance.insert_row()?;
        Ok(instance)
    }

    /// Build a live instance from a selected row.
    pub(crate) fn materialize(ctx: Context, entity: Arc<EntityType>, row: Row) -> DbResult<Self> {
        let values = normalize_row(&ctx, &entity, row)?;
        let _suspended = suspend_inserts();
        let mut instance = Self::construct(ctx, entity, Fields::new())?;
        instance.values = values;
        instance.state = InstanceState::Live;
        Ok(instance)
    }

    /// Validate every field before touching any of them.
    fn apply_fields(&mut self, fields: Fields) -> DbResult<()> {
        let entity = Arc::clone(&self.entity);
        let mut validated = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            let column = entity.require_column(&name)?;
            validated.push((column.index, column.validate(value)?));
        }
        for (index, value) in validated {
            self.values[index] = value;
            self.assigned[index] = true;
        }
        Ok(())
    }

    fn insert_row(&mut self) -> DbResult<()> {
        let entity = Arc::clone(&self.entity);
        let supplied: Vec<(&ColumnDescriptor, Value)> = entity
            .columns()
            .iter()
            .filter(|c| self.assigned[c.index])
            .map(|c| (c, self.values[c.index].clone()))
            .collect();
        let statement = statements::insert(&entity, self.ctx.backend(), &supplied);
        let rows = self.ctx.session().fetch(&statement)?;
        if let Some(row) = rows.into_iter().next() {
            let registry = self.ctx.model().registry();
            for (name, value) in row.columns().iter().zip(row.values()) {
                if let Some(column) = entity.column(name) {
                    self.values[column.index] = registry.from_wire(&column.semantic, value.clone())?;
                }
            }
        }
        self.assigned.iter_mut().for_each(|a| *a = false);
        self.state = InstanceState::Live;
        debug!(entity = %entity.name(), columns = supplied.len(), "Inserted row");
        Ok(())
    }

    pub fn entity(&self) -> &Arc<EntityType> {
        &self.entity
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state == InstanceState::Live
    }

    /// Current values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Current value of a field.
    pub fn get(&self, name: &str) -> DbResult<&Value> {
        let column = self.entity.require_column(name)?;
        Ok(&self.values[column.index])
    }

    fn ensure_not_deleted(&self, operation: &str) -> DbResult<()> {
        if self.state == InstanceState::Deleted {
            return Err(DbError::invalid_input(format!(
                "Cannot {} a deleted {} row",
                operation,
                self.entity.name()
            )));
        }
        Ok(())
    }

    /// Primary-key columns with their current values.
    fn key<'e>(
        &self,
        entity: &'e EntityType,
        operation: &str,
    ) -> DbResult<Vec<(&'e ColumnDescriptor, Value)>> {
        Ok(entity
            .require_primary_key(operation)?
            .into_iter()
            .map(|c| (c, self.values[c.index].clone()))
            .collect())
    }

    /// Store a value locally and drop caches that depend on it.
    fn assign(&mut self, index: usize, value: Value) {
        self.values[index] = value;
        if self.state == InstanceState::Detached {
            self.assigned[index] = true;
        }
        self.references.remove(&index);
        self.collections.retain(|_, c| c.target_index() != index);
    }

    /// Validate and persist one field, then update it in memory. Detached
    /// instances only change locally.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> DbResult<()> {
        self.ensure_not_deleted("update")?;
        let entity = Arc::clone(&self.entity);
        let column = entity.require_column(name)?;
        column.check_updatable(entity.name())?;
        let value = column.validate(value.into())?;
        if self.state == InstanceState::Live {
            let key = self.key(&entity, "update")?;
            let statement =
                statements::update(&entity, self.ctx.backend(), &[(column, value.clone())], &key);
            self.ctx.session().execute(&statement)?;
        }
        self.assign(column.index, value);
        Ok(())
    }

    /// Persist several fields in one UPDATE, then apply them locally.
    pub fn update(&mut self, fields: Fields) -> DbResult<()> {
        self.ensure_not_deleted("update")?;
        let entity = Arc::clone(&self.entity);
        let key = self.key(&entity, "update")?;
        let mut set = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            let column = entity.require_column(&name)?;
            column.check_updatable(entity.name())?;
            set.push((column, column.validate(value)?));
        }
        if set.is_empty() {
            return Ok(());
        }
        if self.state == InstanceState::Live {
            let statement = statements::update(&entity, self.ctx.backend(), &set, &key);
            self.ctx.session().execute(&statement)?;
        }
        for (column, value) in set {
            self.assign(column.index, value);
        }
        Ok(())
    }

    /// Delete the row by primary key.
    pub fn delete(&mut self) -> DbResult<()> {
        self.ensure_not_deleted("delete")?;
        let entity = Arc::clone(&self.entity);
        let key = self.key(&entity, "delete")?;
        if self.state == InstanceState::Live {
            let statement = statements::delete_where(&entity, self.ctx.backend(), &key);
            self.ctx.session().execute(&statement)?;
        }
        self.state = InstanceState::Deleted;
        Ok(())
    }

    /// Re-read the row by primary key, discarding cached relationships.
    pub fn refresh(&mut self) -> DbResult<()> {
        self.ensure_not_deleted("refresh")?;
        if self.state != InstanceState::Live {
            return Err(DbError::invalid_input(format!(
                "Cannot refresh a {} row that was never inserted",
                self.entity.name()
            )));
        }
        let entity = Arc::clone(&self.entity);
        let key = self.key(&entity, "refresh")?;
        let statement = statements::select_where(&entity, self.ctx.backend(), &key);
        let row = self
            .ctx
            .session()
            .fetch(&statement)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                DbError::invalid_input(format!("The {} row no longer exists", entity.name()))
            })?;
        self.values = normalize_row(&self.ctx, &entity, row)?;
        self.references.clear();
        self.collections.clear();
        Ok(())
    }

    /// Insert a detached instance. Live instances are already saved.
    pub fn save(&mut self) -> DbResult<()> {
        self.ensure_not_deleted("save")?;
        match self.state {
            InstanceState::Detached => self.insert_row(),
            _ => Ok(()),
        }
    }

    /// Accessor for a foreign-key column.
    pub fn foreign_key(&mut self, name: &str) -> DbResult<ForeignKeyRef<'_>> {
        let column = self.entity.require_column(name)?;
        if column.foreign_key.is_none() {
            return Err(DbError::invalid_input(format!(
                "[{}] of {} is not a foreign key",
                name,
                self.entity.name()
            )));
        }
        let index = column.index;
        Ok(ForeignKeyRef::new(self, index))
    }

    /// Rows of another entity referencing this one, loaded on first access
    /// and cached until refreshed or the referenced column changes.
    pub fn reverse(&mut self, name: &str) -> DbResult<&mut ReverseCollection> {
        let descriptor = self
            .entity
            .reverse_collection(name)
            .ok_or_else(|| DbError::unknown_field(self.entity.name(), name))?;
        match self.collections.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let owner_value = self.values[descriptor.target_index].clone();
                let collection =
                    ReverseCollection::load(self.ctx.clone(), descriptor.clone(), owner_value)?;
                Ok(entry.insert(collection))
            }
        }
    }

    /// Mutable view of a document column. Every change is written back as
    /// a whole-document update.
    pub fn document_mut(&mut self, name: &str) -> DbResult<DocumentMut<'_>> {
        let column = self.entity.require_column(name)?;
        if column.semantic != SemanticType::Json {
            return Err(DbError::type_mismatch(
                name,
                SemanticType::Json.to_string(),
                column.semantic.to_string(),
            ));
        }
        let index = column.index;
        Ok(DocumentMut::new(self, index))
    }
}

/// Convert a selected row, in column order, to the entity's semantic types.
fn normalize_row(ctx: &Context, entity: &EntityType, row: Row) -> DbResult<Vec<Value>> {
    if row.len() != entity.columns().len() {
        return Err(DbError::internal(format!(
            "Expected {} columns for {}, got {}",
            entity.columns().len(),
            entity.name(),
            row.len()
        )));
    }
    let registry = ctx.model().registry();
    entity
        .columns()
        .iter()
        .zip(row.into_values())
        .map(|(column, value)| registry.from_wire(&column.semantic, value))
        .collect()
}

impl serde::Serialize for EntityInstance {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.entity.columns().iter().zip(&self.values) {
            map.serialize_entry(&column.name, value)?;
        }
        map.end()
    }
}

impl std::fmt::Debug for EntityInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct(self.entity.name());
        for (column, value) in self.entity.columns().iter().zip(&self.values) {
            s.field(&column.name, value);
        }
        s.field("state", &self.state).finish()
    }
}
