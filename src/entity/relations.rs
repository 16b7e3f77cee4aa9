//! Relationship accessors.
//!
//! [`ForeignKeyRef`] exposes a foreign-key column's raw value and, on
//! demand, the referenced row. [`ReverseCollection`] is the cached list of
//! rows of another entity that point at an instance.

use crate::entity::descriptor::ReverseCollectionDescriptor;
use crate::entity::instance::{EntityInstance, InstanceState};
use crate::entity::{Context, DocumentMut, Fields, statements};
use crate::error::{DbError, DbResult};
use crate::models::Value;
use std::sync::Arc;
use tracing::debug;

/// Borrowed accessor for one foreign-key column of an instance.
pub struct ForeignKeyRef<'a> {
    instance: &'a mut EntityInstance,
    column: usize,
}

impl<'a> ForeignKeyRef<'a> {
    pub(super) fn new(instance: &'a mut EntityInstance, column: usize) -> Self {
        Self { instance, column }
    }

    fn column_name(&self) -> &str {
        &self.instance.entity.columns()[self.column].name
    }

    /// Raw referenced-key value.
    pub fn value(&self) -> &Value {
        &self.instance.values[self.column]
    }

    /// The referenced row, fetched on first access and cached until the
    /// key changes. `None` when the key is null or matches no row.
    pub fn object(&mut self) -> DbResult<Option<&EntityInstance>> {
        if !self.instance.references.contains_key(&self.column) {
            let loaded = self.load()?;
            self.instance.references.insert(self.column, loaded);
        }
        Ok(self
            .instance
            .references
            .get(&self.column)
            .and_then(Option::as_ref))
    }

    fn load(&self) -> DbResult<Option<EntityInstance>> {
        let value = self.value().clone();
        if value.is_null() {
            return Ok(None);
        }
        let ctx = &self.instance.ctx;
        let column = &self.instance.entity.columns()[self.column];
        let Some(fk) = column.foreign_key.as_ref() else {
            return Ok(None);
        };
        let target = Arc::clone(ctx.model().entity_at(fk.referenced_entity));
        let target_column = target.require_column(&fk.referenced_column)?;
        let statement = statements::select_where(&target, ctx.backend(), &[(target_column, value)]);
        debug!(
            column = %column.name,
            referenced = %fk.referenced_table,
            "Loading referenced row"
        );
        Ok(ctx.fetch_instances(&target, &statement)?.into_iter().next())
    }

    /// Assign a new raw key. Persisted like any field write.
    pub fn set_value(&mut self, value: impl Into<Value>) -> DbResult<()> {
        let name = self.column_name().to_string();
        self.instance.set(&name, value)
    }

    /// Point the key at `target`, storing the referenced column's value.
    pub fn assign(&mut self, target: &EntityInstance) -> DbResult<()> {
        let column = &self.instance.entity.columns()[self.column];
        let Some(fk) = column.foreign_key.as_ref() else {
            return Err(DbError::internal("foreign key accessor on a plain column"));
        };
        if target.entity().name() != fk.referenced_table {
            return Err(DbError::type_mismatch(
                &column.name,
                fk.referenced_table.as_str(),
                target.entity().name(),
            ));
        }
        let value = target.get(&fk.referenced_column)?.clone();
        let name = column.name.clone();
        self.instance.set(&name, value)
    }

    /// The cached object is derived from the key and cannot be set directly.
    pub fn set_object(&mut self, _target: EntityInstance) -> DbResult<()> {
        Err(DbError::permission(
            format!("set {}", self.column_name()),
            "Cannot set the object attribute directly, assign the referenced instance instead",
        ))
    }
}

/// Cached rows of the referencing entity whose foreign key equals the
/// owner's target column.
pub struct ReverseCollection {
    ctx: Context,
    descriptor: ReverseCollectionDescriptor,
    owner_value: Value,
    items: Vec<EntityInstance>,
}

impl ReverseCollection {
    pub(super) fn load(
        ctx: Context,
        descriptor: ReverseCollectionDescriptor,
        owner_value: Value,
    ) -> DbResult<Self> {
        let mut collection = Self {
            ctx,
            descriptor,
            owner_value,
            items: Vec::new(),
        };
        collection.refresh()?;
        Ok(collection)
    }

    pub(super) fn target_index(&self) -> usize {
        self.descriptor.target_index
    }

    pub fn descriptor(&self) -> &ReverseCollectionDescriptor {
        &self.descriptor
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EntityInstance> {
        self.items.iter()
    }

    pub fn get(&self, index: usize) -> Option<&EntityInstance> {
        self.items.get(index)
    }

    /// Write access to one item's fields. The slot itself cannot be
    /// reassigned; see [`ReverseCollection::replace`].
    ///
    /// ```compile_fail
    /// use schema_mirror::entity::{EntityInstance, ReverseCollection};
    ///
    /// fn swap(collection: &mut ReverseCollection, other: EntityInstance) {
    ///     *collection.get_mut(0).unwrap() = other;
    /// }
    /// ```
    pub fn get_mut(&mut self, index: usize) -> Option<CollectionItemMut<'_>> {
        self.items
            .get_mut(index)
            .map(|item| CollectionItemMut { item })
    }

    /// Re-run the query and replace the cached items.
    pub fn refresh(&mut self) -> DbResult<()> {
        if self.owner_value.is_null() {
            self.items.clear();
            return Ok(());
        }
        let referencing = Arc::clone(self.ctx.model().entity_at(self.descriptor.referencing_entity));
        let column = referencing.require_column(&self.descriptor.referencing_column)?;
        let statement = statements::select_where(
            &referencing,
            self.ctx.backend(),
            &[(column, self.owner_value.clone())],
        );
        self.items = self.ctx.fetch_instances(&referencing, &statement)?;
        debug!(
            collection = %self.descriptor.name,
            items = self.items.len(),
            "Loaded reverse collection"
        );
        Ok(())
    }

    /// Slots cannot be replaced in place; append establishes relationships.
    pub fn replace(&mut self, index: usize, _item: EntityInstance) -> DbResult<()> {
        Err(DbError::permission(
            format!("replace {}[{}]", self.descriptor.name, index),
            "Items of a reverse collection cannot be replaced, use append",
        ))
    }

    fn require_owner_key(&self) -> DbResult<Value> {
        if self.owner_value.is_null() {
            return Err(DbError::invalid_input(format!(
                "Cannot append to {}: the owner's [{}] is null",
                self.descriptor.name, self.descriptor.target_column
            )));
        }
        Ok(self.owner_value.clone())
    }

    /// Point `item` at the owner and persist it: live rows are updated,
    /// detached ones are inserted. The item is added to the cached list.
    pub fn append(&mut self, mut item: EntityInstance) -> DbResult<()> {
        let owner = self.require_owner_key()?;
        if item.entity().name() != self.descriptor.referencing_table {
            return Err(DbError::type_mismatch(
                &self.descriptor.name,
                self.descriptor.referencing_table.as_str(),
                item.entity().name(),
            ));
        }
        item.set(&self.descriptor.referencing_column, owner)?;
        if item.state() == InstanceState::Detached {
            item.save()?;
        }
        self.items.push(item);
        Ok(())
    }

    /// Insert a new referencing row with its foreign key preset to the
    /// owner, and add it to the cached list.
    pub fn append_new(&mut self, mut fields: Fields) -> DbResult<&EntityInstance> {
        let owner = self.require_owner_key()?;
        fields.retain(|(name, _)| name != &self.descriptor.referencing_column);
        fields.push((self.descriptor.referencing_column.clone(), owner));
        let referencing = Arc::clone(self.ctx.model().entity_at(self.descriptor.referencing_entity));
        let item = EntityInstance::create(self.ctx.clone(), referencing, fields)?;
        self.items.push(item);
        Ok(&self.items[self.items.len() - 1])
    }
}

/// Field-level handle on a reverse-collection item. Reads go through
/// `Deref`; writes persist like writes on the instance itself.
pub struct CollectionItemMut<'a> {
    item: &'a mut EntityInstance,
}

impl CollectionItemMut<'_> {
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> DbResult<()> {
        self.item.set(name, value)
    }

    pub fn update(&mut self, fields: Fields) -> DbResult<()> {
        self.item.update(fields)
    }

    pub fn delete(&mut self) -> DbResult<()> {
        self.item.delete()
    }

    pub fn refresh(&mut self) -> DbResult<()> {
        self.item.refresh()
    }

    pub fn document_mut(&mut self, name: &str) -> DbResult<DocumentMut<'_>> {
        self.item.document_mut(name)
    }
}

impl std::ops::Deref for CollectionItemMut<'_> {
    type Target = EntityInstance;

    fn deref(&self) -> &EntityInstance {
        &*self.item
    }
}

impl<'a> IntoIterator for &'a ReverseCollection {
    type Item = &'a EntityInstance;
    type IntoIter = std::slice::Iter<'a, EntityInstance>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl std::fmt::Debug for ReverseCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReverseCollection")
            .field("name", &self.descriptor.name)
            .field("owner", &self.owner_value)
            .field("items", &self.items)
            .finish()
    }
}
