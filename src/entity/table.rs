//! Table-level operations for one entity type.
//!
//! Filters are raw SQL fragments written with the backend's own
//! placeholders (`$1` on PostgreSQL, `?` on SQLite); their parameters are
//! bound in order.

use crate::entity::descriptor::{ColumnDescriptor, EntityType};
use crate::entity::instance::EntityInstance;
use crate::entity::{Context, Fields, statements};
use crate::error::{DbError, DbResult};
use crate::models::Value;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Table {
    ctx: Context,
    entity: Arc<EntityType>,
}

impl Table {
    pub(crate) fn new(ctx: Context, entity: Arc<EntityType>) -> Self {
        Self { ctx, entity }
    }

    pub fn name(&self) -> &str {
        self.entity.name()
    }

    pub fn entity(&self) -> &Arc<EntityType> {
        &self.entity
    }

    /// Construct an instance. The row is inserted immediately unless inserts
    /// are suspended on this thread, in which case it stays detached until
    /// [`EntityInstance::save`].
    pub fn create(&self, fields: Fields) -> DbResult<EntityInstance> {
        EntityInstance::construct(self.ctx.clone(), Arc::clone(&self.entity), fields)
    }

    /// Construct and insert an instance, ignoring suspension.
    pub fn insert(&self, fields: Fields) -> DbResult<EntityInstance> {
        EntityInstance::create(self.ctx.clone(), Arc::clone(&self.entity), fields)
    }

    /// Insert many rows with one statement. Every value is validated first;
    /// nothing is written if any row is invalid.
    pub fn insert_many(&self, columns: &[&str], rows: Vec<Vec<Value>>) -> DbResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let descriptors: Vec<&ColumnDescriptor> = columns
            .iter()
            .map(|name| self.entity.require_column(name))
            .collect::<DbResult<_>>()?;
        let mut validated = Vec::with_capacity(rows.len());
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != descriptors.len() {
                return Err(DbError::invalid_input(format!(
                    "Row {} has {} values for {} columns",
                    i,
                    row.len(),
                    descriptors.len()
                )));
            }
            let row = descriptors
                .iter()
                .zip(row)
                .map(|(c, v)| c.validate(v))
                .collect::<DbResult<Vec<_>>>()?;
            validated.push(row);
        }
        let count = validated.len();
        let statement =
            statements::insert_many(&self.entity, self.ctx.backend(), &descriptors, validated);
        let affected = self.ctx.session().execute(&statement)?;
        debug!(table = %self.name(), rows = count, "Bulk insert");
        Ok(affected)
    }

    /// Rows matching the filter, as live instances.
    pub fn select(&self, filter: Option<&str>, params: &[Value]) -> DbResult<Vec<EntityInstance>> {
        let statement = statements::select(&self.entity, self.ctx.backend(), filter, params);
        self.ctx.fetch_instances(&self.entity, &statement)
    }

    /// First matching row, if any.
    pub fn select_one(
        &self,
        filter: Option<&str>,
        params: &[Value],
    ) -> DbResult<Option<EntityInstance>> {
        let statement = statements::select_first(&self.entity, self.ctx.backend(), filter, params);
        Ok(self.ctx.fetch_instances(&self.entity, &statement)?.into_iter().next())
    }

    pub fn select_count(&self, filter: Option<&str>, params: &[Value]) -> DbResult<i64> {
        let statement = statements::count(&self.entity, filter, params);
        let rows = self.ctx.session().fetch(&statement)?;
        rows.first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_i64)
            .ok_or_else(|| DbError::internal("COUNT(*) returned no value"))
    }

    /// Delete matching rows; returns the number deleted.
    pub fn delete(&self, filter: Option<&str>, params: &[Value]) -> DbResult<u64> {
        let statement = statements::delete(&self.entity, filter, params);
        self.ctx.session().execute(&statement)
    }
}
