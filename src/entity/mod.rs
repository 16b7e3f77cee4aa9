//! Generated entity layer.
//!
//! One generic [`EntityInstance`] implementation serves every table; its
//! behavior is driven by the [`EntityType`] descriptor built for that table
//! at schema load. Persistence goes through the shared [`Session`] carried
//! in a [`Context`].

pub mod composite;
pub mod descriptor;
mod document;
pub mod generator;
mod instance;
mod relations;
mod routine;
mod statements;
pub mod suspension;
mod table;

pub use composite::CompositeType;
pub use descriptor::{
    ColumnDescriptor, EntityType, ForeignKeyDescriptor, ReverseCollectionDescriptor,
};
pub use document::DocumentMut;
pub use generator::Model;
pub use instance::{EntityInstance, InstanceState};
pub use relations::{CollectionItemMut, ForeignKeyRef, ReverseCollection};
pub use routine::{Routine, RoutineResult};
pub use suspension::{InsertSuspension, inserts_suspended, suspend_inserts};
pub use table::Table;

use crate::db::driver::Statement;
use crate::db::session::Session;
use crate::error::DbResult;
use crate::models::{DatabaseType, Value};
use std::sync::Arc;

/// Field name and value pairs, in the order they were given.
pub type Fields = Vec<(String, Value)>;

/// Session plus the model snapshot entities were built from.
#[derive(Clone)]
pub struct Context {
    session: Arc<Session>,
    model: Arc<Model>,
}

impl Context {
    pub fn new(session: Arc<Session>, model: Arc<Model>) -> Self {
        Self { session, model }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn backend(&self) -> DatabaseType {
        self.session.backend()
    }

    /// Run a select over `entity` and materialize every row.
    pub(crate) fn fetch_instances(
        &self,
        entity: &Arc<EntityType>,
        statement: &Statement,
    ) -> DbResult<Vec<EntityInstance>> {
        self.session
            .fetch(statement)?
            .into_iter()
            .map(|row| EntityInstance::materialize(self.clone(), Arc::clone(entity), row))
            .collect()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("backend", &self.session.backend())
            .field("schema", &self.model.schema())
            .finish()
    }
}
