//! Connected database handle.
//!
//! A [`Database`] owns the shared [`Session`] and the current [`Model`]. The
//! model is rebuilt from the catalog on every reconnect and on explicit
//! [`Database::reload`]; a failed rebuild leaves the previous model in place.

use crate::config::{DatabaseConfig, SessionOptions};
use crate::db::driver::{ConnectionFactory, Statement, url_factory};
use crate::db::schema::SchemaReflector;
use crate::db::session::Session;
use crate::entity::{Context, Model, Routine, Table};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, Row, Value, masked_connection_string};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::info;

#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    session: Arc<Session>,
    schema: String,
    model: RwLock<Arc<Model>>,
}

impl DatabaseInner {
    fn load_model(&self) -> DbResult<Arc<Model>> {
        load_model(&self.session, &self.schema)
    }

    /// Swap in a freshly reflected model, or keep the old one on failure.
    fn reload(&self) -> DbResult<()> {
        let model = self.load_model()?;
        *self.model.write() = model;
        Ok(())
    }
}

fn load_model(session: &Session, schema: &str) -> DbResult<Arc<Model>> {
    let description = SchemaReflector::reflect(session, schema)?;
    Ok(Arc::new(Model::generate(&description)?))
}

impl Database {
    /// Connect to the database named by a URL and load its model.
    ///
    /// Session options may be given as query parameters, see
    /// [`DatabaseConfig::parse`].
    pub fn connect(url: &str) -> DbResult<Self> {
        let config = DatabaseConfig::parse(url).map_err(DbError::invalid_input)?;
        info!(
            backend = %config.db_type,
            url = %masked_connection_string(&config.connection_string),
            "Connecting"
        );
        Self::connect_with(url_factory(config.connection_string), config.options)
    }

    /// Connect through a caller-supplied factory.
    pub fn connect_with(factory: ConnectionFactory, options: SessionOptions) -> DbResult<Self> {
        let session = Arc::new(Session::connect(factory, options)?);
        let schema = session.options().schema_or_default(session.backend());
        let model = load_model(&session, &schema)?;
        let inner = Arc::new(DatabaseInner {
            session,
            schema,
            model: RwLock::new(model),
        });

        let weak: Weak<DatabaseInner> = Arc::downgrade(&inner);
        inner.session.set_on_reconnect(move || match weak.upgrade() {
            Some(inner) => inner.reload(),
            None => Ok(()),
        });
        Ok(Self { inner })
    }

    pub fn backend(&self) -> DatabaseType {
        self.inner.session.backend()
    }

    /// Catalog schema the model is reflected from.
    pub fn schema(&self) -> &str {
        &self.inner.schema
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    /// Snapshot of the current model.
    pub fn model(&self) -> Arc<Model> {
        self.inner.model.read().clone()
    }

    /// Session plus the current model, for building handles.
    pub fn context(&self) -> Context {
        Context::new(Arc::clone(&self.inner.session), self.model())
    }

    /// Handle for a table or view.
    pub fn table(&self, name: &str) -> DbResult<Table> {
        let ctx = self.context();
        let entity = ctx
            .model()
            .entity(name)
            .cloned()
            .ok_or_else(|| DbError::schema(format!("No table or view named '{}'", name), name))?;
        Ok(Table::new(ctx, entity))
    }

    /// Handles for every table and view, in catalog order.
    pub fn tables(&self) -> Vec<Table> {
        let ctx = self.context();
        ctx.model()
            .entities()
            .iter()
            .map(|entity| Table::new(ctx.clone(), Arc::clone(entity)))
            .collect()
    }

    /// Handle for a stored routine.
    pub fn routine(&self, name: &str) -> DbResult<Routine> {
        let ctx = self.context();
        let description = ctx
            .model()
            .routine(name)
            .cloned()
            .ok_or_else(|| DbError::schema(format!("No routine named '{}'", name), name))?;
        Ok(Routine::new(ctx, description))
    }

    /// Build a composite value from a JSON object or array.
    pub fn composite(&self, type_name: &str, json: &serde_json::Value) -> DbResult<Value> {
        self.model().registry().composite_from_json(type_name, json)
    }

    /// Run raw SQL with positional parameters and return its rows.
    pub fn execute_sql(&self, sql: &str, params: Vec<Value>) -> DbResult<Vec<Row>> {
        self.inner
            .session
            .fetch(&Statement::new(sql).bind_all(params))
    }

    /// Re-reflect the catalog and swap in the new model, then run the hooks.
    /// Existing handles keep the model they were built from.
    pub fn reload(&self) -> DbResult<()> {
        self.inner.reload()?;
        self.inner.session.run_hooks();
        Ok(())
    }

    /// Register a hook run after every reconnect and reload.
    pub fn add_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner.session.add_hook(hook);
    }

    pub fn reconnect(&self) -> DbResult<()> {
        self.inner.session.reconnect()
    }

    /// Close the connection. The next statement reconnects.
    pub fn disconnect(&self) {
        self.inner.session.disconnect();
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.backend())
            .field("schema", &self.inner.schema)
            .field("tables", &self.model().entities().len())
            .finish()
    }
}
