//! Connection & session management.
//!
//! A [`Session`] owns the single live connection shared by every entity and
//! table handle. Each statement runs under the session lock, so statements
//! from concurrent threads never interleave on the connection.
//!
//! Connection-loss errors are retried: the session waits, reconnects through
//! its factory, and runs the statement again, up to the configured attempt
//! ceiling. Every other error propagates on the first failure.

use crate::config::SessionOptions;
use crate::db::driver::{Connection, ConnectionFactory, Statement};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, Row};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Callback run after every successful (re)connect.
pub type Hook = Arc<dyn Fn() + Send + Sync>;

type ReconnectCallback = Arc<dyn Fn() -> DbResult<()> + Send + Sync>;

pub struct Session {
    factory: ConnectionFactory,
    options: SessionOptions,
    backend: DatabaseType,
    conn: Mutex<Option<Box<dyn Connection>>>,
    /// Serializes reconnects so one connection loss is repaired once
    reconnect_lock: Mutex<()>,
    on_reconnect: Mutex<Option<ReconnectCallback>>,
    hooks: Mutex<Vec<Hook>>,
    reconnects: AtomicU64,
}

impl Session {
    /// Call the factory once and wrap the resulting connection.
    pub fn connect(factory: ConnectionFactory, options: SessionOptions) -> DbResult<Self> {
        options.validate().map_err(DbError::invalid_input)?;
        let conn = factory()?;
        let backend = conn.backend();
        info!(backend = %backend, "Session connected");
        Ok(Self {
            factory,
            options,
            backend,
            conn: Mutex::new(Some(conn)),
            reconnect_lock: Mutex::new(()),
            on_reconnect: Mutex::new(None),
            hooks: Mutex::new(Vec::new()),
            reconnects: AtomicU64::new(0),
        })
    }

    pub fn backend(&self) -> DatabaseType {
        self.backend
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Number of completed reconnects.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Install the callback that re-initializes dependent state after the
    /// connection is replaced. It runs before any hook.
    pub fn set_on_reconnect(&self, callback: impl Fn() -> DbResult<()> + Send + Sync + 'static) {
        *self.on_reconnect.lock() = Some(Arc::new(callback));
    }

    /// Register a hook. Hooks run in registration order and must not
    /// reconnect the session themselves.
    pub fn add_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.hooks.lock().push(Arc::new(hook));
    }

    pub fn run_hooks(&self) {
        let hooks: Vec<Hook> = self.hooks.lock().clone();
        for hook in hooks {
            hook();
        }
    }

    /// Close the connection. Close errors are logged and swallowed.
    pub fn disconnect(&self) {
        let old = self.conn.lock().take();
        match old {
            Some(conn) => match conn.close() {
                Ok(()) => info!("Session disconnected"),
                Err(e) => warn!(error = %e, "Ignoring error while closing connection"),
            },
            None => debug!("Session already disconnected"),
        }
    }

    /// Replace the connection with a fresh one from the factory, then run the
    /// reconnect callback and hooks. Factory and callback failures propagate.
    pub fn reconnect(&self) -> DbResult<()> {
        let _serial = self.reconnect_lock.lock();
        self.replace_connection()
    }

    /// Run a statement and return its rows, retrying on connection loss.
    pub fn fetch(&self, statement: &Statement) -> DbResult<Vec<Row>> {
        self.with_retry(|conn| conn.fetch(statement))
    }

    /// Run a statement and return the affected row count, retrying on
    /// connection loss.
    pub fn execute(&self, statement: &Statement) -> DbResult<u64> {
        self.with_retry(|conn| conn.execute(statement))
    }

    /// Run a statement once, without retry. Used for catalog reads issued
    /// while a reconnect is already in progress.
    pub fn fetch_once(&self, statement: &Statement) -> DbResult<Vec<Row>> {
        self.with_connection(&|conn: &mut dyn Connection| conn.fetch(statement))
    }

    fn replace_connection(&self) -> DbResult<()> {
        let fresh = (self.factory)()?;
        let old = self.conn.lock().replace(fresh);
        if let Some(old) = old {
            if let Err(e) = old.close() {
                debug!(error = %e, "Ignoring error while closing replaced connection");
            }
        }
        let count = self.reconnects.fetch_add(1, Ordering::SeqCst) + 1;
        info!(reconnects = count, "Session reconnected");

        let callback = self.on_reconnect.lock().clone();
        if let Some(callback) = callback {
            callback()?;
        }
        self.run_hooks();
        Ok(())
    }

    /// Reconnect unless another thread already replaced the connection since
    /// `seen` was read.
    fn reconnect_after_failure(&self, seen: u64) -> DbResult<()> {
        let _serial = self.reconnect_lock.lock();
        if self.reconnects.load(Ordering::SeqCst) != seen {
            debug!("Connection already replaced by another caller");
            return Ok(());
        }
        self.replace_connection()
    }

    fn with_connection<T>(&self, op: &impl Fn(&mut dyn Connection) -> DbResult<T>) -> DbResult<T> {
        let mut guard = self.conn.lock();
        match guard.as_deref_mut() {
            Some(conn) => op(conn),
            None => Err(DbError::connection(
                "Not connected",
                "The session was disconnected, it reconnects on the next statement",
            )),
        }
    }

    fn with_retry<T>(&self, op: impl Fn(&mut dyn Connection) -> DbResult<T>) -> DbResult<T> {
        let max_attempts = self.options.max_retries_or_default();
        let backoff = self.options.retry_backoff_or_default();
        let mut attempt: u32 = 1;
        loop {
            let seen = self.reconnects.load(Ordering::SeqCst);
            let err = match self.with_connection(&op) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if !err.is_retryable() || attempt >= max_attempts {
                return Err(err);
            }
            warn!(
                attempt,
                max_attempts,
                error = %err,
                "Connection lost, reconnecting"
            );
            std::thread::sleep(backoff * attempt);
            if let Err(e) = self.reconnect_after_failure(seen) {
                if !e.is_retryable() {
                    return Err(e);
                }
                warn!(error = %e, "Reconnect failed");
            }
            attempt += 1;
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.backend)
            .field("options", &self.options)
            .field("reconnects", &self.reconnect_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;
    use std::sync::atomic::AtomicUsize;

    /// Scripted connection: pops one outcome per statement, succeeding
    /// with an empty result once the script runs out.
    struct ScriptedConnection {
        script: Arc<Mutex<Vec<DbError>>>,
        fail_close: bool,
    }

    impl Connection for ScriptedConnection {
        fn backend(&self) -> DatabaseType {
            DatabaseType::SQLite
        }

        fn fetch(&mut self, _statement: &Statement) -> DbResult<Vec<Row>> {
            match self.script.lock().pop() {
                Some(err) => Err(err),
                None => Ok(Vec::new()),
            }
        }

        fn execute(&mut self, statement: &Statement) -> DbResult<u64> {
            self.fetch(statement).map(|_| 1)
        }

        fn close(self: Box<Self>) -> DbResult<()> {
            if self.fail_close {
                Err(DbError::connection("already closed", ""))
            } else {
                Ok(())
            }
        }
    }

    fn scripted_session(
        errors: Vec<DbError>,
        max_retries: u32,
    ) -> (Session, Arc<AtomicUsize>) {
        let script = Arc::new(Mutex::new(errors));
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        let factory: ConnectionFactory = Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedConnection {
                script: Arc::clone(&script),
                fail_close: true,
            }) as Box<dyn Connection>)
        });
        let options = SessionOptions::default()
            .with_max_retries(max_retries)
            .with_retry_backoff_ms(1);
        (Session::connect(factory, options).unwrap(), opened)
    }

    fn lost() -> DbError {
        DbError::connection("server closed the connection", "")
    }

    #[test]
    fn test_connect_calls_factory_once() {
        let (session, opened) = scripted_session(vec![], 3);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(session.backend(), DatabaseType::SQLite);
        assert!(session.is_connected());
    }

    #[test]
    fn test_connection_loss_reconnects_once_and_succeeds() {
        let (session, opened) = scripted_session(vec![lost()], 3);
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&hook_calls);
        session.add_hook(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        });

        let rows = session.fetch(&Statement::new("SELECT 1")).unwrap();
        assert!(rows.is_empty());
        assert_eq!(session.reconnect_count(), 1);
        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retries_exhausted_surfaces_error() {
        let (session, _) = scripted_session(vec![lost(), lost(), lost()], 3);
        let err = session.execute(&Statement::new("UPDATE t SET a = 1")).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(session.reconnect_count(), 2);
    }

    #[test]
    fn test_constraint_errors_are_not_retried() {
        let dup = DbError::database("duplicate key", Some("23505".into()), "");
        let (session, opened) = scripted_session(vec![dup], 3);
        let err = session
            .execute(&Statement::new("INSERT INTO t VALUES (?)").bind(1))
            .unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(session.reconnect_count(), 0);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fetch_once_does_not_retry() {
        let (session, _) = scripted_session(vec![lost()], 3);
        assert!(session.fetch_once(&Statement::new("SELECT 1")).is_err());
        assert_eq!(session.reconnect_count(), 0);
    }

    #[test]
    fn test_disconnect_swallows_close_errors_and_reconnects_lazily() {
        let (session, opened) = scripted_session(vec![], 3);
        session.disconnect();
        assert!(!session.is_connected());
        session.disconnect();

        let result = session.fetch(&Statement::new("SELECT 1").bind(Value::Null));
        assert!(result.is_ok());
        assert!(session.is_connected());
        assert_eq!(opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reconnect_runs_callback_then_hooks_in_order() {
        let (session, _) = scripted_session(vec![], 3);
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&order);
        session.set_on_reconnect(move || {
            log.lock().push("reload");
            Ok(())
        });
        let log = Arc::clone(&order);
        session.add_hook(move || log.lock().push("first"));
        let log = Arc::clone(&order);
        session.add_hook(move || log.lock().push("second"));

        session.reconnect().unwrap();
        assert_eq!(*order.lock(), vec!["reload", "first", "second"]);
    }

    #[test]
    fn test_reconnect_callback_failure_propagates() {
        let (session, _) = scripted_session(vec![], 3);
        session.set_on_reconnect(|| Err(DbError::schema("catalog read failed", "public")));
        let err = session.reconnect().unwrap_err();
        assert!(matches!(err, DbError::Schema { .. }));
    }
}
