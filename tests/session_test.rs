//! Integration tests for the shared session: reconnects, hooks, raw SQL,
//! schema reloads and concurrent use.

use schema_mirror::config::SessionOptions;
use schema_mirror::db::{Connection, ConnectionFactory, Statement, open};
use schema_mirror::models::{DatabaseType, Row, TableType};
use schema_mirror::{Database, DbError, DbResult, Value, fields};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

/// Wraps a real connection and fails the next statement with a lost
/// connection whenever `fail_next` is set.
struct FlakyConnection {
    inner: Box<dyn Connection>,
    fail_next: Arc<AtomicBool>,
}

impl FlakyConnection {
    fn check(&self) -> DbResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DbError::connection("server closed the connection", ""));
        }
        Ok(())
    }
}

impl Connection for FlakyConnection {
    fn backend(&self) -> DatabaseType {
        self.inner.backend()
    }

    fn fetch(&mut self, statement: &Statement) -> DbResult<Vec<Row>> {
        self.check()?;
        self.inner.fetch(statement)
    }

    fn execute(&mut self, statement: &Statement) -> DbResult<u64> {
        self.check()?;
        self.inner.execute(statement)
    }

    fn close(self: Box<Self>) -> DbResult<()> {
        self.inner.close()
    }
}

struct Fixture {
    _dir: TempDir,
    db: Database,
    fail_next: Arc<AtomicBool>,
    opened: Arc<AtomicUsize>,
}

fn setup(statements: &[&str]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("session.db").display());
    let fail_next = Arc::new(AtomicBool::new(false));
    let opened = Arc::new(AtomicUsize::new(0));

    let flag = Arc::clone(&fail_next);
    let counter = Arc::clone(&opened);
    let factory: ConnectionFactory = Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FlakyConnection {
            inner: open(&url)?,
            fail_next: Arc::clone(&flag),
        }) as Box<dyn Connection>)
    });
    let options = SessionOptions::default().with_retry_backoff_ms(1);
    let db = Database::connect_with(factory, options).unwrap();
    for sql in statements {
        db.execute_sql(sql, vec![]).unwrap();
    }
    db.reload().unwrap();
    Fixture {
        _dir: dir,
        db,
        fail_next,
        opened,
    }
}

fn setup_items() -> Fixture {
    setup(&[
        "CREATE TABLE item (id INTEGER PRIMARY KEY, name VARCHAR(20) NOT NULL)",
        "CREATE TABLE note (id INTEGER PRIMARY KEY, body TEXT)",
    ])
}

#[test]
fn test_connection_loss_reconnects_once() {
    let fx = setup_items();
    let items = fx.db.table("item").unwrap();
    items.insert(fields! { "name" => "a" }).unwrap();

    let hook_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&hook_calls);
    fx.db.add_hook(move || {
        calls.fetch_add(1, Ordering::SeqCst);
    });
    let opened_before = fx.opened.load(Ordering::SeqCst);

    fx.fail_next.store(true, Ordering::SeqCst);
    let rows = items.select(None, &[]).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(fx.db.session().reconnect_count(), 1);
    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.opened.load(Ordering::SeqCst), opened_before + 1);
}

#[test]
fn test_reconnect_reloads_model() {
    let fx = setup_items();
    fx.db
        .execute_sql("CREATE TABLE extra (id INTEGER PRIMARY KEY)", vec![])
        .unwrap();
    assert!(fx.db.table("extra").is_err());

    fx.db.reconnect().unwrap();
    assert!(fx.db.table("extra").is_ok());
}

#[test]
fn test_reload_runs_hooks() {
    let fx = setup_items();
    let hook_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&hook_calls);
    fx.db.add_hook(move || {
        calls.fetch_add(1, Ordering::SeqCst);
    });

    fx.db.reload().unwrap();
    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.db.session().reconnect_count(), 0);
}

#[test]
fn test_failed_reload_keeps_previous_model() {
    let fx = setup_items();
    let hook_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&hook_calls);
    fx.db.add_hook(move || {
        calls.fetch_add(1, Ordering::SeqCst);
    });
    fx.db
        .execute_sql("CREATE TABLE bad (id INTEGER PRIMARY KEY, x NUMERIC)", vec![])
        .unwrap();

    let err = fx.db.reload().unwrap_err();
    assert!(matches!(err, DbError::Schema { .. }));
    assert_eq!(hook_calls.load(Ordering::SeqCst), 0);

    let items = fx.db.table("item").unwrap();
    items.insert(fields! { "name" => "still here" }).unwrap();
    assert_eq!(items.select_count(None, &[]).unwrap(), 1);
    assert!(fx.db.table("bad").is_err());
    assert!(fx.db.model().entity("bad").is_none());
}

#[test]
fn test_execute_sql_after_disconnect() {
    let fx = setup_items();
    fx.db.disconnect();
    fx.db.disconnect();
    assert!(!fx.db.session().is_connected());

    let rows = fx
        .db
        .execute_sql("SELECT ? + 1 AS answer", vec![Value::Integer(41)])
        .unwrap();
    assert_eq!(rows[0].get("answer"), Some(&Value::Integer(42)));
    assert!(fx.db.session().is_connected());
}

#[test]
fn test_concurrent_selects_on_two_tables() {
    let fx = setup_items();
    let items = fx.db.table("item").unwrap();
    let notes = fx.db.table("note").unwrap();
    items
        .insert_many(&["name"], (0..10).map(|i| vec![Value::from(format!("item {i}"))]).collect())
        .unwrap();
    notes
        .insert_many(&["body"], (0..10).map(|i| vec![Value::from(format!("note {i}"))]).collect())
        .unwrap();

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let table = if worker % 2 == 0 { &items } else { &notes };
            scope.spawn(move || {
                for _ in 0..20 {
                    assert_eq!(table.select(None, &[]).unwrap().len(), 10);
                }
            });
        }
    });
}

#[test]
fn test_concurrent_inserts_are_not_suppressed() {
    let fx = setup_items();
    let items = fx.db.table("item").unwrap();

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let items = &items;
            scope.spawn(move || {
                for i in 0..10 {
                    // Materialization on this thread must not suspend inserts elsewhere
                    items.select(None, &[]).unwrap();
                    let row = items
                        .create(fields! { "name" => format!("w{worker}-{i}") })
                        .unwrap();
                    assert!(row.is_live());
                }
            });
        }
    });
    assert_eq!(items.select_count(None, &[]).unwrap(), 40);
}

#[test]
fn test_views_are_read_only() {
    let fx = setup(&[
        "CREATE TABLE item (id INTEGER PRIMARY KEY, name VARCHAR(20) NOT NULL)",
        "CREATE VIEW item_name AS SELECT id, name FROM item",
    ]);
    fx.db
        .table("item")
        .unwrap()
        .insert(fields! { "name" => "a" })
        .unwrap();

    let view = fx.db.table("item_name").unwrap();
    assert_eq!(view.entity().kind(), TableType::View);
    let mut row = view.select_one(None, &[]).unwrap().unwrap();
    assert_eq!(row.get("name").unwrap(), &Value::from("a"));

    let err = row.set("name", "b").unwrap_err();
    assert!(matches!(err, DbError::Permission { .. }));
    assert_eq!(row.get("name").unwrap(), &Value::from("a"));
}

#[test]
fn test_document_columns() {
    let fx = setup(&["CREATE TABLE doc (id INTEGER PRIMARY KEY, body JSON)"]);
    let docs = fx.db.table("doc").unwrap();

    let err = docs.insert(fields! { "body" => "{not json" }).unwrap_err();
    match err {
        DbError::Syntax { text, .. } => assert_eq!(text, "{not json"),
        other => panic!("expected a syntax error, got {other:?}"),
    }

    let mut row = docs.insert(fields! { "body" => r#"{"tags": ["a"]}"# }).unwrap();
    {
        let mut body = row.document_mut("body").unwrap();
        body.push("/tags", serde_json::json!("b")).unwrap();
        body.set("/owner", serde_json::json!({ "name": "ada" })).unwrap();
        assert_eq!(body.remove("/missing").unwrap(), None);
    }

    let id = row.get("id").unwrap().clone();
    let stored = docs.select_one(Some("id = ?"), &[id]).unwrap().unwrap();
    assert_eq!(
        stored.get("body").unwrap(),
        &Value::Json(serde_json::json!({ "tags": ["a", "b"], "owner": { "name": "ada" } }))
    );

    let err = row.document_mut("id").err().unwrap();
    assert!(matches!(err, DbError::TypeMismatch { .. }));
}

#[test]
fn test_model_reports_views_and_tables_as_json() {
    let fx = setup_items();
    let doc = serde_json::to_value(&*fx.db.model()).unwrap();
    assert_eq!(doc["backend"], "sqlite");
    let names: Vec<&str> = doc["tables"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["item", "note"]);
}
