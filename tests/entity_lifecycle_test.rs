//! Integration tests for entity construction, field writes and table
//! operations against a file-backed SQLite database.
//!
//! Tests verify that:
//! - Omitted fields take their parsed defaults and server values are read back
//! - Validation failures leave memory and the database unchanged
//! - Tables without a primary key still support reads and inserts
//! - Instances fetched separately are independent until refreshed

use schema_mirror::entity::{InstanceState, suspend_inserts};
use schema_mirror::{Database, DbError, Value, fields};
use tempfile::TempDir;

/// Open a fresh database, run the setup statements and load the model.
fn setup(statements: &[&str]) -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!(
        "sqlite:{}?retry_backoff_ms=1",
        dir.path().join("test.db").display()
    );
    let db = Database::connect(&url).unwrap();
    for sql in statements {
        db.execute_sql(sql, vec![]).unwrap();
    }
    db.reload().unwrap();
    (dir, db)
}

fn setup_t() -> (TempDir, Database) {
    setup(&["CREATE TABLE t (id INTEGER PRIMARY KEY, name VARCHAR(5) NOT NULL DEFAULT 'abc')"])
}

#[test]
fn test_insert_without_fields_uses_defaults() {
    let (_dir, db) = setup_t();
    let t = db.table("t").unwrap();

    let row = t.insert(fields!()).unwrap();
    assert!(row.is_live());
    assert_eq!(row.get("name").unwrap(), &Value::from("abc"));
    let id = row.get("id").unwrap().clone();
    assert!(matches!(id, Value::Integer(_)));

    let fetched = t.select_one(Some("id = ?"), &[id]).unwrap().unwrap();
    assert_eq!(fetched.get("name").unwrap(), &Value::from("abc"));
}

#[test]
fn test_round_trip_supplied_fields() {
    let (_dir, db) = setup_t();
    let t = db.table("t").unwrap();

    let row = t.create(fields! { "name" => "xy" }).unwrap();
    let id = row.get("id").unwrap().clone();
    let fetched = t.select_one(Some("id = ?"), &[id.clone()]).unwrap().unwrap();
    assert_eq!(fetched.get("id").unwrap(), &id);
    assert_eq!(fetched.get("name").unwrap(), &Value::from("xy"));
}

#[test]
fn test_length_violation_inserts_nothing() {
    let (_dir, db) = setup_t();
    let t = db.table("t").unwrap();

    let err = t.insert(fields! { "name" => "toolong!" }).unwrap_err();
    match err {
        DbError::LengthViolation {
            column,
            actual,
            max,
        } => {
            assert_eq!(column, "name");
            assert_eq!(actual, 8);
            assert_eq!(max, 5);
        }
        other => panic!("expected a length violation, got {other:?}"),
    }
    assert_eq!(t.select_count(None, &[]).unwrap(), 0);
}

#[test]
fn test_bounded_write_is_persisted() {
    let (_dir, db) = setup_t();
    let t = db.table("t").unwrap();

    let mut row = t.insert(fields!()).unwrap();
    row.set("name", "hello").unwrap();
    let id = row.get("id").unwrap().clone();
    let fetched = t.select_one(Some("id = ?"), &[id]).unwrap().unwrap();
    assert_eq!(fetched.get("name").unwrap(), &Value::from("hello"));
}

#[test]
fn test_null_violation_keeps_committed_value() {
    let (_dir, db) = setup_t();
    let t = db.table("t").unwrap();

    let mut row = t.insert(fields! { "name" => "keep" }).unwrap();
    let err = row.set("name", None::<String>).unwrap_err();
    assert!(matches!(err, DbError::NullViolation { ref column } if column == "name"));
    assert!(err.is_validation());
    assert_eq!(row.get("name").unwrap(), &Value::from("keep"));

    let fetched = t.select(None, &[]).unwrap();
    assert_eq!(fetched[0].get("name").unwrap(), &Value::from("keep"));
}

#[test]
fn test_type_mismatch_names_both_types() {
    let (_dir, db) = setup_t();
    let t = db.table("t").unwrap();

    let mut row = t.insert(fields!()).unwrap();
    let err = row.set("name", 42i64).unwrap_err();
    match err {
        DbError::TypeMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, "varchar(5)");
            assert_eq!(actual, "integer");
        }
        other => panic!("expected a type mismatch, got {other:?}"),
    }
}

#[test]
fn test_unknown_field_fails_construction() {
    let (_dir, db) = setup_t();
    let t = db.table("t").unwrap();

    let err = t.create(fields! { "nickname" => "x" }).unwrap_err();
    assert!(matches!(err, DbError::UnknownField { ref field, .. } if field == "nickname"));
    assert_eq!(t.select_count(None, &[]).unwrap(), 0);
}

#[test]
fn test_independent_instances_until_refresh() {
    let (_dir, db) = setup_t();
    let t = db.table("t").unwrap();
    let id = t.insert(fields! { "name" => "old" }).unwrap().get("id").unwrap().clone();

    let mut a = t.select_one(Some("id = ?"), &[id.clone()]).unwrap().unwrap();
    let mut b = t.select_one(Some("id = ?"), &[id]).unwrap().unwrap();
    a.set("name", "new").unwrap();
    assert_eq!(b.get("name").unwrap(), &Value::from("old"));

    b.refresh().unwrap();
    assert_eq!(b.get("name").unwrap(), &Value::from("new"));
}

#[test]
fn test_update_sets_several_fields() {
    let (_dir, db) = setup(&[
        "CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER, active BOOLEAN NOT NULL DEFAULT 1)",
    ]);
    let people = db.table("person").unwrap();

    let mut ada = people.insert(fields! { "name" => "ada" }).unwrap();
    assert_eq!(ada.get("active").unwrap(), &Value::Boolean(true));
    ada.update(fields! { "age" => 36i64, "active" => false }).unwrap();

    let fetched = people.select(None, &[]).unwrap();
    assert_eq!(fetched[0].get("age").unwrap(), &Value::Integer(36));
    assert_eq!(fetched[0].get("active").unwrap(), &Value::Boolean(false));
}

#[test]
fn test_delete_instance_then_writes_fail() {
    let (_dir, db) = setup_t();
    let t = db.table("t").unwrap();

    let mut row = t.insert(fields!()).unwrap();
    row.delete().unwrap();
    assert_eq!(row.state(), InstanceState::Deleted);
    assert_eq!(t.select_count(None, &[]).unwrap(), 0);

    let err = row.set("name", "x").unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));
}

#[test]
fn test_table_without_primary_key() {
    let (_dir, db) = setup(&["CREATE TABLE log (msg TEXT)"]);
    let log = db.table("log").unwrap();

    let mut entry = log.insert(fields! { "msg" => "a" }).unwrap();
    assert_eq!(log.select_count(None, &[]).unwrap(), 1);
    assert_eq!(log.select(None, &[]).unwrap().len(), 1);

    let err = entry.update(fields! { "msg" => "b" }).unwrap_err();
    assert!(matches!(err, DbError::MissingPrimaryKey { .. }));
    let err = entry.delete().unwrap_err();
    assert!(matches!(err, DbError::MissingPrimaryKey { .. }));
    assert_eq!(entry.get("msg").unwrap(), &Value::from("a"));
}

#[test]
fn test_insert_many_and_filters() {
    let (_dir, db) = setup_t();
    let t = db.table("t").unwrap();

    let inserted = t
        .insert_many(
            &["name"],
            vec![vec!["a".into()], vec!["b".into()], vec!["a".into()]],
        )
        .unwrap();
    assert_eq!(inserted, 3);
    assert_eq!(t.select_count(Some("name = ?"), &["a".into()]).unwrap(), 2);

    let deleted = t.delete(Some("name = ?"), &["a".into()]).unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(t.select_count(None, &[]).unwrap(), 1);
    assert!(t.select_one(Some("name = ?"), &["zz".into()]).unwrap().is_none());
}

#[test]
fn test_insert_many_validates_every_row_first() {
    let (_dir, db) = setup_t();
    let t = db.table("t").unwrap();

    let err = t
        .insert_many(&["name"], vec![vec!["ok".into()], vec!["toolong".into()]])
        .unwrap_err();
    assert!(matches!(err, DbError::LengthViolation { .. }));
    let err = t.insert_many(&["name"], vec![vec![]]).unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));
    assert_eq!(t.insert_many(&["name"], vec![]).unwrap(), 0);
    assert_eq!(t.select_count(None, &[]).unwrap(), 0);
}

#[test]
fn test_suspended_create_stays_detached_until_saved() {
    let (_dir, db) = setup_t();
    let t = db.table("t").unwrap();

    let mut row = {
        let _suspended = suspend_inserts();
        t.create(fields! { "name" => "later" }).unwrap()
    };
    assert_eq!(row.state(), InstanceState::Detached);
    assert_eq!(t.select_count(None, &[]).unwrap(), 0);

    row.save().unwrap();
    assert!(row.is_live());
    assert!(!row.get("id").unwrap().is_null());
    assert_eq!(t.select_count(None, &[]).unwrap(), 1);
}

#[test]
fn test_instance_serializes_as_object() {
    let (_dir, db) = setup_t();
    let t = db.table("t").unwrap();

    let row = t.insert(fields! { "name" => "json" }).unwrap();
    let doc = serde_json::to_value(&row).unwrap();
    assert_eq!(doc["name"], "json");
    assert!(doc["id"].is_i64());
}

#[test]
fn test_constraint_errors_are_reported() {
    let (_dir, db) = setup(&["CREATE TABLE tag (id INTEGER PRIMARY KEY, label TEXT UNIQUE)"]);
    let tags = db.table("tag").unwrap();

    tags.insert(fields! { "label" => "x" }).unwrap();
    let err = tags.insert(fields! { "label" => "x" }).unwrap_err();
    assert!(err.is_constraint_violation());
    assert!(!err.is_retryable());
    assert_eq!(db.session().reconnect_count(), 0);
}

#[test]
fn test_select_one_reads_only_the_first_row() {
    let (_dir, db) = setup(&[
        "CREATE TABLE p (id INTEGER PRIMARY KEY, n INTEGER)",
        "INSERT INTO p (id, n) VALUES (1, 5), (2, 'abc')",
    ]);
    let p = db.table("p").unwrap();

    // The second row cannot be read as an integer
    assert!(p.select(None, &[]).is_err());

    let first = p.select_one(Some("id > 0 ORDER BY id"), &[]).unwrap().unwrap();
    assert_eq!(first.get("id").unwrap(), &Value::Integer(1));
    assert_eq!(first.get("n").unwrap(), &Value::Integer(5));
}
