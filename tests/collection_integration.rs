//! Integration tests for servers, collections and cursors.
//!
//! Everything runs against the in-memory driver, whose call log shows which
//! driver operations a collection operation turned into.

use std::sync::Arc;
use std::thread;

use bson::doc;
use chorus::mongodb::driver::{DriverOp, Namespace};
use chorus::mongodb::{FieldMap, MemoryDriver, MongoContext, MongoError, WriteAck, WriteConcern};
use chorus::{Collection, Table, Value};
use pretty_assertions::assert_eq;

fn context(driver: &MemoryDriver) -> MongoContext {
    MongoContext::builder()
        .driver(Arc::new(driver.clone()))
        .build()
        .unwrap()
}

fn people(driver: &MemoryDriver) -> Collection {
    context(driver)
        .open_collection(&Value::from("mongodb://localhost/crm"), "people", &Value::Void)
        .unwrap()
}

fn person(name: &str, age: i64) -> Value {
    Value::Table(Table::new().with("name", name).with("age", age))
}

fn options(name: &str, value: impl Into<Value>) -> Value {
    Value::Table(Table::new().with(name, value))
}

fn seed_people(driver: &MemoryDriver, count: i32) {
    let ns = Namespace::new("crm", "people");
    driver
        .store()
        .seed(&ns, (0..count).map(|i| doc! { "name": format!("p{}", i), "age": i }));
}

/// Test that a cursor refuses reads from another thread and keeps working
/// on its own
#[test]
fn test_cursor_thread_affinity() {
    let driver = MemoryDriver::new();
    seed_people(&driver, 3);
    let coll = people(&driver);
    let cursor = Arc::new(coll.cursor(&Value::Void, &Value::Void).unwrap());

    let remote = Arc::clone(&cursor);
    let err = thread::spawn(move || remote.read(1, &Value::Void).unwrap_err())
        .join()
        .unwrap();
    assert!(err.is_thread_conflict());
    assert!(matches!(err, MongoError::ThreadConflict { .. }));

    let first = cursor.read(1, &Value::Void).unwrap();
    assert!(first.as_table().is_some());
    let rest = cursor.read(10, &Value::Void).unwrap();
    assert_eq!(rest.as_members().len(), 2);
    assert_eq!(cursor.read_count(), 3);
}

/// Test that the reckless option turns the thread check off
#[test]
fn test_reckless_cursor_crosses_threads() {
    let driver = MemoryDriver::new();
    seed_people(&driver, 2);
    let coll = people(&driver);
    let cursor = Arc::new(coll.cursor(&Value::Void, &options("reckless", true)).unwrap());

    let remote = Arc::clone(&cursor);
    let read = thread::spawn(move || remote.read(5, &Value::Void).map(|v| v.as_members().len()))
        .join()
        .unwrap()
        .unwrap();
    assert_eq!(read, 2);
}

/// Test that closing a cursor twice releases its connection once
#[test]
fn test_cursor_double_close() {
    let driver = MemoryDriver::new();
    seed_people(&driver, 2);
    let coll = people(&driver);
    let cursor = coll.cursor(&Value::Void, &Value::Void).unwrap();

    let before = coll.server().pool_stats();
    assert_eq!(before.active, 1);

    cursor.close();
    let after = coll.server().pool_stats();
    assert_eq!(after.releases, before.releases + 1);
    assert_eq!(after.active, 0);

    cursor.close();
    assert_eq!(coll.server().pool_stats(), after);
    assert!(cursor.is_closed());
    assert!(matches!(
        cursor.read(1, &Value::Void).unwrap_err(),
        MongoError::CursorClosed
    ));
}

/// Test how the write option maps to a write concern
#[test]
fn test_write_option_translation() {
    let driver = MemoryDriver::new();
    let coll = people(&driver);
    let cases = [
        (Value::from(false), WriteAck::Unacknowledged),
        (Value::from(true), WriteAck::Majority),
        (Value::from(3), WriteAck::Nodes(3)),
        (Value::from(-1), WriteAck::ErrorsIgnored),
    ];

    for (i, (write, ack)) in cases.into_iter().enumerate() {
        coll.insert(&person(&format!("w{}", i), 1), &options("write", write))
            .unwrap();
        let call = driver.store().calls().last(DriverOp::InsertOne).unwrap();
        assert_eq!(call.write_concern, Some(WriteConcern::new(ack)));
    }

    coll.insert(&person("plain", 1), &Value::Void).unwrap();
    let call = driver.store().calls().last(DriverOp::InsertOne).unwrap();
    assert_eq!(call.write_concern, None);
}

/// Test that a choice-slot field comes back as the set that was stored
#[test]
fn test_choice_slot_end_to_end() {
    let driver = MemoryDriver::new();
    let server = context(&driver)
        .open_with_fieldmap(
            &Value::from("mongodb://localhost/crm"),
            &Value::Void,
            FieldMap::new().choice_slot("tags"),
        )
        .unwrap();
    let coll = server.collection("people", &Value::Void).unwrap();
    let tags = Value::choice([Value::from("x"), Value::from("y")]);

    coll.insert(
        &Value::Table(Table::new().with("name", "a").with("tags", tags.clone())),
        &Value::Void,
    )
    .unwrap();
    let stored = driver.store().documents(coll.namespace());
    assert_eq!(stored[0].get_array("tags").unwrap().len(), 2);

    let found = coll.find(&options("name", "a"), &Value::Void).unwrap();
    assert_eq!(found.as_table().and_then(|t| t.get_sym("tags")), Some(&tags));

    // The server may hand the array back in any order.
    driver
        .store()
        .seed(coll.namespace(), [doc! { "name": "b", "tags": ["y", "x"] }]);
    let found = coll.find(&options("name", "b"), &Value::Void).unwrap();
    assert_eq!(found.as_table().and_then(|t| t.get_sym("tags")), Some(&tags));
}

/// Test that only a real query takes the exact count path
#[test]
fn test_count_paths() {
    let driver = MemoryDriver::new();
    seed_people(&driver, 4);
    let coll = people(&driver);
    let calls = driver.store().calls();

    assert_eq!(coll.count(&Value::Table(Table::new()), &Value::Void).unwrap(), 4);
    assert_eq!(calls.count(DriverOp::EstimatedCount), 1);
    assert_eq!(calls.count(DriverOp::CountDocuments), 0);
    assert_eq!(calls.last(DriverOp::EstimatedCount).unwrap().filter, None);

    assert_eq!(coll.count(&options("name", "p2"), &Value::Void).unwrap(), 1);
    assert_eq!(calls.count(DriverOp::EstimatedCount), 1);
    assert_eq!(calls.count(DriverOp::CountDocuments), 1);
    assert_eq!(
        calls.last(DriverOp::CountDocuments).unwrap().filter,
        Some(doc! { "name": "p2" })
    );
}

/// Test that one unencodable document aborts a bulk insert before any write
#[test]
fn test_bulk_insert_encode_failure() {
    let driver = MemoryDriver::new();
    let coll = people(&driver);

    let batch = Value::choice([person("a", 1), Value::from(7), person("c", 3)]);
    let err = coll.insert(&batch, &Value::Void).unwrap_err();
    assert!(err.is_codec());

    let too_big = Value::Table(Table::new().with("n", Value::BigInt(i128::MAX)));
    let batch = Value::choice([person("a", 1), too_big, person("c", 3)]);
    let err = coll.insert(&batch, &Value::Void).unwrap_err();
    assert!(err.is_codec());

    let calls = driver.store().calls();
    assert_eq!(calls.count(DriverOp::InsertMany), 0);
    assert_eq!(calls.count(DriverOp::InsertOne), 0);
    assert!(driver.store().documents(coll.namespace()).is_empty());
}

/// Test a bulk insert that succeeds
#[test]
fn test_bulk_insert() {
    let driver = MemoryDriver::new();
    let coll = people(&driver);

    let batch = Value::choice([person("a", 1), person("b", 2), person("c", 3)]);
    coll.insert(&batch, &options("sorted", true)).unwrap();

    assert_eq!(driver.store().documents(coll.namespace()).len(), 3);
    let call = driver.store().calls().last(DriverOp::InsertMany).unwrap();
    assert_eq!(call.documents, 3);
    assert_eq!(call.options, Some(doc! { "ordered": true }));
}

/// Test a full write cycle against one collection
#[test]
fn test_crud_cycle() {
    let driver = MemoryDriver::new();
    let coll = people(&driver);

    coll.insert(&person("ann", 30), &Value::Void).unwrap();
    coll.insert(&person("bob", 41), &Value::Void).unwrap();

    let update = Value::Table(Table::new().with("$set", Table::new().with("age", 31)));
    assert!(coll.update(&options("name", "ann"), &update, &Value::Void).unwrap());
    let ann = coll.get(&options("name", "ann"), &Value::Void).unwrap();
    assert_eq!(
        ann.as_table().and_then(|t| t.get_sym("age")),
        Some(&Value::from(31))
    );

    assert!(coll.remove(&options("name", "bob"), &Value::Void).unwrap());
    assert_eq!(coll.count(&Value::Void, &Value::Void).unwrap(), 1);
    assert!(coll.get(&options("name", "bob"), &Value::Void).unwrap().is_empty_choice());
}
