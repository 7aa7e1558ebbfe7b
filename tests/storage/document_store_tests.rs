//! DocumentStore interface tests.
//!
//! These tests verify the contract of the DocumentStore trait.
//! Each storage implementation should run these tests. Every test uses its
//! own collection so one store instance can run the whole suite.

use serde_json::{json, Map, Value};

use classroom_ledger::storage::{
    CollectionPath, DocumentStore, FieldOp, Precondition, StorageError, Transaction, WriteBatch,
    WriteOp, MAX_BATCH_WRITES,
};

pub fn collection(test: &str) -> CollectionPath {
    CollectionPath::new(format!("contract/{}/items", test))
}

pub fn body(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {}", other),
    }
}

pub fn batch(ops: Vec<WriteOp>) -> WriteBatch {
    WriteBatch::from(ops)
}

// =============================================================================
// Reads and writes
// =============================================================================

pub async fn test_get_missing<S: DocumentStore>(store: &S) {
    let doc = store
        .get(&collection("get_missing").doc("nope"))
        .await
        .expect("get should succeed");
    assert!(doc.is_none(), "missing document should read as None");
}

pub async fn test_create_and_get<S: DocumentStore>(store: &S) {
    let path = collection("create_get").doc("a");
    let result = store
        .commit(batch(vec![WriteOp::create(
            path.clone(),
            body(json!({"name": "Ada", "xp": 5})),
        )]))
        .await
        .expect("create should succeed");
    assert_eq!(result.writes, 1);

    let doc = store.get(&path).await.unwrap().expect("document should exist");
    assert_eq!(doc.id(), "a");
    assert_eq!(doc.data["name"], json!("Ada"));
    assert_eq!(doc.data["xp"], json!(5));
    assert_eq!(doc.version, result.version, "document carries commit version");
}

pub async fn test_versions_increase<S: DocumentStore>(store: &S) {
    let path = collection("versions").doc("a");
    let first = store
        .commit(batch(vec![WriteOp::set(path.clone(), body(json!({"n": 1})))]))
        .await
        .unwrap();
    let second = store
        .commit(batch(vec![WriteOp::set(path.clone(), body(json!({"n": 2})))]))
        .await
        .unwrap();
    assert!(second.version > first.version, "versions must increase");
    assert_eq!(store.get(&path).await.unwrap().unwrap().version, second.version);
}

pub async fn test_create_existing_fails<S: DocumentStore>(store: &S) {
    let path = collection("create_existing").doc("a");
    store
        .commit(batch(vec![WriteOp::create(path.clone(), body(json!({"n": 1})))]))
        .await
        .unwrap();

    let err = store
        .commit(batch(vec![WriteOp::create(path.clone(), body(json!({"n": 2})))]))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists { .. }), "got {:?}", err);
    assert_eq!(store.get(&path).await.unwrap().unwrap().data["n"], json!(1));
}

pub async fn test_update_missing_fails<S: DocumentStore>(store: &S) {
    let err = store
        .commit(batch(vec![WriteOp::update(
            collection("update_missing").doc("ghost"),
            vec![("n".to_string(), FieldOp::Increment(1))],
        )]))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }), "got {:?}", err);
}

pub async fn test_delete_is_unconditional<S: DocumentStore>(store: &S) {
    let path = collection("delete").doc("a");
    store
        .commit(batch(vec![WriteOp::set(path.clone(), body(json!({"n": 1})))]))
        .await
        .unwrap();
    store
        .commit(batch(vec![WriteOp::delete(path.clone())]))
        .await
        .expect("delete should succeed");
    assert!(store.get(&path).await.unwrap().is_none());

    store
        .commit(batch(vec![WriteOp::delete(path.clone())]))
        .await
        .expect("deleting a missing document should succeed");
}

pub async fn test_list_is_scoped_and_ordered<S: DocumentStore>(store: &S) {
    let coll = collection("list");
    let other = collection("list_other");
    store
        .commit(batch(vec![
            WriteOp::set(coll.doc("c"), body(json!({}))),
            WriteOp::set(coll.doc("a"), body(json!({}))),
            WriteOp::set(other.doc("b"), body(json!({}))),
            WriteOp::set(coll.doc("b"), body(json!({}))),
        ]))
        .await
        .unwrap();

    let ids: Vec<String> = store
        .list(&coll)
        .await
        .unwrap()
        .iter()
        .map(|d| d.id().to_string())
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(store.list(&collection("list_empty")).await.unwrap().is_empty());
}

// =============================================================================
// Field transforms
// =============================================================================

pub async fn test_increment_and_append<S: DocumentStore>(store: &S) {
    let path = collection("transforms").doc("a");
    store
        .commit(batch(vec![WriteOp::set(path.clone(), body(json!({"xp": 10})))]))
        .await
        .unwrap();

    store
        .commit(batch(vec![WriteOp::update(
            path.clone(),
            vec![
                ("xp".to_string(), FieldOp::Increment(5)),
                ("money".to_string(), FieldOp::Increment(250)),
                ("marks".to_string(), FieldOp::Append(json!({"type": "Late"}))),
            ],
        )]))
        .await
        .unwrap();
    store
        .commit(batch(vec![WriteOp::update(
            path.clone(),
            vec![("marks".to_string(), FieldOp::Append(json!({"type": "Noise"})))],
        )]))
        .await
        .unwrap();

    let doc = store.get(&path).await.unwrap().unwrap();
    assert_eq!(doc.data["xp"], json!(15));
    assert_eq!(doc.data["money"], json!(250), "missing field increments from zero");
    assert_eq!(doc.data["marks"], json!([{"type": "Late"}, {"type": "Noise"}]));
}

pub async fn test_store_timestamp<S: DocumentStore>(store: &S) {
    let path = collection("timestamp").doc("a");
    let result = store
        .commit(batch(vec![WriteOp::create(path.clone(), body(json!({"n": 1})))
            .with_transform("timestamp", FieldOp::StoreTimestamp)]))
        .await
        .unwrap();

    let doc = store.get(&path).await.unwrap().unwrap();
    let stamped = doc.data["timestamp"].as_str().expect("timestamp is a string");
    let parsed = chrono::DateTime::parse_from_rfc3339(stamped).expect("timestamp is RFC 3339");
    let drift = (parsed.with_timezone(&chrono::Utc) - result.commit_time)
        .num_milliseconds()
        .abs();
    assert!(drift < 1, "timestamp should be the commit time");
}

pub async fn test_invalid_increment_rejected<S: DocumentStore>(store: &S) {
    let path = collection("bad_increment").doc("a");
    store
        .commit(batch(vec![WriteOp::set(path.clone(), body(json!({"name": "Ada"})))]))
        .await
        .unwrap();

    let err = store
        .commit(batch(vec![WriteOp::update(
            path.clone(),
            vec![("name".to_string(), FieldOp::Increment(1))],
        )]))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidTransform { .. }), "got {:?}", err);
}

// =============================================================================
// Batch atomicity and preconditions
// =============================================================================

pub async fn test_batch_is_atomic<S: DocumentStore>(store: &S) {
    let coll = collection("atomic");
    store
        .commit(batch(vec![WriteOp::set(coll.doc("a"), body(json!({"xp": 1})))]))
        .await
        .unwrap();

    let err = store
        .commit(batch(vec![
            WriteOp::update(coll.doc("a"), vec![("xp".to_string(), FieldOp::Increment(10))]),
            WriteOp::create(coll.doc("b"), body(json!({}))),
            WriteOp::update(coll.doc("ghost"), vec![("xp".to_string(), FieldOp::Increment(1))]),
        ]))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }), "got {:?}", err);

    assert_eq!(store.get(&coll.doc("a")).await.unwrap().unwrap().data["xp"], json!(1));
    assert!(store.get(&coll.doc("b")).await.unwrap().is_none());
}

pub async fn test_later_ops_see_earlier_ones<S: DocumentStore>(store: &S) {
    let path = collection("in_batch").doc("a");
    store
        .commit(batch(vec![
            WriteOp::create(path.clone(), body(json!({"xp": 1}))),
            WriteOp::update(path.clone(), vec![("xp".to_string(), FieldOp::Increment(2))]),
        ]))
        .await
        .expect("update after create in one batch should succeed");
    assert_eq!(store.get(&path).await.unwrap().unwrap().data["xp"], json!(3));
}

pub async fn test_version_precondition<S: DocumentStore>(store: &S) {
    let path = collection("version_pre").doc("a");
    let created = store
        .commit(batch(vec![WriteOp::set(path.clone(), body(json!({"n": 1})))]))
        .await
        .unwrap();

    store
        .commit(batch(vec![WriteOp::set(path.clone(), body(json!({"n": 2})))
            .with_precondition(Precondition::Version(created.version))]))
        .await
        .expect("matching version should succeed");

    let err = store
        .commit(batch(vec![WriteOp::set(path.clone(), body(json!({"n": 3})))
            .with_precondition(Precondition::Version(created.version))]))
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "stale version should conflict, got {:?}", err);
    assert_eq!(store.get(&path).await.unwrap().unwrap().data["n"], json!(2));
}

pub async fn test_batch_size_limit<S: DocumentStore>(store: &S) {
    let coll = collection("too_large");
    let ops: Vec<WriteOp> = (0..=MAX_BATCH_WRITES)
        .map(|i| WriteOp::set(coll.doc(format!("d{:04}", i)), body(json!({}))))
        .collect();

    let err = store.commit(batch(ops)).await.unwrap_err();
    assert!(
        matches!(err, StorageError::BatchTooLarge { size, limit } if size == MAX_BATCH_WRITES + 1 && limit == MAX_BATCH_WRITES),
        "got {:?}",
        err
    );
    assert!(store.list(&coll).await.unwrap().is_empty());

    let ops: Vec<WriteOp> = (0..MAX_BATCH_WRITES)
        .map(|i| WriteOp::set(coll.doc(format!("d{:04}", i)), body(json!({}))))
        .collect();
    store
        .commit(batch(ops))
        .await
        .expect("batch at the limit should succeed");
    assert_eq!(store.list(&coll).await.unwrap().len(), MAX_BATCH_WRITES);
}

// =============================================================================
// Transactions and change notices
// =============================================================================

pub async fn test_transaction_detects_stale_read<S: DocumentStore>(store: &S) {
    let path = collection("tx_stale").doc("a");
    store
        .commit(batch(vec![WriteOp::set(path.clone(), body(json!({"money": 100})))]))
        .await
        .unwrap();

    let mut tx = Transaction::new(store);
    let seen = tx.get(&path).await.unwrap().expect("document should exist");
    assert_eq!(seen.data["money"], json!(100));

    // A concurrent writer lands between the read and the commit.
    store
        .commit(batch(vec![WriteOp::update(
            path.clone(),
            vec![("money".to_string(), FieldOp::Increment(-50))],
        )]))
        .await
        .unwrap();

    tx.write(WriteOp::update(
        path.clone(),
        vec![("money".to_string(), FieldOp::Set(json!(0)))],
    ));
    let err = tx.commit().await.unwrap_err();
    assert!(err.is_conflict(), "stale read should conflict, got {:?}", err);
    assert_eq!(store.get(&path).await.unwrap().unwrap().data["money"], json!(50));
}

pub async fn test_transaction_missing_read_conflicts_on_create<S: DocumentStore>(store: &S) {
    let path = collection("tx_missing").doc("a");

    let mut tx = Transaction::new(store);
    assert!(tx.get(&path).await.unwrap().is_none());

    store
        .commit(batch(vec![WriteOp::set(path.clone(), body(json!({"n": 1})))]))
        .await
        .unwrap();

    tx.write(WriteOp::set(path.clone(), body(json!({"n": 2}))));
    let err = tx.commit().await.unwrap_err();
    assert!(err.is_conflict(), "document appearing should conflict, got {:?}", err);
}

pub async fn test_change_notices<S: DocumentStore>(store: &S) {
    let first = collection("notices_a");
    let second = collection("notices_b");
    let mut changes = store.changes();

    let result = store
        .commit(batch(vec![
            WriteOp::set(first.doc("x"), body(json!({}))),
            WriteOp::set(first.doc("y"), body(json!({}))),
            WriteOp::set(second.doc("z"), body(json!({}))),
        ]))
        .await
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..2 {
        let notice = changes.recv().await.expect("notice should arrive");
        assert_eq!(notice.version, result.version);
        seen.push(notice.collection);
    }
    seen.sort();
    assert_eq!(seen, vec![first, second], "one notice per touched collection");
    assert!(changes.try_recv().is_err(), "no extra notices");

    // Failed commits announce nothing.
    let _ = store
        .commit(batch(vec![WriteOp::update(
            collection("notices_a").doc("ghost"),
            vec![("n".to_string(), FieldOp::Increment(1))],
        )]))
        .await;
    assert!(changes.try_recv().is_err(), "failed commit should not notify");
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all DocumentStore interface tests against a store implementation.
#[macro_export]
macro_rules! run_document_store_tests {
    ($store:expr) => {
        use $crate::storage::document_store_tests::*;

        test_get_missing($store).await;
        println!("  test_get_missing: PASSED");

        test_create_and_get($store).await;
        println!("  test_create_and_get: PASSED");

        test_versions_increase($store).await;
        println!("  test_versions_increase: PASSED");

        test_create_existing_fails($store).await;
        println!("  test_create_existing_fails: PASSED");

        test_update_missing_fails($store).await;
        println!("  test_update_missing_fails: PASSED");

        test_delete_is_unconditional($store).await;
        println!("  test_delete_is_unconditional: PASSED");

        test_list_is_scoped_and_ordered($store).await;
        println!("  test_list_is_scoped_and_ordered: PASSED");

        test_increment_and_append($store).await;
        println!("  test_increment_and_append: PASSED");

        test_store_timestamp($store).await;
        println!("  test_store_timestamp: PASSED");

        test_invalid_increment_rejected($store).await;
        println!("  test_invalid_increment_rejected: PASSED");

        test_batch_is_atomic($store).await;
        println!("  test_batch_is_atomic: PASSED");

        test_later_ops_see_earlier_ones($store).await;
        println!("  test_later_ops_see_earlier_ones: PASSED");

        test_version_precondition($store).await;
        println!("  test_version_precondition: PASSED");

        test_batch_size_limit($store).await;
        println!("  test_batch_size_limit: PASSED");

        test_transaction_detects_stale_read($store).await;
        println!("  test_transaction_detects_stale_read: PASSED");

        test_transaction_missing_read_conflicts_on_create($store).await;
        println!("  test_transaction_missing_read_conflicts_on_create: PASSED");

        test_change_notices($store).await;
        println!("  test_change_notices: PASSED");
    };
}
