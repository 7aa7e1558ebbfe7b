//! SQLite storage integration tests.
//!
//! Run with: cargo test --test storage_sqlite --features sqlite
//!
//! Runs against a private in-memory database and against a temporary file,
//! no external dependencies required.

mod storage;

use classroom_ledger::storage::{
    CollectionPath, DocumentStore, SqliteDocumentStore, WriteBatch, WriteOp,
};
use serde_json::json;

async fn open(path: &str) -> SqliteDocumentStore {
    let store = SqliteDocumentStore::open(path)
        .await
        .expect("Failed to open SQLite");
    store.init().await.expect("Failed to create schema");
    store
}

#[tokio::test]
async fn test_sqlite_document_store_in_memory() {
    println!("=== SQLite DocumentStore Tests (memory) ===");

    let store = open(":memory:").await;
    run_document_store_tests!(&store);

    println!("=== All SQLite DocumentStore tests PASSED ===");
}

#[tokio::test]
async fn test_sqlite_document_store_file() {
    println!("=== SQLite DocumentStore Tests (file) ===");

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("ledger.db");
    let store = open(path.to_str().expect("utf-8 temp path")).await;
    run_document_store_tests!(&store);

    println!("=== All SQLite DocumentStore tests PASSED ===");
}

#[tokio::test]
async fn test_sqlite_survives_reopen() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("nested").join("ledger.db");
    let path = path.to_str().expect("utf-8 temp path").to_string();
    let students = CollectionPath::new("classroom-rewards/main-class/students");

    let version = {
        let store = open(&path).await;
        store
            .commit(WriteBatch::from(vec![WriteOp::create(
                students.doc("ada"),
                json!({"name": "Ada", "xp": 120})
                    .as_object()
                    .cloned()
                    .expect("object"),
            )]))
            .await
            .expect("commit should succeed")
            .version
    };

    let store = open(&path).await;
    let doc = store
        .get(&students.doc("ada"))
        .await
        .expect("get should succeed")
        .expect("document should persist");
    assert_eq!(doc.data["xp"], json!(120));
    assert_eq!(doc.version, version);

    // The store-wide version continues after a reopen.
    let next = store
        .commit(WriteBatch::from(vec![WriteOp::delete(students.doc("ada"))]))
        .await
        .expect("commit should succeed");
    assert!(next.version > version);
}
