//! Document storage.
//!
//! Records live as JSON documents grouped into collections. A store commits
//! write batches atomically and announces every commit on a broadcast
//! channel so live queries can refresh.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::model::Entity;

mod document;
pub mod helpers;
pub mod live_query;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;
mod transaction;

pub use document::{
    encode, format_store_time, ChangeNotice, CollectionPath, CommitResult, DocPath, Document,
    FieldOp, Mutation, Precondition, WriteBatch, WriteOp, MAX_BATCH_WRITES,
};
pub use live_query::{LiveQuery, Query};
pub use memory::MemoryDocumentStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDocumentStore;
pub use transaction::Transaction;

/// Capacity of each store's change channel.
pub const CHANGE_CHANNEL_CAPACITY: usize = 1024;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Document not found: {path}")]
    NotFound { path: DocPath },

    #[error("Document already exists: {path}")]
    AlreadyExists { path: DocPath },

    #[error("Version conflict on {path}: expected {expected:?}, found {actual:?}")]
    Conflict {
        path: DocPath,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("Batch of {size} operations exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("Cannot apply {op} to field '{field}' of {path}: {reason}")]
    InvalidTransform {
        path: DocPath,
        field: String,
        op: &'static str,
        reason: String,
    },

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Whether retrying the same read-modify-write may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

/// Interface for document persistence.
///
/// Implementations:
/// - `MemoryDocumentStore`: in-process maps, with fault injection for tests
/// - `SqliteDocumentStore`: single-table SQLite storage
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document.
    async fn get(&self, path: &DocPath) -> Result<Option<Document>>;

    /// Read every document in a collection, ordered by id.
    async fn list(&self, collection: &CollectionPath) -> Result<Vec<Document>>;

    /// Apply every operation in the batch, or none of them.
    ///
    /// Operations apply in order; later operations see the effects of
    /// earlier ones on the same document. Every written document receives
    /// the commit's version.
    async fn commit(&self, batch: WriteBatch) -> Result<CommitResult>;

    /// Subscribe to commit notices.
    fn changes(&self) -> broadcast::Receiver<ChangeNotice>;
}

/// Read one document and decode it as a record.
pub async fn fetch<T: Entity>(store: &dyn DocumentStore, path: &DocPath) -> Result<Option<T>> {
    match store.get(path).await? {
        Some(doc) => Ok(Some(doc.decode()?)),
        None => Ok(None),
    }
}

/// Read and decode every record in a collection.
pub async fn fetch_all<T: Entity>(
    store: &dyn DocumentStore,
    collection: &CollectionPath,
) -> Result<Vec<T>> {
    store
        .list(collection)
        .await?
        .iter()
        .map(Document::decode)
        .collect()
}

/// Initialize storage based on configuration.
pub async fn init_storage(
    config: &StorageConfig,
) -> std::result::Result<Arc<dyn DocumentStore>, Box<dyn std::error::Error + Send + Sync>> {
    match config.storage_type {
        StorageType::Memory => {
            info!(storage = "memory", "Storage initialized");
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            let path = &config.sqlite.path;
            info!(storage = "sqlite", %path, "Storage initialized");
            let store = SqliteDocumentStore::open(path).await?;
            store.init().await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err("SQLite feature not enabled".into())
        }
    }
}
