//! In-memory document store.
//!
//! Used for development and tests. Carries fault-injection hooks so tests
//! can exercise conflict retries and partial batch failures.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::helpers::{apply_batch, touched_collections, touched_paths, validate_batch, LoadedDocuments};
use super::{
    ChangeNotice, CollectionPath, CommitResult, DocPath, Document, DocumentStore, Result,
    StorageError, WriteBatch, CHANGE_CHANNEL_CAPACITY,
};

#[derive(Default)]
struct MemoryState {
    collections: BTreeMap<CollectionPath, BTreeMap<String, Document>>,
    version: u64,
    commits: u64,
}

impl MemoryState {
    fn get(&self, path: &DocPath) -> Option<&Document> {
        self.collections
            .get(&path.collection)
            .and_then(|docs| docs.get(&path.id))
    }
}

#[derive(Default)]
struct FaultPlan {
    fail_on_commit: bool,
    fail_on_get: bool,
    /// Commit attempts left before one is failed; `Some(1)` fails the next.
    fail_commit_in: Option<u64>,
    conflicts_remaining: u32,
    failing_paths: HashSet<DocPath>,
}

/// Document store held in process memory.
pub struct MemoryDocumentStore {
    state: RwLock<MemoryState>,
    faults: RwLock<FaultPlan>,
    changes: broadcast::Sender<ChangeNotice>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(MemoryState::default()),
            faults: RwLock::new(FaultPlan::default()),
            changes,
        }
    }

    /// Fail every commit with `Unavailable` while set.
    pub async fn set_fail_on_commit(&self, fail: bool) {
        self.faults.write().await.fail_on_commit = fail;
    }

    /// Fail every read with `Unavailable` while set.
    pub async fn set_fail_on_get(&self, fail: bool) {
        self.faults.write().await.fail_on_get = fail;
    }

    /// Fail the `n`th commit attempt from now (1 = the next one).
    pub async fn fail_nth_commit(&self, n: u64) {
        self.faults.write().await.fail_commit_in = Some(n.max(1));
    }

    /// Reject the next `n` commits with a version conflict.
    pub async fn inject_conflicts(&self, n: u32) {
        self.faults.write().await.conflicts_remaining = n;
    }

    /// Fail any commit that writes to `path`.
    pub async fn fail_writes_to(&self, path: DocPath) {
        self.faults.write().await.failing_paths.insert(path);
    }

    pub async fn clear_faults(&self) {
        *self.faults.write().await = FaultPlan::default();
    }

    /// Number of commits applied so far.
    pub async fn commit_count(&self) -> u64 {
        self.state.read().await.commits
    }

    /// Live change subscribers, including idle receivers.
    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    /// Number of documents in a collection.
    pub async fn count(&self, collection: &CollectionPath) -> usize {
        self.state
            .read()
            .await
            .collections
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    /// Consume the fault plan for one commit attempt.
    async fn injected_failure(&self, batch: &WriteBatch) -> Option<StorageError> {
        let mut faults = self.faults.write().await;

        if faults.fail_on_commit {
            return Some(StorageError::Unavailable("injected commit failure".to_string()));
        }

        if let Some(remaining) = faults.fail_commit_in {
            if remaining <= 1 {
                faults.fail_commit_in = None;
                return Some(StorageError::Unavailable("injected commit failure".to_string()));
            }
            faults.fail_commit_in = Some(remaining - 1);
        }

        if faults.conflicts_remaining > 0 {
            faults.conflicts_remaining -= 1;
            if let Some(op) = batch.ops().first() {
                return Some(StorageError::Conflict {
                    path: op.path.clone(),
                    expected: None,
                    actual: None,
                });
            }
        }

        batch
            .ops()
            .iter()
            .find(|op| op.is_write() && faults.failing_paths.contains(&op.path))
            .map(|op| StorageError::Unavailable(format!("injected write failure on {}", op.path)))
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>> {
        if self.faults.read().await.fail_on_get {
            return Err(StorageError::Unavailable("injected read failure".to_string()));
        }
        Ok(self.state.read().await.get(path).cloned())
    }

    async fn list(&self, collection: &CollectionPath) -> Result<Vec<Document>> {
        if self.faults.read().await.fail_on_get {
            return Err(StorageError::Unavailable("injected read failure".to_string()));
        }
        Ok(self
            .state
            .read()
            .await
            .collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitResult> {
        validate_batch(&batch)?;
        if let Some(err) = self.injected_failure(&batch).await {
            return Err(err);
        }

        let mut state = self.state.write().await;

        let loaded: LoadedDocuments = touched_paths(&batch)
            .into_iter()
            .map(|path| {
                let doc = state.get(&path).cloned();
                (path, doc)
            })
            .collect();

        let version = state.version + 1;
        let commit_time = Utc::now();
        let writes = apply_batch(&batch, loaded, version, commit_time)?;
        let collections = touched_collections(&writes);
        let write_count = writes.len();

        for (path, doc) in writes {
            match doc {
                Some(doc) => {
                    state
                        .collections
                        .entry(path.collection)
                        .or_default()
                        .insert(path.id, doc);
                }
                None => {
                    if let Some(docs) = state.collections.get_mut(&path.collection) {
                        docs.remove(&path.id);
                    }
                }
            }
        }
        state.version = version;
        state.commits += 1;
        drop(state);

        debug!(version, writes = write_count, "Batch committed");
        for collection in collections {
            // Err only means there are no subscribers.
            let _ = self.changes.send(ChangeNotice { collection, version });
        }

        Ok(CommitResult {
            version,
            commit_time,
            writes: write_count,
        })
    }

    fn changes(&self) -> broadcast::Receiver<ChangeNotice> {
        self.changes.subscribe()
    }
}
