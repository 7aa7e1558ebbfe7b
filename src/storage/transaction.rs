//! Optimistic read-modify-write transactions.

use super::{
    encode, CommitResult, DocPath, Document, DocumentStore, Precondition, Result, StorageError,
    WriteBatch, WriteOp,
};
use crate::model::Entity;

/// Reads documents, buffers writes, and commits them only if nothing read
/// has changed in the meantime.
///
/// Every read records the version it observed. On commit each observation
/// becomes a verify operation at the head of the batch, so a concurrent
/// write to any of them fails the commit with [`StorageError::Conflict`].
/// Callers retry by running a fresh transaction.
pub struct Transaction<'a> {
    store: &'a dyn DocumentStore,
    reads: Vec<(DocPath, Option<u64>)>,
    writes: Vec<WriteOp>,
}

impl<'a> Transaction<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self {
            store,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub async fn get(&mut self, path: &DocPath) -> Result<Option<Document>> {
        let doc = self.store.get(path).await?;
        let observed = doc.as_ref().map(|d| d.version);

        match self.reads.iter().find(|(p, _)| p == path) {
            Some((_, earlier)) if *earlier != observed => {
                return Err(StorageError::Conflict {
                    path: path.clone(),
                    expected: *earlier,
                    actual: observed,
                });
            }
            Some(_) => {}
            None => self.reads.push((path.clone(), observed)),
        }
        Ok(doc)
    }

    pub async fn get_entity<T: Entity>(&mut self, path: &DocPath) -> Result<Option<T>> {
        match self.get(path).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    pub fn write(&mut self, op: WriteOp) -> &mut Self {
        self.writes.push(op);
        self
    }

    /// Buffer creation of a new record at `path`.
    pub fn create<T: Entity>(&mut self, path: DocPath, entity: &T) -> Result<&mut Self> {
        self.writes.push(WriteOp::create(path, encode(entity)?));
        Ok(self)
    }

    /// Operations the commit will submit, verifies first.
    pub fn into_batch(self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        batch.extend(self.reads.into_iter().map(|(path, version)| {
            let precondition = match version {
                Some(v) => Precondition::Version(v),
                None => Precondition::Missing,
            };
            WriteOp::verify(path, precondition)
        }));
        batch.extend(self.writes);
        batch
    }

    pub async fn commit(self) -> Result<CommitResult> {
        let store = self.store;
        store.commit(self.into_batch()).await
    }
}
