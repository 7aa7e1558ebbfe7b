//! Document, path and write-batch types shared by all store backends.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use super::{Result, StorageError};
use crate::model::Entity;

/// Maximum operations accepted in one atomic commit.
pub const MAX_BATCH_WRITES: usize = 500;

/// Slash-separated collection path, e.g. `classroom-rewards/main-class/shop`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn doc(&self, id: impl Into<String>) -> DocPath {
        DocPath {
            collection: self.clone(),
            id: id.into(),
        }
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Full key of one document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath {
    pub collection: CollectionPath,
    pub id: String,
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A stored document.
///
/// `version` is a store-wide commit counter: every document written by a
/// commit receives that commit's version, so a version never repeats even
/// across delete and re-create.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocPath,
    pub version: u64,
    pub update_time: DateTime<Utc>,
    pub data: Map<String, Value>,
}

impl Document {
    pub fn id(&self) -> &str {
        &self.path.id
    }

    /// Deserialize into a record, filling its id from the document key.
    pub fn decode<T: Entity>(&self) -> Result<T> {
        let mut entity: T = serde_json::from_value(Value::Object(self.data.clone()))?;
        entity.set_id(self.path.id.clone());
        Ok(entity)
    }
}

/// Serialize a record into a document body.
pub fn encode<T: Entity>(entity: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        other => Err(StorageError::InvalidDocument(format!(
            "expected an object body, got {}",
            other
        ))),
    }
}

/// Format a commit time the way timestamp fields are stored.
pub fn format_store_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Operation on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(Value),
    /// Add to an integer field. A missing field counts as zero.
    Increment(i64),
    /// Push onto an array field. A missing field counts as empty.
    Append(Value),
    /// Replaced with the commit time when the batch is applied.
    StoreTimestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Replace the whole body, then apply `transforms`.
    Set {
        data: Map<String, Value>,
        transforms: Vec<(String, FieldOp)>,
    },
    /// Apply field operations to an existing document.
    Update { fields: Vec<(String, FieldOp)> },
    Delete,
    /// Check the precondition without writing.
    Verify,
}

/// Condition a document must meet for the batch to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    None,
    Exists,
    Missing,
    /// Document exists with exactly this version.
    Version(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub path: DocPath,
    pub mutation: Mutation,
    pub precondition: Precondition,
}

impl WriteOp {
    /// Replace or create a document.
    pub fn set(path: DocPath, data: Map<String, Value>) -> Self {
        Self {
            path,
            mutation: Mutation::Set {
                data,
                transforms: Vec::new(),
            },
            precondition: Precondition::None,
        }
    }

    /// Create a document that must not exist yet.
    pub fn create(path: DocPath, data: Map<String, Value>) -> Self {
        Self::set(path, data).with_precondition(Precondition::Missing)
    }

    /// Update fields of an existing document.
    pub fn update(path: DocPath, fields: Vec<(String, FieldOp)>) -> Self {
        Self {
            path,
            mutation: Mutation::Update { fields },
            precondition: Precondition::Exists,
        }
    }

    pub fn delete(path: DocPath) -> Self {
        Self {
            path,
            mutation: Mutation::Delete,
            precondition: Precondition::None,
        }
    }

    pub fn verify(path: DocPath, precondition: Precondition) -> Self {
        Self {
            path,
            mutation: Mutation::Verify,
            precondition,
        }
    }

    pub fn with_precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = precondition;
        self
    }

    /// Add a field transform to a `Set` mutation. Ignored for other kinds.
    pub fn with_transform(mut self, field: impl Into<String>, op: FieldOp) -> Self {
        if let Mutation::Set { transforms, .. } = &mut self.mutation {
            transforms.push((field.into(), op));
        }
        self
    }

    pub fn is_write(&self) -> bool {
        !matches!(self.mutation, Mutation::Verify)
    }
}

/// Ordered set of operations committed atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn extend(&mut self, ops: impl IntoIterator<Item = WriteOp>) -> &mut Self {
        self.ops.extend(ops);
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

impl From<Vec<WriteOp>> for WriteBatch {
    fn from(ops: Vec<WriteOp>) -> Self {
        Self { ops }
    }
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitResult {
    pub version: u64,
    pub commit_time: DateTime<Utc>,
    /// Documents written or deleted (verify-only ops excluded).
    pub writes: usize,
}

/// Published after every commit, once per touched collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub collection: CollectionPath,
    pub version: u64,
}
