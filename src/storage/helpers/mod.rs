//! Shared storage helper functions.
//!
//! Batch application logic used by every backend: a backend loads the
//! current state of each touched document, hands it to [`apply_batch`],
//! and persists the resulting states if no operation failed.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{
    format_store_time, CollectionPath, DocPath, Document, FieldOp, Mutation, Precondition,
    Result, StorageError, WriteBatch, MAX_BATCH_WRITES,
};

/// Current state of each document a batch touches. `None` means absent.
pub type LoadedDocuments = HashMap<DocPath, Option<Document>>;

/// Final state of one written document. `None` means deleted.
pub type StagedWrite = (DocPath, Option<Document>);

/// Reject batches over the commit size limit.
pub fn validate_batch(batch: &WriteBatch) -> Result<()> {
    if batch.len() > MAX_BATCH_WRITES {
        return Err(StorageError::BatchTooLarge {
            size: batch.len(),
            limit: MAX_BATCH_WRITES,
        });
    }
    Ok(())
}

/// Distinct document paths referenced by a batch, in first-use order.
pub fn touched_paths(batch: &WriteBatch) -> Vec<DocPath> {
    let mut seen = BTreeSet::new();
    batch
        .ops()
        .iter()
        .filter(|op| seen.insert(op.path.clone()))
        .map(|op| op.path.clone())
        .collect()
}

/// Distinct collections of a set of staged writes, sorted.
pub fn touched_collections(writes: &[StagedWrite]) -> Vec<CollectionPath> {
    writes
        .iter()
        .map(|(path, _)| path.collection.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Check a write precondition against the document's current state.
pub fn check_precondition(
    path: &DocPath,
    current: Option<&Document>,
    precondition: Precondition,
) -> Result<()> {
    match (precondition, current) {
        (Precondition::None, _) => Ok(()),
        (Precondition::Exists, Some(_)) => Ok(()),
        (Precondition::Exists, None) => Err(StorageError::NotFound { path: path.clone() }),
        (Precondition::Missing, None) => Ok(()),
        (Precondition::Missing, Some(_)) => Err(StorageError::AlreadyExists { path: path.clone() }),
        (Precondition::Version(expected), doc) => {
            let actual = doc.map(|d| d.version);
            if actual == Some(expected) {
                Ok(())
            } else {
                Err(StorageError::Conflict {
                    path: path.clone(),
                    expected: Some(expected),
                    actual,
                })
            }
        }
    }
}

/// Check that a previously read snapshot is still current.
///
/// Any mismatch, including a document appearing or disappearing, is a
/// conflict rather than a not-found or already-exists error.
fn verify_snapshot(path: &DocPath, current: Option<&Document>, precondition: Precondition) -> Result<()> {
    let expected = match precondition {
        Precondition::Version(v) => Some(v),
        Precondition::Missing => None,
        other => return check_precondition(path, current, other),
    };
    let actual = current.map(|d| d.version);
    if expected == actual {
        Ok(())
    } else {
        Err(StorageError::Conflict {
            path: path.clone(),
            expected,
            actual,
        })
    }
}

/// Apply a batch to loaded document states.
///
/// Returns the final state of every written document, in first-write
/// order. Fails without side effects if any operation fails.
pub fn apply_batch(
    batch: &WriteBatch,
    mut current: LoadedDocuments,
    version: u64,
    commit_time: DateTime<Utc>,
) -> Result<Vec<StagedWrite>> {
    let mut dirty: Vec<DocPath> = Vec::new();

    for op in batch.ops() {
        let existing = current.get(&op.path).cloned().flatten();

        let data = match &op.mutation {
            Mutation::Verify => {
                verify_snapshot(&op.path, existing.as_ref(), op.precondition)?;
                continue;
            }
            Mutation::Delete => {
                check_precondition(&op.path, existing.as_ref(), op.precondition)?;
                None
            }
            Mutation::Set { data, transforms } => {
                check_precondition(&op.path, existing.as_ref(), op.precondition)?;
                let mut body = data.clone();
                apply_fields(&op.path, &mut body, transforms, commit_time)?;
                Some(body)
            }
            Mutation::Update { fields } => {
                check_precondition(&op.path, existing.as_ref(), op.precondition)?;
                let doc = existing.ok_or_else(|| StorageError::NotFound {
                    path: op.path.clone(),
                })?;
                let mut body = doc.data;
                apply_fields(&op.path, &mut body, fields, commit_time)?;
                Some(body)
            }
        };

        let next = data.map(|data| Document {
            path: op.path.clone(),
            version,
            update_time: commit_time,
            data,
        });
        current.insert(op.path.clone(), next);
        if !dirty.contains(&op.path) {
            dirty.push(op.path.clone());
        }
    }

    Ok(dirty
        .into_iter()
        .map(|path| {
            let doc = current.remove(&path).flatten();
            (path, doc)
        })
        .collect())
}

fn apply_fields(
    path: &DocPath,
    body: &mut Map<String, Value>,
    fields: &[(String, FieldOp)],
    commit_time: DateTime<Utc>,
) -> Result<()> {
    for (field, op) in fields {
        apply_field(path, body, field, op, commit_time)?;
    }
    Ok(())
}

fn apply_field(
    path: &DocPath,
    body: &mut Map<String, Value>,
    field: &str,
    op: &FieldOp,
    commit_time: DateTime<Utc>,
) -> Result<()> {
    let invalid = |op: &'static str, reason: String| StorageError::InvalidTransform {
        path: path.clone(),
        field: field.to_string(),
        op,
        reason,
    };

    match op {
        FieldOp::Set(value) => {
            body.insert(field.to_string(), value.clone());
        }
        FieldOp::Increment(delta) => {
            let base = match body.get(field) {
                None | Some(Value::Null) => 0,
                Some(Value::Number(n)) => n
                    .as_i64()
                    .ok_or_else(|| invalid("increment", format!("{} is not an integer", n)))?,
                Some(other) => {
                    return Err(invalid("increment", format!("{} is not a number", other)));
                }
            };
            let sum = base
                .checked_add(*delta)
                .ok_or_else(|| invalid("increment", "integer overflow".to_string()))?;
            body.insert(field.to_string(), Value::from(sum));
        }
        FieldOp::Append(value) => match body.get_mut(field) {
            None | Some(Value::Null) => {
                body.insert(field.to_string(), Value::Array(vec![value.clone()]));
            }
            Some(Value::Array(items)) => items.push(value.clone()),
            Some(other) => {
                return Err(invalid("append", format!("{} is not an array", other)));
            }
        },
        FieldOp::StoreTimestamp => {
            body.insert(field.to_string(), Value::String(format_store_time(commit_time)));
        }
    }
    Ok(())
}
