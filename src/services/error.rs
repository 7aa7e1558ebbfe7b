//! Errors returned by ledger, catalog and notification operations.

use crate::auth::{AuthError, Claims, Role};
use crate::model::Money;
use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient funds: balance {balance}, price {price}")]
    InsufficientFunds { balance: Money, price: Money },

    #[error("Gave up after {attempts} attempts due to concurrent updates: {source}")]
    Transient {
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Stopped after {completed_batches} committed batches ({records_deleted} records deleted): {source}")]
    PartialFailure {
        completed_batches: usize,
        records_deleted: usize,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        LedgerError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Map a storage error, reporting a missing document as `kind`.
    pub fn from_storage(kind: &'static str, err: StorageError) -> Self {
        match err {
            StorageError::NotFound { path } => LedgerError::not_found(kind, path.id),
            other => LedgerError::Storage(other),
        }
    }
}

/// Reject callers without the teacher role.
pub fn require_teacher(claims: &Claims, action: &str) -> Result<()> {
    require_role(claims, Role::Teacher, action)
}

/// Reject callers without the student role.
pub fn require_student(claims: &Claims, action: &str) -> Result<()> {
    require_role(claims, Role::Student, action)
}

fn require_role(claims: &Claims, role: Role, action: &str) -> Result<()> {
    if claims.role == role {
        Ok(())
    } else {
        Err(LedgerError::PermissionDenied(format!(
            "{} requires the {} role",
            action, role
        )))
    }
}
