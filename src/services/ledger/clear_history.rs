//! Bulk reset of black marks and purchase history.

use serde_json::Value;
use tracing::{debug, info, warn};

use super::LedgerService;
use crate::auth::Claims;
use crate::model::{Entity, PurchaseRecord, Student};
use crate::services::error::{require_teacher, LedgerError, Result};
use crate::storage::{FieldOp, StorageError, WriteBatch, WriteOp};

/// Totals of a completed history reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClearHistoryReport {
    pub students_cleared: usize,
    pub records_deleted: usize,
    /// Batches committed for the black-mark reset.
    pub student_batches: usize,
    /// Batches committed for purchase record deletion.
    pub history_batches: usize,
}

impl ClearHistoryReport {
    pub fn total_batches(&self) -> usize {
        self.student_batches + self.history_batches
    }
}

impl LedgerService {
    /// Empty every student's black marks, then delete every purchase record.
    ///
    /// Runs as sequential batches of at most `limits.max_batch_writes`
    /// operations. A failed batch stops the run; batches committed before
    /// it stay committed and are reported in `PartialFailure`. Students
    /// deleted while the run is in progress are skipped.
    #[tracing::instrument(name = "ledger.clear_history", skip_all, fields(teacher = %claims.uid))]
    pub async fn clear_history(&self, claims: &Claims) -> Result<ClearHistoryReport> {
        require_teacher(claims, "clearing history")?;

        let students = self.store.list(&Student::collection(&claims.classroom)).await?;
        let records = self
            .store
            .list(&PurchaseRecord::collection(&claims.classroom))
            .await?;

        let reset_ops: Vec<WriteOp> = students
            .iter()
            .map(|doc| {
                WriteOp::update(
                    doc.path.clone(),
                    vec![(
                        Student::FIELD_BLACK_MARKS.to_string(),
                        FieldOp::Set(Value::Array(Vec::new())),
                    )],
                )
            })
            .collect();
        let delete_ops: Vec<WriteOp> = records
            .iter()
            .map(|doc| WriteOp::delete(doc.path.clone()))
            .collect();

        let mut report = ClearHistoryReport::default();
        let chunk_size = self.limits.max_batch_writes.max(1);

        for chunk in reset_ops.chunks(chunk_size) {
            let cleared = self.commit_resets(chunk, &report).await?;
            if cleared > 0 {
                report.students_cleared += cleared;
                report.student_batches += 1;
            }
        }
        for chunk in delete_ops.chunks(chunk_size) {
            self.commit_chunk(chunk, &report).await?;
            report.records_deleted += chunk.len();
            report.history_batches += 1;
        }

        info!(
            students = report.students_cleared,
            records = report.records_deleted,
            batches = report.total_batches(),
            "History cleared"
        );
        Ok(report)
    }

    /// Commit one chunk of black-mark resets, dropping students deleted
    /// since the roster was listed. Returns the number of students reset.
    async fn commit_resets(&self, chunk: &[WriteOp], progress: &ClearHistoryReport) -> Result<usize> {
        let mut ops = chunk.to_vec();
        loop {
            if ops.is_empty() {
                return Ok(0);
            }
            match self.store.commit(WriteBatch::from(ops.clone())).await {
                Ok(_) => return Ok(ops.len()),
                Err(StorageError::NotFound { path }) if ops.iter().any(|op| op.path == path) => {
                    debug!(student_id = %path.id, "Student removed during clear, skipping");
                    ops.retain(|op| op.path != path);
                }
                Err(source) => return Err(partial_failure(progress, source)),
            }
        }
    }

    async fn commit_chunk(&self, chunk: &[WriteOp], progress: &ClearHistoryReport) -> Result<()> {
        match self.store.commit(WriteBatch::from(chunk.to_vec())).await {
            Ok(_) => Ok(()),
            Err(source) => Err(partial_failure(progress, source)),
        }
    }
}

fn partial_failure(progress: &ClearHistoryReport, source: StorageError) -> LedgerError {
    warn!(
        completed_batches = progress.total_batches(),
        error = %source,
        "History clear stopped part-way"
    );
    LedgerError::PartialFailure {
        completed_batches: progress.total_batches(),
        records_deleted: progress.records_deleted,
        source,
    }
}
