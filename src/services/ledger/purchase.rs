//! Student purchases: one optimistic transaction per attempt.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::LedgerService;
use crate::auth::Claims;
use crate::model::{
    Classroom, ClassroomId, Entity, Money, Notification, NotificationType, PurchaseRecord, Student,
};
use crate::services::error::{require_student, LedgerError, Result};
use crate::storage::{encode, DocumentStore, FieldOp, Transaction, WriteOp};
use crate::utils::retry::{
    run_with_retry, transaction_backoff, RetryFailure, RetryOutcome, RetryableOperation,
};

/// Outcome of a committed purchase.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseReceipt {
    pub record_id: String,
    pub notification_id: String,
    pub new_balance: Money,
    pub committed_at: DateTime<Utc>,
    /// Attempts used, 1 when no conflict occurred.
    pub attempts: u32,
}

/// What the student is buying.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseRequest {
    pub student_id: String,
    pub item_id: String,
    pub item_name: String,
    pub price: Money,
}

/// Message delivered to the teacher for a purchase.
pub fn purchase_message(student_name: &str, item_name: &str, cost: Money) -> String {
    format!("{} purchased {} for ${}", student_name, item_name, cost)
}

/// State for a retryable purchase transaction.
struct PurchaseOperation {
    store: Arc<dyn DocumentStore>,
    classroom: ClassroomId,
    request: PurchaseRequest,
    attempts: u32,
}

impl PurchaseOperation {
    async fn attempt(&self) -> std::result::Result<PurchaseReceipt, LedgerError> {
        let request = &self.request;
        let student_path = Student::collection(&self.classroom).doc(&request.student_id);
        let classroom_path = Classroom::collection(&self.classroom).doc(self.classroom.as_str());

        let mut tx = Transaction::new(self.store.as_ref());

        let student: Student = tx
            .get_entity(&student_path)
            .await?
            .ok_or_else(|| LedgerError::not_found("Student", &request.student_id))?;
        let classroom: Classroom = tx
            .get_entity(&classroom_path)
            .await?
            .ok_or_else(|| LedgerError::not_found("Classroom", self.classroom.as_str()))?;

        if student.money < request.price {
            return Err(LedgerError::InsufficientFunds {
                balance: student.money,
                price: request.price,
            });
        }
        let new_balance = student
            .money
            .checked_sub(request.price)
            .ok_or_else(|| LedgerError::validation("Price out of range"))?;

        tx.write(WriteOp::update(
            student_path,
            vec![(
                Student::FIELD_MONEY.to_string(),
                FieldOp::Set(Value::from(new_balance.cents())),
            )],
        ));

        let record_id = Uuid::new_v4().to_string();
        let record = PurchaseRecord {
            id: record_id.clone(),
            student_id: request.student_id.clone(),
            student_name: student.name.clone(),
            item_id: request.item_id.clone(),
            item_name: request.item_name.clone(),
            cost: request.price,
            timestamp: Utc::now(),
        };
        tx.write(
            WriteOp::create(
                PurchaseRecord::collection(&self.classroom).doc(&record_id),
                encode(&record)?,
            )
            .with_transform(PurchaseRecord::FIELD_TIMESTAMP, FieldOp::StoreTimestamp),
        );

        let notification_id = Uuid::new_v4().to_string();
        let notification = Notification::unread(
            classroom.teacher_id,
            NotificationType::Purchase,
            purchase_message(&student.name, &request.item_name, request.price),
        );
        tx.write(
            WriteOp::create(
                Notification::collection(&self.classroom).doc(&notification_id),
                encode(&notification)?,
            )
            .with_transform(Notification::FIELD_TIMESTAMP, FieldOp::StoreTimestamp),
        );

        let commit = tx.commit().await?;

        Ok(PurchaseReceipt {
            record_id,
            notification_id,
            new_balance,
            committed_at: commit.commit_time,
            attempts: self.attempts,
        })
    }
}

#[async_trait]
impl RetryableOperation for PurchaseOperation {
    type Success = PurchaseReceipt;
    type Failure = LedgerError;

    fn name(&self) -> &str {
        "purchase"
    }

    async fn try_execute(&mut self) -> RetryOutcome<Self::Success, Self::Failure> {
        self.attempts += 1;
        match self.attempt().await {
            Ok(receipt) => RetryOutcome::Success(receipt),
            Err(LedgerError::Storage(e)) if e.is_conflict() => {
                RetryOutcome::Retryable(LedgerError::Storage(e))
            }
            Err(e) => RetryOutcome::Fatal(e),
        }
    }
}

impl LedgerService {
    /// Buy an item from the caller's own balance.
    ///
    /// Reads the student and classroom, checks funds, then commits the
    /// balance change, purchase record and teacher notification together.
    /// Lost version races are retried with fresh reads.
    #[tracing::instrument(
        name = "ledger.purchase",
        skip_all,
        fields(student_id = %request.student_id, item_id = %request.item_id, price = %request.price)
    )]
    pub async fn purchase(&self, claims: &Claims, request: PurchaseRequest) -> Result<PurchaseReceipt> {
        require_student(claims, "purchasing")?;
        if claims.uid != request.student_id {
            return Err(LedgerError::PermissionDenied(
                "students may only purchase for their own account".to_string(),
            ));
        }
        if request.price.is_negative() {
            return Err(LedgerError::validation("Price cannot be negative"));
        }
        if request.item_name.trim().is_empty() {
            return Err(LedgerError::validation("Item name is required"));
        }

        let operation = PurchaseOperation {
            store: self.store.clone(),
            classroom: claims.classroom.clone(),
            request,
            attempts: 0,
        };

        match run_with_retry(operation, transaction_backoff(&self.limits)).await {
            Ok(receipt) => {
                info!(
                    record_id = %receipt.record_id,
                    new_balance = %receipt.new_balance,
                    attempts = receipt.attempts,
                    "Purchase committed"
                );
                Ok(receipt)
            }
            Err(RetryFailure::Fatal(e)) => {
                warn!(error = %e, "Purchase rejected");
                Err(e)
            }
            Err(RetryFailure::Exhausted { attempts, last }) => Err(match last {
                LedgerError::Storage(source) => LedgerError::Transient { attempts, source },
                other => other,
            }),
        }
    }
}

