//! Student balances: awards, adjustments, purchases and discipline.
//!
//! Every write goes through one atomic batch or one optimistic
//! transaction, so a student's balances and the records describing how
//! they changed never diverge.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::{AuthService, Claims, Role};
use crate::config::LedgerLimits;
use crate::model::{
    rank_students, AwardRecord, BlackMark, ClassroomId, Entity, Notification, NotificationType,
    PurchaseRecord, RankingCriteria, RankingEntry, Student, CENTS_PER_UNIT,
};
use crate::services::error::{require_teacher, LedgerError, Result};
use crate::storage::{
    encode, fetch, fetch_all, DocumentStore, FieldOp, LiveQuery, Query,
    StorageError, WriteBatch, WriteOp,
};

mod adjustment;
mod clear_history;
mod purchase;

pub use adjustment::StudentAdjustment;
pub use clear_history::ClearHistoryReport;
pub use purchase::{purchase_message, PurchaseReceipt, PurchaseRequest};

/// Message delivered to a student who receives a black mark.
pub fn black_mark_message(mark_type: &str) -> String {
    format!("You received a black mark: {}", mark_type)
}

/// Resolves student records by id for bulk operations.
#[async_trait]
pub trait StudentLookup: Send + Sync {
    async fn find_student(
        &self,
        classroom: &ClassroomId,
        student_id: &str,
    ) -> std::result::Result<Option<Student>, StorageError>;
}

/// Lookup that reads straight from the store.
pub struct StoreLookup<'a>(pub &'a dyn DocumentStore);

#[async_trait]
impl<'a> StudentLookup for StoreLookup<'a> {
    async fn find_student(
        &self,
        classroom: &ClassroomId,
        student_id: &str,
    ) -> std::result::Result<Option<Student>, StorageError> {
        fetch(self.0, &Student::collection(classroom).doc(student_id)).await
    }
}

#[derive(Debug)]
pub struct AwardFailure {
    pub student_id: String,
    pub error: LedgerError,
}

/// Per-student outcome of a bulk award.
#[derive(Debug)]
pub struct AwardReport {
    pub amount: i64,
    pub awarded: Vec<String>,
    /// Ids with no known student record; nothing was written for them.
    pub skipped: Vec<String>,
    pub failures: Vec<AwardFailure>,
}

impl AwardReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.failures.is_empty()
    }
}

/// Result of issuing a black mark.
#[derive(Debug, Clone, PartialEq)]
pub struct BlackMarkReport {
    pub mark_type: String,
    pub students: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Balance operations for one store.
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn DocumentStore>,
    limits: LedgerLimits,
}

/// Ids in first-seen order with duplicates removed.
fn distinct(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

impl LedgerService {
    pub fn new(store: Arc<dyn DocumentStore>, limits: LedgerLimits) -> Self {
        Self { store, limits }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn limits(&self) -> &LedgerLimits {
        &self.limits
    }

    /// Award `amount` XP and `amount` money units to each student.
    pub async fn award_points(
        &self,
        claims: &Claims,
        student_ids: &[String],
        amount: i64,
    ) -> Result<AwardReport> {
        self.award_points_with(claims, student_ids, amount, &StoreLookup(self.store.as_ref()))
            .await
    }

    /// Award points, resolving student records through `lookup`.
    ///
    /// Each student gets an independent batch: the balance increment plus an
    /// award record. One student's failure never affects the others.
    #[tracing::instrument(
        name = "ledger.award_points",
        skip_all,
        fields(teacher = %claims.uid, amount = amount, students = student_ids.len())
    )]
    pub async fn award_points_with(
        &self,
        claims: &Claims,
        student_ids: &[String],
        amount: i64,
        lookup: &dyn StudentLookup,
    ) -> Result<AwardReport> {
        require_teacher(claims, "awarding points")?;
        if amount <= 0 {
            return Err(LedgerError::validation("Award amount must be a positive number"));
        }
        let cents = amount
            .checked_mul(CENTS_PER_UNIT)
            .ok_or_else(|| LedgerError::validation("Award amount is too large"))?;
        let targets = distinct(student_ids);
        if targets.is_empty() {
            return Err(LedgerError::validation("Select at least one student"));
        }

        let mut report = AwardReport {
            amount,
            awarded: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        };

        for student_id in targets {
            let student = match lookup.find_student(&claims.classroom, &student_id).await {
                Ok(Some(student)) => student,
                Ok(None) => {
                    debug!(%student_id, "Skipping unknown student");
                    report.skipped.push(student_id);
                    continue;
                }
                Err(e) => {
                    warn!(%student_id, error = %e, "Student lookup failed");
                    report.failures.push(AwardFailure {
                        student_id,
                        error: e.into(),
                    });
                    continue;
                }
            };

            match self.award_one(claims, &student, amount, cents).await {
                Ok(()) => report.awarded.push(student_id),
                Err(error) => {
                    warn!(%student_id, %error, "Award failed");
                    report.failures.push(AwardFailure { student_id, error });
                }
            }
        }

        info!(
            awarded = report.awarded.len(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "Points awarded"
        );
        Ok(report)
    }

    async fn award_one(&self, claims: &Claims, student: &Student, amount: i64, cents: i64) -> Result<()> {
        let record = AwardRecord {
            id: String::new(),
            student_id: student.id.clone(),
            student_name: student.name.clone(),
            amount,
            awarded_by: claims.uid.clone(),
            timestamp: Utc::now(),
        };
        let record_path =
            AwardRecord::collection(&claims.classroom).doc(Uuid::new_v4().to_string());

        let batch = WriteBatch::from(vec![
            WriteOp::update(
                Student::collection(&claims.classroom).doc(&student.id),
                vec![
                    (Student::FIELD_XP.to_string(), FieldOp::Increment(amount)),
                    (Student::FIELD_MONEY.to_string(), FieldOp::Increment(cents)),
                ],
            ),
            WriteOp::create(record_path, encode(&record)?)
                .with_transform(AwardRecord::FIELD_TIMESTAMP, FieldOp::StoreTimestamp),
        ]);

        self.store
            .commit(batch)
            .await
            .map_err(|e| LedgerError::from_storage("Student", e))?;
        Ok(())
    }

    /// Overwrite a student's XP, money and class name.
    pub async fn adjust_student(
        &self,
        claims: &Claims,
        student_id: &str,
        new_xp: f64,
        new_money: f64,
        new_class_name: Option<&str>,
    ) -> Result<()> {
        require_teacher(claims, "adjusting students")?;
        let adjustment = StudentAdjustment::new(new_xp, new_money, new_class_name)?;
        self.apply_adjustment(claims, student_id, adjustment).await
    }

    /// Like [`adjust_student`](Self::adjust_student), from form text.
    pub async fn adjust_student_from_input(
        &self,
        claims: &Claims,
        student_id: &str,
        xp: &str,
        money: &str,
        class_name: Option<&str>,
    ) -> Result<()> {
        require_teacher(claims, "adjusting students")?;
        let adjustment = StudentAdjustment::parse(xp, money, class_name)?;
        self.apply_adjustment(claims, student_id, adjustment).await
    }

    #[tracing::instrument(name = "ledger.adjust_student", skip_all, fields(student_id = %student_id))]
    async fn apply_adjustment(
        &self,
        claims: &Claims,
        student_id: &str,
        adjustment: StudentAdjustment,
    ) -> Result<()> {
        let mut fields = vec![
            (Student::FIELD_XP.to_string(), FieldOp::Set(Value::from(adjustment.xp))),
            (
                Student::FIELD_MONEY.to_string(),
                FieldOp::Set(Value::from(adjustment.money.cents())),
            ),
        ];
        if let Some(name) = adjustment.class_name {
            let value = if name.is_empty() {
                Value::Null
            } else {
                Value::String(name)
            };
            fields.push((Student::FIELD_CLASS_NAME.to_string(), FieldOp::Set(value)));
        }

        let path = Student::collection(&claims.classroom).doc(student_id);
        self.store
            .commit(WriteBatch::from(vec![WriteOp::update(path, fields)]))
            .await
            .map_err(|e| LedgerError::from_storage("Student", e))?;

        info!(xp = adjustment.xp, money = %adjustment.money, "Student adjusted");
        Ok(())
    }

    /// Append a black mark to each student and notify each of them, all in
    /// one batch.
    #[tracing::instrument(
        name = "ledger.issue_black_mark",
        skip_all,
        fields(teacher = %claims.uid, students = student_ids.len())
    )]
    pub async fn issue_black_mark(
        &self,
        claims: &Claims,
        student_ids: &[String],
        mark_type: &str,
    ) -> Result<BlackMarkReport> {
        require_teacher(claims, "issuing black marks")?;
        let mark_type = mark_type.trim();
        if mark_type.is_empty() {
            return Err(LedgerError::validation("Black mark type is required"));
        }
        let targets = distinct(student_ids);
        if targets.is_empty() {
            return Err(LedgerError::validation("Select at least one student"));
        }
        let ops_needed = targets.len() * 2;
        if ops_needed > self.limits.max_batch_writes {
            return Err(LedgerError::validation(format!(
                "Too many students selected: {} operations exceed the batch limit of {}",
                ops_needed, self.limits.max_batch_writes
            )));
        }

        let timestamp = Utc::now();
        let mark = serde_json::to_value(BlackMark {
            kind: mark_type.to_string(),
            timestamp,
        })
        .map_err(StorageError::from)?;

        let mut batch = WriteBatch::new();
        for student_id in &targets {
            batch.push(WriteOp::update(
                Student::collection(&claims.classroom).doc(student_id),
                vec![(Student::FIELD_BLACK_MARKS.to_string(), FieldOp::Append(mark.clone()))],
            ));
            let notification = Notification::unread(
                student_id.clone(),
                NotificationType::BlackMark,
                black_mark_message(mark_type),
            );
            batch.push(
                WriteOp::create(
                    Notification::collection(&claims.classroom).doc(Uuid::new_v4().to_string()),
                    encode(&notification)?,
                )
                .with_transform(Notification::FIELD_TIMESTAMP, FieldOp::StoreTimestamp),
            );
        }

        self.store
            .commit(batch)
            .await
            .map_err(|e| LedgerError::from_storage("Student", e))?;

        info!(%mark_type, "Black mark issued");
        Ok(BlackMarkReport {
            mark_type: mark_type.to_string(),
            students: targets,
            timestamp,
        })
    }

    /// Create an account and its student record.
    ///
    /// A student record already stored under the account's uid is kept, so
    /// an account lost by the identity provider can be created again. When
    /// the record cannot be written the new account is discarded, leaving
    /// the email free for another attempt.
    #[tracing::instrument(name = "ledger.register_student", skip_all, fields(email = %email))]
    pub async fn register_student(
        &self,
        auth: &AuthService,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Claims> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::validation("Name is required"));
        }
        if auth.resolver().resolve(email) == Role::Teacher {
            return Err(LedgerError::PermissionDenied(
                "teacher accounts cannot register as students".to_string(),
            ));
        }

        let claims = auth.create_account(email, password).await?;
        match self.write_student_record(&claims, name).await {
            Ok(()) => Ok(claims),
            Err(e) => {
                warn!(uid = %claims.uid, error = %e, "Student record not written, discarding account");
                if let Err(rollback) = auth.discard_account(&claims).await {
                    error!(uid = %claims.uid, error = %rollback, "Failed to discard account");
                }
                Err(e)
            }
        }
    }

    async fn write_student_record(&self, claims: &Claims, name: &str) -> Result<()> {
        let path = Student::collection(&claims.classroom).doc(&claims.uid);
        if let Some(existing) = fetch::<Student>(self.store.as_ref(), &path).await? {
            info!(uid = %claims.uid, name = %existing.name, "Student record reattached");
            return Ok(());
        }

        let student = Student::registered(claims.uid.clone(), name, claims.email.clone());
        self.store
            .commit(WriteBatch::from(vec![WriteOp::create(path, encode(&student)?)]))
            .await?;
        info!(uid = %claims.uid, "Student registered");
        Ok(())
    }

    /// Remove a student record. Their history records are kept.
    #[tracing::instrument(name = "ledger.delete_student", skip_all, fields(student_id = %student_id))]
    pub async fn delete_student(&self, claims: &Claims, student_id: &str) -> Result<()> {
        require_teacher(claims, "deleting students")?;
        let path = Student::collection(&claims.classroom).doc(student_id);
        self.store
            .commit(WriteBatch::from(vec![WriteOp::delete(path)]))
            .await?;
        info!("Student deleted");
        Ok(())
    }

    /// Teachers may read anyone; students only themselves.
    fn check_student_access(claims: &Claims, student_id: &str) -> Result<()> {
        if claims.is_teacher() || claims.uid == student_id {
            Ok(())
        } else {
            Err(LedgerError::PermissionDenied(
                "students may only view their own record".to_string(),
            ))
        }
    }

    pub async fn get_student(&self, claims: &Claims, student_id: &str) -> Result<Student> {
        Self::check_student_access(claims, student_id)?;
        fetch(
            self.store.as_ref(),
            &Student::collection(&claims.classroom).doc(student_id),
        )
        .await?
        .ok_or_else(|| LedgerError::not_found("Student", student_id))
    }

    /// Live view of one student. Snapshots hold zero or one record.
    pub fn watch_student(&self, claims: &Claims, student_id: &str) -> Result<LiveQuery<Student>> {
        Self::check_student_access(claims, student_id)?;
        let id = student_id.to_string();
        Ok(Query::new(Student::collection(&claims.classroom))
            .filter(move |s: &Student| s.id == id)
            .subscribe(self.store.clone()))
    }

    /// Live roster ordered by name.
    pub fn watch_roster(&self, claims: &Claims) -> Result<LiveQuery<Student>> {
        require_teacher(claims, "viewing the roster")?;
        Ok(Query::new(Student::collection(&claims.classroom))
            .order_by(|a: &Student, b: &Student| a.name.cmp(&b.name))
            .subscribe(self.store.clone()))
    }

    /// Live class ranking, best first.
    pub fn class_ranking(&self, claims: &Claims, criteria: RankingCriteria) -> LiveQuery<Student> {
        Query::new(Student::collection(&claims.classroom))
            .order_by(move |a: &Student, b: &Student| criteria.compare(a, b))
            .subscribe(self.store.clone())
    }

    /// Current ranking table, with the caller's row flagged.
    pub async fn ranking(&self, claims: &Claims, criteria: RankingCriteria) -> Result<Vec<RankingEntry>> {
        let students: Vec<Student> =
            fetch_all(self.store.as_ref(), &Student::collection(&claims.classroom)).await?;
        Ok(rank_students(students, criteria, Some(&claims.uid)))
    }

    fn purchase_query(claims: &Claims) -> Query<PurchaseRecord> {
        let query = Query::new(PurchaseRecord::collection(&claims.classroom)).order_by(
            |a: &PurchaseRecord, b: &PurchaseRecord| {
                b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id))
            },
        );
        if claims.is_teacher() {
            query
        } else {
            let uid = claims.uid.clone();
            query.filter(move |r: &PurchaseRecord| r.student_id == uid)
        }
    }

    /// Purchase history, newest first. Students see only their own.
    pub async fn purchase_history(&self, claims: &Claims) -> Result<Vec<PurchaseRecord>> {
        Ok(Self::purchase_query(claims).fetch(self.store.as_ref()).await?)
    }

    pub fn watch_purchase_history(&self, claims: &Claims) -> LiveQuery<PurchaseRecord> {
        Self::purchase_query(claims).subscribe(self.store.clone())
    }

    /// Award log, newest first.
    pub async fn award_history(&self, claims: &Claims) -> Result<Vec<AwardRecord>> {
        require_teacher(claims, "viewing award history")?;
        let mut records: Vec<AwardRecord> =
            fetch_all(self.store.as_ref(), &AwardRecord::collection(&claims.classroom)).await?;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Create a student record directly, without an account. Used to import
    /// rosters and in tests.
    pub async fn insert_student(&self, claims: &Claims, student: &Student) -> Result<()> {
        require_teacher(claims, "importing students")?;
        let path = Student::collection(&claims.classroom).doc(&student.id);
        self.store
            .commit(WriteBatch::from(vec![
                WriteOp::create(path, encode(student)?),
            ]))
            .await?;
        Ok(())
    }
}
