//! Teacher-facing commands and views.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::cache::StudentCache;
use crate::auth::Claims;
use crate::model::{AwardRecord, Money, Notification, ShopItem, Student};
use crate::services::error::{require_teacher, Result};
use crate::services::{
    AwardReport, BlackMarkReport, ClearHistoryReport, ItemDraft, ItemOrder, Services,
};
use crate::storage::LiveQuery;

/// One line of the teacher's purchase history table.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseHistoryRow {
    pub record_id: String,
    pub student_id: String,
    pub student_name: String,
    pub item_name: String,
    pub cost: Money,
    pub timestamp: DateTime<Utc>,
}

/// A signed-in teacher's session.
///
/// Keeps a roster listener running for the lifetime of the session so the
/// student cache tracks the live roster. Dropping the portal stops it.
pub struct TeacherPortal {
    claims: Claims,
    services: Services,
    cache: Arc<StudentCache>,
    roster_task: JoinHandle<()>,
}

impl TeacherPortal {
    /// Open a session. Waits for the first roster snapshot so the cache is
    /// warm before the first command.
    #[tracing::instrument(name = "portal.teacher.open", skip_all, fields(uid = %claims.uid))]
    pub async fn open(claims: Claims, services: Services) -> Result<Self> {
        require_teacher(&claims, "opening the teacher portal")?;
        let cache = Arc::new(StudentCache::new(services.store().clone()));

        let mut roster = services.ledger.watch_roster(&claims)?;
        if let Some(first) = roster.next().await {
            cache.replace(first?).await;
        }

        let roster_task = tokio::spawn(track_roster(roster, cache.clone()));
        info!(students = cache.len().await, "Teacher portal opened");

        Ok(Self {
            claims,
            services,
            cache,
            roster_task,
        })
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn cache(&self) -> &StudentCache {
        &self.cache
    }

    /// Roster as last seen by the cache, ordered by name.
    pub async fn students(&self) -> Vec<Student> {
        self.cache.students().await
    }

    pub fn watch_roster(&self) -> Result<LiveQuery<Student>> {
        self.services.ledger.watch_roster(&self.claims)
    }

    pub async fn student(&self, student_id: &str) -> Result<Student> {
        self.services.ledger.get_student(&self.claims, student_id).await
    }

    /// Award points to the selected students. Ids unknown to the roster
    /// and the store are skipped.
    pub async fn award_points(&self, student_ids: &[String], amount: i64) -> Result<AwardReport> {
        self.services
            .ledger
            .award_points_with(&self.claims, student_ids, amount, self.cache.as_ref())
            .await
    }

    /// Apply the edit form for one student.
    pub async fn adjust_student(
        &self,
        student_id: &str,
        xp: &str,
        money: &str,
        class_name: Option<&str>,
    ) -> Result<()> {
        self.services
            .ledger
            .adjust_student_from_input(&self.claims, student_id, xp, money, class_name)
            .await?;
        self.cache.invalidate(student_id).await;
        Ok(())
    }

    pub async fn issue_black_mark(&self, student_ids: &[String], mark_type: &str) -> Result<BlackMarkReport> {
        self.services
            .ledger
            .issue_black_mark(&self.claims, student_ids, mark_type)
            .await
    }

    pub async fn delete_student(&self, student_id: &str) -> Result<()> {
        self.services
            .ledger
            .delete_student(&self.claims, student_id)
            .await?;
        self.cache.invalidate(student_id).await;
        Ok(())
    }

    pub async fn clear_history(&self) -> Result<ClearHistoryReport> {
        self.services.ledger.clear_history(&self.claims).await
    }

    pub async fn save_item(&self, draft: ItemDraft) -> Result<ShopItem> {
        self.services
            .catalog
            .create_or_update_item(&self.claims, draft)
            .await
    }

    pub async fn delete_item(&self, item_id: &str) -> Result<()> {
        self.services.catalog.delete_item(&self.claims, item_id).await
    }

    pub async fn items(&self) -> Result<Vec<ShopItem>> {
        self.services
            .catalog
            .list_items(&self.claims, ItemOrder::ByName)
            .await
    }

    pub fn watch_items(&self) -> LiveQuery<ShopItem> {
        self.services.catalog.watch_items(&self.claims, ItemOrder::ByName)
    }

    /// Purchase history, newest first, with names resolved through the
    /// session cache.
    pub async fn purchase_history(&self) -> Result<Vec<PurchaseHistoryRow>> {
        let records = self.services.ledger.purchase_history(&self.claims).await?;
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            rows.push(PurchaseHistoryRow {
                student_name: self
                    .cache
                    .display_name(&record.student_id, &record.student_name)
                    .await,
                record_id: record.id,
                student_id: record.student_id,
                item_name: record.item_name,
                cost: record.cost,
                timestamp: record.timestamp,
            });
        }
        Ok(rows)
    }

    pub async fn award_history(&self) -> Result<Vec<AwardRecord>> {
        self.services.ledger.award_history(&self.claims).await
    }

    pub async fn notifications(&self) -> Result<Vec<Notification>> {
        self.services
            .notifications
            .notifications_for(&self.claims, &self.claims.uid)
            .await
    }

    pub fn watch_notifications(&self) -> Result<LiveQuery<Notification>> {
        self.services
            .notifications
            .list_for_recipient(&self.claims, &self.claims.uid)
    }

    pub async fn unread_count(&self) -> Result<usize> {
        self.services
            .notifications
            .unread_count(&self.claims, &self.claims.uid)
            .await
    }

    /// Mark every unread notification read.
    pub async fn mark_all_read(&self) -> Result<usize> {
        mark_feed_read(&self.services, &self.claims).await
    }
}

impl Drop for TeacherPortal {
    fn drop(&mut self) {
        self.roster_task.abort();
    }
}

async fn track_roster(mut roster: LiveQuery<Student>, cache: Arc<StudentCache>) {
    while let Some(snapshot) = roster.next().await {
        match snapshot {
            Ok(students) => cache.replace(students).await,
            Err(e) => warn!(error = %e, "Roster refresh failed, keeping cached students"),
        }
    }
}

/// Mark the caller's unread notifications read, in batches the store accepts.
pub(super) async fn mark_feed_read(services: &Services, claims: &Claims) -> Result<usize> {
    let unread: Vec<String> = services
        .notifications
        .notifications_for(claims, &claims.uid)
        .await?
        .into_iter()
        .filter(|n| !n.read)
        .map(|n| n.id)
        .collect();

    let chunk_size = services.ledger.limits().max_batch_writes.max(1);
    let mut marked = 0;
    for chunk in unread.chunks(chunk_size) {
        marked += services.notifications.mark_all_read(claims, chunk).await?;
    }
    Ok(marked)
}
