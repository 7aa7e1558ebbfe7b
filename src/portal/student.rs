//! Student-facing commands and views.

use serde::Serialize;

use crate::auth::Claims;
use crate::model::{
    level_thresholds, BlackMark, LevelThreshold, Notification, PurchaseRecord, RankingCriteria,
    RankingEntry, ShopItem, Student, MAX_LEVEL, XP_PER_LEVEL,
};
use crate::services::error::{require_student, Result};
use crate::services::{ItemOrder, PurchaseReceipt, PurchaseRequest, Services};
use crate::storage::LiveQuery;

/// The student's dashboard header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentProfile {
    pub student: Student,
    pub level: u32,
    /// XP at which the next level starts; `None` at the top level.
    pub next_level_xp: Option<i64>,
    pub black_marks: Vec<BlackMark>,
}

impl StudentProfile {
    fn from_student(student: Student) -> Self {
        let level = student.level();
        Self {
            next_level_xp: (level < MAX_LEVEL).then(|| level as i64 * XP_PER_LEVEL),
            black_marks: student.black_marks_newest_first(),
            level,
            student,
        }
    }
}

/// A signed-in student's session. Every view is scoped to the caller.
pub struct StudentPortal {
    claims: Claims,
    services: Services,
}

impl StudentPortal {
    pub fn open(claims: Claims, services: Services) -> Result<Self> {
        require_student(&claims, "opening the student portal")?;
        Ok(Self { claims, services })
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub async fn profile(&self) -> Result<StudentProfile> {
        let student = self
            .services
            .ledger
            .get_student(&self.claims, &self.claims.uid)
            .await?;
        Ok(StudentProfile::from_student(student))
    }

    pub fn watch_profile(&self) -> Result<LiveQuery<Student>> {
        self.services
            .ledger
            .watch_student(&self.claims, &self.claims.uid)
    }

    /// Shop items, cheapest first.
    pub async fn shop(&self) -> Result<Vec<ShopItem>> {
        self.services
            .catalog
            .list_items(&self.claims, ItemOrder::ByPrice)
            .await
    }

    pub fn watch_shop(&self) -> LiveQuery<ShopItem> {
        self.services
            .catalog
            .watch_items(&self.claims, ItemOrder::ByPrice)
    }

    /// Buy a catalog item at its current price.
    pub async fn buy(&self, item_id: &str) -> Result<PurchaseReceipt> {
        let item = self.services.catalog.get_item(&self.claims, item_id).await?;
        self.services
            .ledger
            .purchase(
                &self.claims,
                PurchaseRequest {
                    student_id: self.claims.uid.clone(),
                    item_id: item.id,
                    item_name: item.name,
                    price: item.price,
                },
            )
            .await
    }

    pub async fn purchase_history(&self) -> Result<Vec<PurchaseRecord>> {
        self.services.ledger.purchase_history(&self.claims).await
    }

    pub async fn ranking(&self, criteria: RankingCriteria) -> Result<Vec<RankingEntry>> {
        self.services.ledger.ranking(&self.claims, criteria).await
    }

    pub fn watch_ranking(&self, criteria: RankingCriteria) -> LiveQuery<Student> {
        self.services.ledger.class_ranking(&self.claims, criteria)
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

    pub async fn mark_all_read(&self) -> Result<usize> {
        super::teacher::mark_feed_read(&self.services, &self.claims).await
    }

    pub fn level_table(&self) -> Vec<LevelThreshold> {
        level_thresholds()
    }
}
