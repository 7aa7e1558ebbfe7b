//! Per-user notification feed.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::auth::Claims;
use crate::config::LedgerLimits;
use crate::model::{Entity, Notification};
use crate::services::error::{LedgerError, Result};
use crate::storage::{fetch, DocumentStore, FieldOp, LiveQuery, Query, WriteBatch, WriteOp};

#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn DocumentStore>,
    limits: LedgerLimits,
}

fn require_recipient(claims: &Claims, recipient_id: &str) -> Result<()> {
    if claims.uid == recipient_id {
        Ok(())
    } else {
        Err(LedgerError::PermissionDenied(
            "notifications are visible only to their recipient".to_string(),
        ))
    }
}

impl NotificationService {
    pub fn new(store: Arc<dyn DocumentStore>, limits: LedgerLimits) -> Self {
        Self { store, limits }
    }

    fn query(claims: &Claims, recipient_id: &str) -> Query<Notification> {
        let recipient = recipient_id.to_string();
        Query::new(Notification::collection(&claims.classroom))
            .filter(move |n: &Notification| n.recipient_id == recipient)
            .order_by(|a: &Notification, b: &Notification| {
                b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id))
            })
    }

    /// Live feed for one recipient, newest first.
    pub fn list_for_recipient(&self, claims: &Claims, recipient_id: &str) -> Result<LiveQuery<Notification>> {
        require_recipient(claims, recipient_id)?;
        Ok(Self::query(claims, recipient_id).subscribe(self.store.clone()))
    }

    /// Current feed for one recipient, newest first.
    pub async fn notifications_for(&self, claims: &Claims, recipient_id: &str) -> Result<Vec<Notification>> {
        require_recipient(claims, recipient_id)?;
        Ok(Self::query(claims, recipient_id)
            .fetch(self.store.as_ref())
            .await?)
    }

    pub async fn unread_count(&self, claims: &Claims, recipient_id: &str) -> Result<usize> {
        let feed = self.notifications_for(claims, recipient_id).await?;
        Ok(feed.iter().filter(|n| !n.read).count())
    }

    /// Mark exactly these notifications read, in one batch.
    ///
    /// Already-read ids are rewritten unchanged. A missing id fails the
    /// whole batch with `NotFound`.
    #[tracing::instrument(name = "notifications.mark_all_read", skip_all, fields(count = ids.len()))]
    pub async fn mark_all_read(&self, claims: &Claims, ids: &[String]) -> Result<usize> {
        let mut seen = HashSet::new();
        let ids: Vec<&String> = ids.iter().filter(|id| seen.insert(id.as_str())).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        if ids.len() > self.limits.max_batch_writes {
            return Err(LedgerError::validation(format!(
                "Cannot mark more than {} notifications at once",
                self.limits.max_batch_writes
            )));
        }

        let collection = Notification::collection(&claims.classroom);
        for id in &ids {
            let notification: Notification = fetch(self.store.as_ref(), &collection.doc(id.as_str()))
                .await?
                .ok_or_else(|| LedgerError::not_found("Notification", id.as_str()))?;
            require_recipient(claims, &notification.recipient_id)?;
        }

        let batch: Vec<WriteOp> = ids
            .iter()
            .map(|id| {
                WriteOp::update(
                    collection.doc(id.as_str()),
                    vec![(Notification::FIELD_READ.to_string(), FieldOp::Set(Value::Bool(true)))],
                )
            })
            .collect();
        self.store
            .commit(WriteBatch::from(batch))
            .await
            .map_err(|e| LedgerError::from_storage("Notification", e))?;

        info!(marked = ids.len(), "Notifications marked read");
        Ok(ids.len())
    }
}
