//! Shop catalog maintained by the teacher.

use std::cmp::Ordering;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::auth::Claims;
use crate::model::{Entity, Money, ShopItem};
use crate::services::error::{require_teacher, LedgerError, Result};
use crate::storage::{encode, fetch, DocumentStore, FieldOp, LiveQuery, Query, WriteBatch, WriteOp};

/// Display order of the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ItemOrder {
    /// Alphabetical, for the teacher's management view.
    #[default]
    ByName,
    /// Cheapest first, for the student shop.
    ByPrice,
}

impl ItemOrder {
    pub fn compare(self, a: &ShopItem, b: &ShopItem) -> Ordering {
        match self {
            ItemOrder::ByName => a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)),
            ItemOrder::ByPrice => a
                .price
                .cmp(&b.price)
                .then_with(|| a.name.cmp(&b.name)),
        }
    }
}

/// Form input for creating or editing an item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDraft {
    /// Existing item to update; `None` creates a new one.
    pub id: Option<String>,
    pub name: String,
    pub price: f64,
    pub description: Option<String>,
}

impl ItemDraft {
    fn validate(&self) -> Result<(String, Money, Option<String>)> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(LedgerError::validation("Item name is required"));
        }
        if !self.price.is_finite() {
            return Err(LedgerError::validation("Price must be a number"));
        }
        if self.price < 0.0 {
            return Err(LedgerError::validation("Price cannot be negative"));
        }
        let price = Money::from_f64(self.price)
            .ok_or_else(|| LedgerError::validation("Price is too large"))?;
        let description = self
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        Ok((name.to_string(), price, description))
    }
}

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn DocumentStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Save an item. Updating an item that was deleted meanwhile fails with
    /// `NotFound` rather than re-creating it.
    #[tracing::instrument(name = "catalog.save_item", skip_all, fields(item_id = ?draft.id))]
    pub async fn create_or_update_item(&self, claims: &Claims, draft: ItemDraft) -> Result<ShopItem> {
        require_teacher(claims, "managing the shop")?;
        let (name, price, description) = draft.validate()?;
        let collection = ShopItem::collection(&claims.classroom);

        match draft.id {
            Some(id) => {
                let fields = vec![
                    ("name".to_string(), FieldOp::Set(Value::String(name.clone()))),
                    ("price".to_string(), FieldOp::Set(Value::from(price.cents()))),
                    (
                        "description".to_string(),
                        FieldOp::Set(description.clone().map_or(Value::Null, Value::String)),
                    ),
                ];
                self.store
                    .commit(WriteBatch::from(vec![WriteOp::update(collection.doc(&id), fields)]))
                    .await
                    .map_err(|e| LedgerError::from_storage("Item", e))?;
                info!(%id, "Item updated");
                Ok(ShopItem {
                    id,
                    name,
                    price,
                    description,
                })
            }
            None => {
                let item = ShopItem {
                    id: Uuid::new_v4().to_string(),
                    name,
                    price,
                    description,
                };
                self.store
                    .commit(WriteBatch::from(vec![WriteOp::create(
                        collection.doc(&item.id),
                        encode(&item)?,
                    )]))
                    .await?;
                info!(id = %item.id, "Item created");
                Ok(item)
            }
        }
    }

    /// Remove an item. Purchase records keep their copy of its name.
    #[tracing::instrument(name = "catalog.delete_item", skip_all, fields(%item_id))]
    pub async fn delete_item(&self, claims: &Claims, item_id: &str) -> Result<()> {
        require_teacher(claims, "managing the shop")?;
        let path = ShopItem::collection(&claims.classroom).doc(item_id);
        self.store
            .commit(WriteBatch::from(vec![WriteOp::delete(path)]))
            .await?;
        info!("Item deleted");
        Ok(())
    }

    pub async fn get_item(&self, claims: &Claims, item_id: &str) -> Result<ShopItem> {
        fetch(
            self.store.as_ref(),
            &ShopItem::collection(&claims.classroom).doc(item_id),
        )
        .await?
        .ok_or_else(|| LedgerError::not_found("Item", item_id))
    }

    fn query(claims: &Claims, order: ItemOrder) -> Query<ShopItem> {
        Query::new(ShopItem::collection(&claims.classroom))
            .order_by(move |a: &ShopItem, b: &ShopItem| order.compare(a, b))
    }

    pub async fn list_items(&self, claims: &Claims, order: ItemOrder) -> Result<Vec<ShopItem>> {
        Ok(Self::query(claims, order).fetch(self.store.as_ref()).await?)
    }

    pub fn watch_items(&self, claims: &Claims, order: ItemOrder) -> LiveQuery<ShopItem> {
        Self::query(claims, order).subscribe(self.store.clone())
    }
}
