//! Classroom services: ledger, catalog, notifications and registration.

use std::sync::Arc;

use crate::config::LedgerLimits;
use crate::storage::DocumentStore;

pub mod catalog;
pub mod classroom;
pub mod error;
pub mod ledger;
pub mod notifications;

pub use catalog::{CatalogService, ItemDraft, ItemOrder};
pub use classroom::ClassroomService;
pub use error::{LedgerError, Result};
pub use ledger::{
    AwardFailure, AwardReport, BlackMarkReport, ClearHistoryReport, LedgerService,
    PurchaseReceipt, PurchaseRequest, StoreLookup, StudentAdjustment, StudentLookup,
};
pub use notifications::NotificationService;

/// All services over one store.
#[derive(Clone)]
pub struct Services {
    pub ledger: LedgerService,
    pub catalog: CatalogService,
    pub notifications: NotificationService,
    pub classrooms: ClassroomService,
}

impl Services {
    pub fn new(store: Arc<dyn DocumentStore>, limits: LedgerLimits) -> Self {
        Self {
            ledger: LedgerService::new(store.clone(), limits.clone()),
            catalog: CatalogService::new(store.clone()),
            notifications: NotificationService::new(store.clone(), limits),
            classrooms: ClassroomService::new(store),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        self.ledger.store()
    }
}
