//! Fixtures for exercising services against the in-memory store.
//!
//! Available to unit tests and, with the `test-utils` feature, to
//! integration tests.

use std::sync::Arc;

use crate::auth::{Claims, Role};
use crate::config::{Config, LedgerLimits};
use crate::model::{ClassroomId, Money, ShopItem, Student};
use crate::services::{ItemDraft, Services};
use crate::storage::MemoryDocumentStore;

pub const TEST_CLASSROOM: &str = "test-class";
pub const TEACHER_UID: &str = "teacher-1";
pub const TEACHER_EMAIL: &str = "teacher@example.com";

pub fn classroom_id() -> ClassroomId {
    ClassroomId::new(TEST_CLASSROOM)
}

pub fn teacher_claims() -> Claims {
    Claims {
        uid: TEACHER_UID.to_string(),
        email: TEACHER_EMAIL.to_string(),
        role: Role::Teacher,
        classroom: classroom_id(),
    }
}

pub fn student_claims(uid: &str) -> Claims {
    Claims {
        uid: uid.to_string(),
        email: format!("{}@example.com", uid),
        role: Role::Student,
        classroom: classroom_id(),
    }
}

/// Limits with millisecond retry delays.
pub fn test_limits() -> LedgerLimits {
    Config::for_test().limits
}

/// A provisioned classroom over a fresh in-memory store.
pub struct TestClassroom {
    pub store: Arc<MemoryDocumentStore>,
    pub services: Services,
    pub teacher: Claims,
}

impl TestClassroom {
    pub async fn new() -> Self {
        Self::with_limits(test_limits()).await
    }

    pub async fn with_limits(limits: LedgerLimits) -> Self {
        let store = Arc::new(MemoryDocumentStore::new());
        let services = Services::new(store.clone(), limits);
        let teacher = teacher_claims();
        services
            .classrooms
            .provision(&teacher, "Test Class")
            .await
            .expect("provision test classroom");
        Self {
            store,
            services,
            teacher,
        }
    }

    /// Insert a student record and return claims for signing in as them.
    pub async fn add_student(&self, id: &str, name: &str, xp: i64, money: Money) -> Claims {
        let mut student = Student::registered(id, name, format!("{}@example.com", id));
        student.xp = xp;
        student.money = money;
        self.services
            .ledger
            .insert_student(&self.teacher, &student)
            .await
            .expect("insert test student");
        student_claims(id)
    }

    pub async fn student(&self, id: &str) -> Student {
        self.services
            .ledger
            .get_student(&self.teacher, id)
            .await
            .expect("read test student")
    }

    pub async fn add_item(&self, name: &str, price: f64) -> ShopItem {
        self.services
            .catalog
            .create_or_update_item(
                &self.teacher,
                ItemDraft {
                    id: None,
                    name: name.to_string(),
                    price,
                    description: None,
                },
            )
            .await
            .expect("create test item")
    }
}
