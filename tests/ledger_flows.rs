//! End-to-end ledger properties.
//!
//! Run with: cargo test --test ledger_flows --features test-utils

use std::sync::Arc;

use chrono::Utc;

use classroom_ledger::auth::Claims;
use classroom_ledger::config::LedgerLimits;
use classroom_ledger::model::{
    Entity, Money, Notification, NotificationType, PurchaseRecord, Student,
};
use classroom_ledger::services::{LedgerError, PurchaseRequest, Services};
use classroom_ledger::storage::{encode, fetch_all, DocumentStore, WriteBatch, WriteOp};
use classroom_ledger::test_utils::{student_claims, teacher_claims, test_limits, TestClassroom};

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn request(student_id: &str, item: &str, price: Money) -> PurchaseRequest {
    PurchaseRequest {
        student_id: student_id.to_string(),
        item_id: item.to_lowercase(),
        item_name: item.to_string(),
        price,
    }
}

async fn purchase_records(store: &dyn DocumentStore, claims: &Claims) -> Vec<PurchaseRecord> {
    fetch_all(store, &PurchaseRecord::collection(&claims.classroom))
        .await
        .expect("list purchase records")
}

async fn notifications(store: &dyn DocumentStore, claims: &Claims) -> Vec<Notification> {
    fetch_all(store, &Notification::collection(&claims.classroom))
        .await
        .expect("list notifications")
}

/// Provision a classroom with one student over any store.
async fn classroom_over(store: Arc<dyn DocumentStore>, limits: LedgerLimits, money: Money) -> Services {
    let services = Services::new(store, limits);
    let teacher = teacher_claims();
    services
        .classrooms
        .provision(&teacher, "Flows")
        .await
        .expect("provision");
    let mut student = Student::registered("ada", "Ada", "ada@example.com");
    student.money = money;
    services
        .ledger
        .insert_student(&teacher, &student)
        .await
        .expect("insert student");
    services
}

// =============================================================================
// Purchases
// =============================================================================

#[tokio::test]
async fn test_purchase_postconditions() {
    let class = TestClassroom::new().await;
    let ada = class.add_student("ada", "Ada", 0, Money::from_units(20)).await;

    class
        .services
        .ledger
        .purchase(&ada, request("ada", "Pencil", Money::from_cents(350)))
        .await
        .unwrap();

    assert_eq!(class.student("ada").await.money, Money::from_cents(1650));
    let records = purchase_records(class.store.as_ref(), &ada).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].cost, Money::from_cents(350));
    assert_eq!(notifications(class.store.as_ref(), &ada).await.len(), 1);
}

#[tokio::test]
async fn test_purchase_over_balance_changes_nothing() {
    let class = TestClassroom::new().await;
    let ada = class.add_student("ada", "Ada", 0, Money::from_units(2)).await;

    let err = class
        .services
        .ledger
        .purchase(&ada, request("ada", "Bike", Money::from_units(3)))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    assert_eq!(class.student("ada").await.money, Money::from_units(2));
    assert!(purchase_records(class.store.as_ref(), &ada).await.is_empty());
    assert!(notifications(class.store.as_ref(), &ada).await.is_empty());
}

/// Two purchases that each fit the balance but not together: exactly one
/// lands, the other sees insufficient funds, and the balance never goes
/// negative.
async fn race_two_purchases(services: Services, store: Arc<dyn DocumentStore>) {
    let ada = student_claims("ada");

    let first = {
        let services = services.clone();
        let ada = ada.clone();
        tokio::spawn(async move {
            services
                .ledger
                .purchase(&ada, request("ada", "Kite", Money::from_units(7)))
                .await
        })
    };
    let second = {
        let services = services.clone();
        let ada = ada.clone();
        tokio::spawn(async move {
            services
                .ledger
                .purchase(&ada, request("ada", "Yoyo", Money::from_units(6)))
                .await
        })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1, "exactly one purchase should succeed: {:?}", results);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(LedgerError::InsufficientFunds { .. }))));

    let balance = services
        .ledger
        .get_student(&teacher_claims(), "ada")
        .await
        .unwrap()
        .money;
    assert!(
        balance == Money::from_units(3) || balance == Money::from_units(4),
        "unexpected balance {}",
        balance
    );
    assert_eq!(purchase_records(store.as_ref(), &ada).await.len(), 1);
    assert_eq!(notifications(store.as_ref(), &ada).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_purchases_never_overdraw_memory() {
    for _ in 0..20 {
        let store: Arc<dyn DocumentStore> =
            Arc::new(classroom_ledger::storage::MemoryDocumentStore::new());
        let services = classroom_over(store.clone(), test_limits(), Money::from_units(10)).await;
        race_two_purchases(services, store).await;
    }
}

#[cfg(feature = "sqlite")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_purchases_never_overdraw_sqlite() {
    use classroom_ledger::storage::SqliteDocumentStore;

    for _ in 0..5 {
        let sqlite = SqliteDocumentStore::open(":memory:").await.unwrap();
        sqlite.init().await.unwrap();
        let store: Arc<dyn DocumentStore> = Arc::new(sqlite);
        let services = classroom_over(store.clone(), test_limits(), Money::from_units(10)).await;
        race_two_purchases(services, store).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_purchases_balance_adds_up() {
    let class = TestClassroom::new().await;
    class.add_student("ada", "Ada", 0, Money::from_units(10)).await;

    let mut tasks = Vec::new();
    for n in 0..15 {
        let services = class.services.clone();
        tasks.push(tokio::spawn(async move {
            services
                .ledger
                .purchase(
                    &student_claims("ada"),
                    request("ada", &format!("Sticker {}", n), Money::from_units(1)),
                )
                .await
        }));
    }

    let mut bought = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => bought += 1,
            Err(LedgerError::InsufficientFunds { .. }) | Err(LedgerError::Transient { .. }) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    let ada = class.student("ada").await;
    assert!(bought <= 10);
    assert_eq!(ada.money, Money::from_units(10 - bought));
    let records = purchase_records(class.store.as_ref(), &class.teacher).await;
    assert_eq!(records.len() as i64, bought);
}

// =============================================================================
// Awards and black marks
// =============================================================================

#[tokio::test]
async fn test_award_two_students() {
    let class = TestClassroom::new().await;
    class.add_student("s1", "One", 0, Money::ZERO).await;
    class.add_student("s2", "Two", 0, Money::ZERO).await;

    class
        .services
        .ledger
        .award_points(&class.teacher, &ids(&["s1", "s2"]), 10)
        .await
        .unwrap();

    for id in ["s1", "s2"] {
        let student = class.student(id).await;
        assert_eq!(student.xp, 10);
        assert_eq!(student.money, Money::from_units(10));
    }
}

#[tokio::test]
async fn test_award_reports_success_despite_other_failure() {
    let class = TestClassroom::new().await;
    class.add_student("s1", "One", 0, Money::ZERO).await;
    class.add_student("s2", "Two", 0, Money::ZERO).await;
    class
        .store
        .fail_writes_to(Student::collection(&class.teacher.classroom).doc("s2"))
        .await;

    let report = class
        .services
        .ledger
        .award_points(&class.teacher, &ids(&["s1", "s2"]), 10)
        .await
        .unwrap();

    assert_eq!(report.awarded, ids(&["s1"]));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].student_id, "s2");
    assert!(matches!(report.failures[0].error, LedgerError::Storage(_)));
    assert_eq!(class.student("s1").await.xp, 10);
    assert_eq!(class.student("s2").await.xp, 0);
}

#[tokio::test]
async fn test_black_mark_postconditions() {
    let class = TestClassroom::new().await;
    class.add_student("s1", "One", 0, Money::ZERO).await;
    let called_at = Utc::now();

    class
        .services
        .ledger
        .issue_black_mark(&class.teacher, &ids(&["s1"]), "late homework")
        .await
        .unwrap();

    let s1 = class.student("s1").await;
    assert_eq!(s1.black_marks.len(), 1);
    assert_eq!(s1.black_marks[0].kind, "late homework");
    assert!(s1.black_marks[0].timestamp >= called_at);

    let feed = notifications(class.store.as_ref(), &class.teacher).await;
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].recipient_id, "s1");
    assert_eq!(feed[0].kind, NotificationType::BlackMark);
}

#[tokio::test]
async fn test_black_mark_commit_failure_leaves_nothing() {
    let class = TestClassroom::new().await;
    class.add_student("s1", "One", 0, Money::ZERO).await;
    class.store.fail_nth_commit(1).await;

    let err = class
        .services
        .ledger
        .issue_black_mark(&class.teacher, &ids(&["s1"]), "late homework")
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Storage(_)));
    assert!(class.student("s1").await.black_marks.is_empty());
    assert!(notifications(class.store.as_ref(), &class.teacher).await.is_empty());
}

// =============================================================================
// Clear history
// =============================================================================

/// Write `count` purchase records directly, in store-sized batches.
async fn seed_purchase_records(class: &TestClassroom, count: usize) {
    let collection = PurchaseRecord::collection(&class.teacher.classroom);
    let ops: Vec<WriteOp> = (0..count)
        .map(|n| {
            let record = PurchaseRecord {
                id: String::new(),
                student_id: "s1".to_string(),
                student_name: "One".to_string(),
                item_id: "sticker".to_string(),
                item_name: "Sticker".to_string(),
                cost: Money::from_units(1),
                timestamp: Utc::now(),
            };
            WriteOp::create(
                collection.doc(format!("p{:04}", n)),
                encode(&record).expect("encode record"),
            )
        })
        .collect();
    for chunk in ops.chunks(250) {
        class
            .store
            .commit(WriteBatch::from(chunk.to_vec()))
            .await
            .expect("seed records");
    }
}

#[tokio::test]
async fn test_clear_history_over_batch_limit() {
    let class = TestClassroom::new().await;
    class.add_student("s1", "One", 0, Money::ZERO).await;
    seed_purchase_records(&class, 1_100).await;

    let report = class
        .services
        .ledger
        .clear_history(&class.teacher)
        .await
        .unwrap();

    // ceil(1100 / 499) = 3
    assert_eq!(report.history_batches, 3);
    assert_eq!(report.records_deleted, 1_100);
    let collection = PurchaseRecord::collection(&class.teacher.classroom);
    assert_eq!(class.store.count(&collection).await, 0);
}

#[tokio::test]
async fn test_clear_history_failure_keeps_earlier_batches() {
    let class = TestClassroom::new().await;
    class.add_student("s1", "One", 0, Money::ZERO).await;
    seed_purchase_records(&class, 1_100).await;
    let collection = PurchaseRecord::collection(&class.teacher.classroom);

    // Commit 1 resets black marks, commit 2 deletes the first 499 records,
    // commit 3 fails.
    class.store.fail_nth_commit(3).await;
    let err = class
        .services
        .ledger
        .clear_history(&class.teacher)
        .await
        .unwrap_err();

    match err {
        LedgerError::PartialFailure {
            completed_batches,
            records_deleted,
            ..
        } => {
            assert_eq!(completed_batches, 2);
            assert_eq!(records_deleted, 499);
        }
        other => panic!("expected PartialFailure, got {:?}", other),
    }
    assert_eq!(class.store.count(&collection).await, 1_100 - 499);

    // Running again finishes the job.
    let report = class
        .services
        .ledger
        .clear_history(&class.teacher)
        .await
        .unwrap();
    assert_eq!(report.records_deleted, 1_100 - 499);
    assert_eq!(class.store.count(&collection).await, 0);
}

// =============================================================================
// Notifications
// =============================================================================

#[tokio::test]
async fn test_mark_all_read_twice() {
    let class = TestClassroom::new().await;
    class.add_student("s1", "One", 0, Money::ZERO).await;
    for mark in ["late", "noise", "phone"] {
        class
            .services
            .ledger
            .issue_black_mark(&class.teacher, &ids(&["s1"]), mark)
            .await
            .unwrap();
    }
    let s1 = student_claims("s1");
    let feed_ids: Vec<String> = class
        .services
        .notifications
        .notifications_for(&s1, "s1")
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(feed_ids.len(), 3);

    for _ in 0..2 {
        let marked = class
            .services
            .notifications
            .mark_all_read(&s1, &feed_ids)
            .await
            .unwrap();
        assert_eq!(marked, 3);
        let feed = class
            .services
            .notifications
            .notifications_for(&s1, "s1")
            .await
            .unwrap();
        assert!(feed.iter().all(|n| n.read));
    }
}

// =============================================================================
// Restarts
// =============================================================================

#[cfg(feature = "sqlite")]
mod restarts {
    use super::*;

    use classroom_ledger::auth::{AuthService, MemoryIdentityProvider, RoleResolver};
    use classroom_ledger::storage::SqliteDocumentStore;
    use classroom_ledger::test_utils::{classroom_id, TEACHER_EMAIL};

    async fn open_sqlite(path: &str) -> Arc<dyn DocumentStore> {
        let store = SqliteDocumentStore::open(path)
            .await
            .expect("open sqlite");
        store.init().await.expect("create schema");
        Arc::new(store)
    }

    /// A fresh identity provider, as a restarted process would have.
    fn fresh_auth() -> AuthService {
        AuthService::new(
            Arc::new(MemoryIdentityProvider::default()),
            RoleResolver::new(vec![TEACHER_EMAIL.to_string()]),
            classroom_id(),
        )
    }

    #[tokio::test]
    async fn test_teacher_and_students_survive_restart() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("ledger.db");
        let path = path.to_str().expect("utf-8 temp path");

        let (teacher_uid, ada_uid) = {
            let services = Services::new(open_sqlite(path).await, test_limits());
            let auth = fresh_auth();
            let teacher = auth.create_account(TEACHER_EMAIL, "secret1").await.unwrap();
            services.classrooms.provision(&teacher, "Flows").await.unwrap();
            let ada = services
                .ledger
                .register_student(&auth, "Ada", "ada@school.test", "secret1")
                .await
                .unwrap();
            services
                .ledger
                .award_points(&teacher, &ids(&[ada.uid.as_str()]), 10)
                .await
                .unwrap();
            services
                .ledger
                .purchase(&ada, request(&ada.uid, "Kite", Money::from_units(3)))
                .await
                .unwrap();
            (teacher.uid, ada.uid)
        };

        let services = Services::new(open_sqlite(path).await, test_limits());
        let auth = fresh_auth();
        let teacher = auth.create_account(TEACHER_EMAIL, "new-secret").await.unwrap();
        assert_eq!(teacher.uid, teacher_uid);

        let classroom = services.classrooms.provision(&teacher, "Flows").await.unwrap();
        assert_eq!(classroom.teacher_id, teacher_uid);
        let feed = services
            .notifications
            .notifications_for(&teacher, &teacher.uid)
            .await
            .unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].kind, NotificationType::Purchase);

        let ada = services
            .ledger
            .register_student(&auth, "Ada", "ada@school.test", "secret1")
            .await
            .unwrap();
        assert_eq!(ada.uid, ada_uid);
        let record = services.ledger.get_student(&ada, &ada.uid).await.unwrap();
        assert_eq!(record.money, Money::from_units(7));
        assert_eq!(record.xp, 10);
    }
}
