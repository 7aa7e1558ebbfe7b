//! Classroom domain records.
//!
//! Each record is one document in the store. Document ids are not part of
//! the stored body; they are filled in from the document key on read.

mod level;
mod money;
mod ranking;

pub use level::{level_for_xp, level_thresholds, LevelThreshold, MAX_LEVEL, XP_PER_LEVEL};
pub use money::{Money, ParseMoneyError, CENTS_PER_UNIT};
pub use ranking::{rank_students, RankingCriteria, RankingEntry};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::storage::CollectionPath;

/// Root namespace for per-classroom collections.
pub const CLASSROOM_NAMESPACE: &str = "classroom-rewards";

/// Identifier of the classroom every ledger and catalog call is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassroomId(String);

impl ClassroomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Collection nested under this classroom, e.g.
    /// `classroom-rewards/main-class/students`.
    pub fn collection(&self, name: &str) -> CollectionPath {
        CollectionPath::new(format!("{}/{}/{}", CLASSROOM_NAMESPACE, self.0, name))
    }
}

impl fmt::Display for ClassroomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A record type stored as one document per instance.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection name inside the classroom namespace.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    /// Where records of this type live for a classroom.
    fn collection(classroom: &ClassroomId) -> CollectionPath {
        classroom.collection(Self::COLLECTION)
    }
}

/// Disciplinary annotation on a student record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlackMark {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    #[serde(skip)]
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub xp: i64,
    #[serde(default)]
    pub money: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default)]
    pub black_marks: Vec<BlackMark>,
}

impl Student {
    pub const FIELD_XP: &'static str = "xp";
    pub const FIELD_MONEY: &'static str = "money";
    pub const FIELD_CLASS_NAME: &'static str = "className";
    pub const FIELD_BLACK_MARKS: &'static str = "blackMarks";

    /// Fresh record for a newly registered student.
    pub fn registered(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            xp: 0,
            money: Money::ZERO,
            class_name: None,
            black_marks: Vec::new(),
        }
    }

    pub fn level(&self) -> u32 {
        level_for_xp(self.xp)
    }

    /// Black marks with the most recent first.
    pub fn black_marks_newest_first(&self) -> Vec<BlackMark> {
        let mut marks = self.black_marks.clone();
        marks.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        marks
    }
}

impl Entity for Student {
    const COLLECTION: &'static str = "students";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopItem {
    #[serde(skip)]
    pub id: String,
    pub name: String,
    pub price: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Entity for ShopItem {
    const COLLECTION: &'static str = "shop";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// One completed purchase. Names are snapshots taken at purchase time so
/// history stays readable after the item or student is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    #[serde(skip)]
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub item_id: String,
    pub item_name: String,
    pub cost: Money,
    pub timestamp: DateTime<Utc>,
}

impl PurchaseRecord {
    pub const FIELD_TIMESTAMP: &'static str = "timestamp";
}

impl Entity for PurchaseRecord {
    const COLLECTION: &'static str = "purchase_history";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// One point award, written together with the balance increment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardRecord {
    #[serde(skip)]
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub amount: i64,
    pub awarded_by: String,
    pub timestamp: DateTime<Utc>,
}

impl AwardRecord {
    pub const FIELD_TIMESTAMP: &'static str = "timestamp";
}

impl Entity for AwardRecord {
    const COLLECTION: &'static str = "award_history";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Purchase,
    BlackMark,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(skip)]
    pub id: String,
    pub recipient_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(rename = "type")]
    pub kind: NotificationType,
}

impl Notification {
    pub const FIELD_READ: &'static str = "read";
    pub const FIELD_TIMESTAMP: &'static str = "timestamp";

    pub fn unread(
        recipient_id: impl Into<String>,
        kind: NotificationType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            recipient_id: recipient_id.into(),
            message: message.into(),
            timestamp: Utc::now(),
            read: false,
            kind,
        }
    }
}

impl Entity for Notification {
    const COLLECTION: &'static str = "notifications";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// Classroom registration. Identifies the teacher who receives purchase
/// notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classroom {
    #[serde(skip)]
    pub id: String,
    pub name: String,
    pub teacher_id: String,
}

impl Entity for Classroom {
    const COLLECTION: &'static str = "classrooms";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    /// Classrooms are registered at the top level, not inside a namespace.
    fn collection(_classroom: &ClassroomId) -> CollectionPath {
        CollectionPath::new(Self::COLLECTION)
    }
}
