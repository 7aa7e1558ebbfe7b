//! Class ranking by XP or money.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::{Money, Student};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingCriteria {
    #[default]
    Xp,
    Money,
}

impl RankingCriteria {
    /// Descending order on the ranking field. Ties keep name order so the
    /// table does not reshuffle between snapshots.
    pub fn compare(self, a: &Student, b: &Student) -> Ordering {
        let primary = match self {
            RankingCriteria::Xp => b.xp.cmp(&a.xp),
            RankingCriteria::Money => b.money.cmp(&a.money),
        };
        primary.then_with(|| a.name.cmp(&b.name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub student_id: String,
    pub name: String,
    pub xp: i64,
    pub money: Money,
    /// Set on the row belonging to the student viewing the table.
    pub is_viewer: bool,
}

/// Build the ranking table. `students` may be in any order.
pub fn rank_students(
    mut students: Vec<Student>,
    criteria: RankingCriteria,
    viewer_id: Option<&str>,
) -> Vec<RankingEntry> {
    students.sort_by(|a, b| criteria.compare(a, b));
    students
        .into_iter()
        .enumerate()
        .map(|(index, student)| RankingEntry {
            rank: index + 1,
            is_viewer: viewer_id == Some(student.id.as_str()),
            student_id: student.id,
            name: if student.name.is_empty() {
                "Unknown".to_string()
            } else {
                student.name
            },
            xp: student.xp,
            money: student.money,
        })
        .collect()
}
