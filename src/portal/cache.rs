//! Session-scoped student cache.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::model::{ClassroomId, Entity, Student};
use crate::services::StudentLookup;
use crate::storage::{fetch, DocumentStore, StorageError};

/// Name shown for history rows whose student cannot be resolved.
pub const UNKNOWN_STUDENT: &str = "Unknown Student";

/// Student records keyed by id.
///
/// Replaced wholesale by each roster snapshot. A miss reads through to the
/// store and caches the result when the student exists.
pub struct StudentCache {
    store: Arc<dyn DocumentStore>,
    students: RwLock<HashMap<String, Student>>,
}

impl StudentCache {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            students: RwLock::new(HashMap::new()),
        }
    }

    /// Swap in a full roster snapshot.
    pub async fn replace(&self, students: Vec<Student>) {
        let fresh: HashMap<String, Student> =
            students.into_iter().map(|s| (s.id.clone(), s)).collect();
        debug!(students = fresh.len(), "Student cache replaced");
        *self.students.write().await = fresh;
    }

    pub async fn invalidate(&self, student_id: &str) {
        self.students.write().await.remove(student_id);
    }

    pub async fn len(&self) -> usize {
        self.students.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.students.read().await.is_empty()
    }

    /// Cached record only; never touches the store.
    pub async fn cached(&self, student_id: &str) -> Option<Student> {
        self.students.read().await.get(student_id).cloned()
    }

    /// Cached students ordered by name.
    pub async fn students(&self) -> Vec<Student> {
        let mut students: Vec<Student> = self.students.read().await.values().cloned().collect();
        students.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        students
    }

    /// Read-through lookup.
    pub async fn get(
        &self,
        classroom: &ClassroomId,
        student_id: &str,
    ) -> Result<Option<Student>, StorageError> {
        if let Some(student) = self.cached(student_id).await {
            return Ok(Some(student));
        }
        let student: Option<Student> =
            fetch(self.store.as_ref(), &Student::collection(classroom).doc(student_id)).await?;
        if let Some(student) = &student {
            self.students
                .write()
                .await
                .insert(student.id.clone(), student.clone());
        }
        Ok(student)
    }

    /// Name for a history row: the cached name, else the name recorded
    /// with the row, else [`UNKNOWN_STUDENT`].
    pub async fn display_name(&self, student_id: &str, recorded_name: &str) -> String {
        if let Some(student) = self.students.read().await.get(student_id) {
            if !student.name.is_empty() {
                return student.name.clone();
            }
        }
        if recorded_name.is_empty() {
            UNKNOWN_STUDENT.to_string()
        } else {
            recorded_name.to_string()
        }
    }
}

#[async_trait]
impl StudentLookup for StudentCache {
    async fn find_student(
        &self,
        classroom: &ClassroomId,
        student_id: &str,
    ) -> Result<Option<Student>, StorageError> {
        self.get(classroom, student_id).await
    }
}
