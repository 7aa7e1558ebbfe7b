//! Classroom registration.

use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::Claims;
use crate::model::{Classroom, Entity};
use crate::services::error::{require_teacher, LedgerError, Result};
use crate::storage::{encode, fetch, DocumentStore, Precondition, WriteBatch, WriteOp};

#[derive(Clone)]
pub struct ClassroomService {
    store: Arc<dyn DocumentStore>,
}

impl ClassroomService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Register the caller's classroom with the caller as its teacher.
    ///
    /// Provisioning an existing classroom only renames it; the stored
    /// teacher is kept and any other teacher is refused.
    #[tracing::instrument(name = "classroom.provision", skip_all, fields(classroom = %claims.classroom))]
    pub async fn provision(&self, claims: &Claims, name: &str) -> Result<Classroom> {
        require_teacher(claims, "provisioning a classroom")?;
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::validation("Classroom name is required"));
        }

        let path = Classroom::collection(&claims.classroom).doc(claims.classroom.as_str());
        let (classroom, precondition) = match self.store.get(&path).await? {
            Some(doc) => {
                let mut existing: Classroom = doc.decode()?;
                if existing.teacher_id != claims.uid {
                    warn!(teacher = %existing.teacher_id, caller = %claims.uid, "Classroom owned by another teacher");
                    return Err(LedgerError::PermissionDenied(format!(
                        "classroom {} belongs to another teacher",
                        claims.classroom
                    )));
                }
                existing.name = name.to_string();
                (existing, Precondition::Version(doc.version))
            }
            None => (
                Classroom {
                    id: claims.classroom.as_str().to_string(),
                    name: name.to_string(),
                    teacher_id: claims.uid.clone(),
                },
                Precondition::Missing,
            ),
        };

        self.store
            .commit(WriteBatch::from(vec![
                WriteOp::set(path, encode(&classroom)?).with_precondition(precondition)
            ]))
            .await?;

        info!(teacher = %claims.uid, "Classroom provisioned");
        Ok(classroom)
    }

    pub async fn get(&self, claims: &Claims) -> Result<Classroom> {
        fetch(
            self.store.as_ref(),
            &Classroom::collection(&claims.classroom).doc(claims.classroom.as_str()),
        )
        .await?
        .ok_or_else(|| LedgerError::not_found("Classroom", claims.classroom.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::storage::MemoryDocumentStore;
    use crate::test_utils::{student_claims, teacher_claims};

    fn service() -> ClassroomService {
        ClassroomService::new(Arc::new(MemoryDocumentStore::new()))
    }

    #[tokio::test]
    async fn test_provision_and_get() {
        let classrooms = service();
        let teacher = teacher_claims();

        let err = classrooms.get(&teacher).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { kind: "Classroom", .. }));

        let created = classrooms.provision(&teacher, " Room 4 ").await.unwrap();
        assert_eq!(created.name, "Room 4");
        assert_eq!(created.teacher_id, teacher.uid);
        assert_eq!(classrooms.get(&teacher).await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_reprovision_keeps_teacher() {
        let classrooms = service();
        let teacher = teacher_claims();
        classrooms.provision(&teacher, "Room 4").await.unwrap();

        let renamed = classrooms.provision(&teacher, "Room 5").await.unwrap();
        assert_eq!(renamed.name, "Room 5");
        assert_eq!(renamed.teacher_id, teacher.uid);

        let stranger = Claims {
            uid: "teacher-2".to_string(),
            ..teacher.clone()
        };
        let err = classrooms.provision(&stranger, "Taken").await.unwrap_err();
        assert!(matches!(err, LedgerError::PermissionDenied(_)));

        let stored = classrooms.get(&teacher).await.unwrap();
        assert_eq!(stored.name, "Room 5");
        assert_eq!(stored.teacher_id, teacher.uid);
    }

    #[tokio::test]
    async fn test_provision_rejections() {
        let classrooms = service();
        let student = student_claims("ada");
        assert_eq!(student.role, Role::Student);

        let err = classrooms.provision(&student, "Room 4").await.unwrap_err();
        assert!(matches!(err, LedgerError::PermissionDenied(_)));
        let err = classrooms.provision(&teacher_claims(), "  ").await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
