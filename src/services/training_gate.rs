use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::exam::Exam;
use crate::models::training::Training;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrainingGate: Send + Sync {
    /// Whether the user may sit exams attached to `training_id`.
    async fn has_completed(&self, user_id: Uuid, training_id: Uuid) -> Result<bool>;
}

/// Fails with `PrerequisiteNotMet` when the exam's training blocks the user.
pub async fn ensure_prerequisite(gate: &dyn TrainingGate, user_id: Uuid, exam: &Exam) -> Result<()> {
    let Some(training_id) = exam.training_id else {
        return Ok(());
    };
    if gate.has_completed(user_id, training_id).await? {
        Ok(())
    } else {
        tracing::info!(%user_id, exam_id = %exam.id, %training_id, "prerequisite training not completed");
        Err(Error::PrerequisiteNotMet { training_id })
    }
}

#[derive(Clone)]
pub struct PgTrainingGate {
    pool: PgPool,
}

impl PgTrainingGate {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TrainingGate for PgTrainingGate {
    async fn has_completed(&self, user_id: Uuid, training_id: Uuid) -> Result<bool> {
        let training = sqlx::query_as::<_, Training>("SELECT * FROM trainings WHERE id = $1")
            .bind(training_id)
            .fetch_optional(&self.pool)
            .await?;

        match training {
            Some(t) if t.gates_exam() => {
                let completed: bool = sqlx::query_scalar(
                    "SELECT EXISTS (SELECT 1 FROM training_registrations \
                     WHERE user_id = $1 AND training_id = $2 AND status = 'completed')",
                )
                .bind(user_id)
                .bind(training_id)
                .fetch_one(&self.pool)
                .await?;
                Ok(completed)
            }
            _ => Ok(true),
        }
    }
}
