use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Training {
    pub id: Uuid,
    pub title: String,
    pub training_type: String,
    pub exam_required: bool,
    pub has_certificate: bool,
    pub created_at: DateTime<Utc>,
}

impl Training {
    /// Video trainings have no registration, so their exams are never gated.
    pub fn gates_exam(&self) -> bool {
        self.training_type != "video" && self.exam_required
    }
}
