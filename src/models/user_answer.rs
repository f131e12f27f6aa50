use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserAnswer {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub question_id: i64,
    pub choice_id: Option<i64>,
    pub choice_ids: Option<Vec<i64>>,
    pub answer_text: Option<String>,
    pub is_correct: Option<bool>,
    pub needs_manual_grading: bool,
    pub admin_feedback: Option<JsonValue>,
    pub answered_at: DateTime<Utc>,
    pub graded_at: Option<DateTime<Utc>>,
    pub graded_by: Option<Uuid>,
}
