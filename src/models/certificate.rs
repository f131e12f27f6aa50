use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Certificate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub related_training_id: Option<Uuid>,
    pub related_exam_id: Uuid,
    pub certificate_number: String,
    pub issue_date: NaiveDate,
    pub issuer_name: String,
    pub status: String,
    pub pdf_path: Option<String>,
    pub created_at: DateTime<Utc>,
}
