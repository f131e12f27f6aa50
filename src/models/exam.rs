use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::utils::time;

/// Exam configuration. Treated as immutable while a session is open.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Exam {
    pub id: Uuid,
    pub training_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub passing_score: i32,
    pub duration_minutes: i32,
    pub max_attempts: Option<i32>,
    pub exam_question_count: i32,
    pub shuffle_questions: bool,
    pub shuffle_choices: bool,
    pub show_results_immediately: bool,
    pub show_correct_answers: bool,
    pub show_explanations: bool,
    pub auto_submit: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Exam {
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        time::within_window(self.start_date, self.end_date, now)
    }

    /// "2/3" when attempts are capped, "2" otherwise.
    pub fn attempt_text(&self, attempt_number: i32) -> String {
        match self.max_attempts {
            Some(max) => format!("{}/{}", attempt_number, max),
            None => attempt_number.to_string(),
        }
    }

    pub fn remaining_attempts(&self, attempts_used: i64) -> Option<i64> {
        self.max_attempts
            .map(|max| (i64::from(max) - attempts_used).max(0))
    }
}
