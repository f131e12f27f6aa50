use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::utils::time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Passed,
    Failed,
    Timeout,
    PendingReview,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Passed => "passed",
            SessionStatus::Failed => "failed",
            SessionStatus::Timeout => "timeout",
            SessionStatus::PendingReview => "pending_review",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "in_progress" => Ok(SessionStatus::InProgress),
            "passed" => Ok(SessionStatus::Passed),
            "failed" => Ok(SessionStatus::Failed),
            "timeout" => Ok(SessionStatus::Timeout),
            "pending_review" => Ok(SessionStatus::PendingReview),
            other => Err(Error::Internal(format!("Unknown session status '{}'", other))),
        }
    }

    /// passed, failed and timeout accept no further scoring transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Passed | SessionStatus::Failed | SessionStatus::Timeout
        )
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (InProgress, Passed | Failed | Timeout | PendingReview) => true,
            (PendingReview, Passed | Failed) => true,
            _ => false,
        }
    }

    /// Message shown to the examinee once the session leaves `in_progress`.
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "Exam is in progress.",
            SessionStatus::PendingReview => {
                "Your exam result will be computed soon and you will be notified."
            }
            SessionStatus::Passed => "Congratulations! You have passed the exam.",
            SessionStatus::Failed => "You did not pass the exam. You can try again.",
            SessionStatus::Timeout => "Time expired. The exam was submitted automatically.",
        }
    }
}

/// One user's attempt at an exam (`exam_registrations`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExamSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub exam_id: Uuid,
    pub attempt_number: i32,
    pub status: String,
    pub selected_question_ids: Vec<i64>,
    pub choice_order: JsonValue,
    pub total_questions: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub score: Option<i32>,
    pub needs_manual_grading: bool,
    pub auto_graded_score: Option<i32>,
    pub admin_notes: Option<String>,
    pub graded_at: Option<DateTime<Utc>>,
    pub graded_by: Option<Uuid>,
    pub certificate_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExamSession {
    pub fn status(&self) -> Result<SessionStatus> {
        SessionStatus::parse(&self.status)
    }

    pub fn contains_question(&self, question_id: i64) -> bool {
        self.selected_question_ids.contains(&question_id)
    }

    /// Whole minutes since the session started.
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        time::whole_minutes(self.started_at, now)
    }

    pub fn time_exceeded(&self, duration_minutes: i32, now: DateTime<Utc>) -> bool {
        self.elapsed_minutes(now) > i64::from(duration_minutes)
    }

    pub fn remaining_minutes(&self, duration_minutes: i32, now: DateTime<Utc>) -> i64 {
        (i64::from(duration_minutes) - self.elapsed_minutes(now)).max(0)
    }

    /// Choice presentation order frozen at start, keyed by question id.
    pub fn choice_order(&self) -> BTreeMap<i64, Vec<i64>> {
        serde_json::from_value::<BTreeMap<String, Vec<i64>>>(self.choice_order.clone())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(k, v)| k.parse::<i64>().ok().map(|id| (id, v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn session(started_at: DateTime<Utc>) -> ExamSession {
        ExamSession {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            exam_id: Uuid::new_v4(),
            attempt_number: 1,
            status: "in_progress".to_string(),
            selected_question_ids: vec![3, 1, 2],
            choice_order: json!({ "3": [33, 31, 32] }),
            total_questions: 3,
            started_at,
            finished_at: None,
            score: None,
            needs_manual_grading: false,
            auto_graded_score: None,
            admin_notes: None,
            graded_at: None,
            graded_by: None,
            certificate_id: None,
            created_at: started_at,
            updated_at: started_at,
        }
    }

    #[test]
    fn transitions_follow_the_lifecycle() {
        use SessionStatus::*;
        assert!(InProgress.can_transition_to(Passed));
        assert!(InProgress.can_transition_to(PendingReview));
        assert!(InProgress.can_transition_to(Timeout));
        assert!(PendingReview.can_transition_to(Failed));
        assert!(!PendingReview.can_transition_to(Timeout));
        assert!(!Passed.can_transition_to(Failed));
        assert!(!Timeout.can_transition_to(PendingReview));
        assert!(!Failed.can_transition_to(InProgress));

        assert!(Passed.is_terminal() && Failed.is_terminal() && Timeout.is_terminal());
        assert!(!PendingReview.is_terminal());
        assert!(!InProgress.is_terminal());
    }

    #[test]
    fn every_outcome_has_a_distinct_message() {
        let messages = [
            SessionStatus::Passed.user_message(),
            SessionStatus::Failed.user_message(),
            SessionStatus::Timeout.user_message(),
            SessionStatus::PendingReview.user_message(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn time_exceeded_uses_whole_minutes() {
        let now = Utc::now();
        let s = session(now - Duration::seconds(30 * 60 + 59));
        assert_eq!(s.elapsed_minutes(now), 30);
        assert!(!s.time_exceeded(30, now));

        let s = session(now - Duration::minutes(31));
        assert!(s.time_exceeded(30, now));
        assert_eq!(s.remaining_minutes(30, now), 0);
    }

    #[test]
    fn choice_order_is_keyed_by_question_id() {
        let s = session(Utc::now());
        let order = s.choice_order();
        assert_eq!(order.get(&3), Some(&vec![33, 31, 32]));
        assert!(order.get(&1).is_none());
        assert!(s.contains_question(2));
        assert!(!s.contains_question(9));
    }
}
