use std::collections::HashMap;

use serde_json::{Map, Value as JsonValue};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::dto::exam_dto::{
    AnswerPayload, Feedback, GradeTextRequest, GradeTextResponse, GradingAnswerView, GradingView,
    PendingReviewItem,
};
use crate::error::{Error, Result};
use crate::models::exam_session::{ExamSession, SessionStatus};
use crate::models::question::Question;
use crate::models::user::User;
use crate::models::user_answer::UserAnswer;
use crate::services::attempt_service::stored_answers;
use crate::services::grading_service;
use crate::services::outbox_service::{self, OutboxMessage, OutboxService};
use crate::services::question_bank::{load_exam, load_questions_by_ids};
use crate::utils::time::now;

/// Keeps the `az`, `en` and `ru` entries that have text. `None` when nothing
/// is left.
pub fn normalize_feedback(feedback: Option<&Feedback>) -> Option<JsonValue> {
    let feedback = feedback?;
    let mut map = Map::new();
    for (lang, value) in [("az", &feedback.az), ("en", &feedback.en), ("ru", &feedback.ru)] {
        if let Some(text) = value.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            map.insert(lang.to_string(), JsonValue::String(text.to_string()));
        }
    }
    (!map.is_empty()).then_some(JsonValue::Object(map))
}

#[derive(Debug, FromRow)]
struct PendingRow {
    registration_id: Uuid,
    user_id: Uuid,
    first_name: String,
    last_name: String,
    email: String,
    exam_id: Uuid,
    exam_title: String,
    attempt_number: i32,
    auto_graded_score: Option<i32>,
    text_answers_pending: i64,
    finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Clone)]
pub struct ReviewService {
    pool: PgPool,
    outbox: OutboxService,
}

impl ReviewService {
    pub fn new(pool: PgPool, outbox: OutboxService) -> Self {
        Self { pool, outbox }
    }

    pub async fn list_pending(&self) -> Result<Vec<PendingReviewItem>> {
        let rows = sqlx::query_as::<_, PendingRow>(
            r#"
            SELECT r.id AS registration_id, r.user_id, u.first_name, u.last_name, u.email,
                   r.exam_id, e.title AS exam_title, r.attempt_number, r.auto_graded_score,
                   (SELECT COUNT(*) FROM exam_user_answers a
                     WHERE a.registration_id = r.id AND a.needs_manual_grading AND a.graded_at IS NULL
                   ) AS text_answers_pending,
                   r.finished_at
            FROM exam_registrations r
            JOIN users u ON u.id = r.user_id
            JOIN exams e ON e.id = r.exam_id
            WHERE r.status = 'pending_review'
            ORDER BY r.finished_at ASC NULLS LAST
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| PendingReviewItem {
                registration_id: r.registration_id,
                user_id: r.user_id,
                user_name: format!("{} {}", r.first_name, r.last_name),
                user_email: r.email,
                exam_id: r.exam_id,
                exam_title: r.exam_title,
                attempt_number: r.attempt_number,
                auto_graded_score: r.auto_graded_score,
                text_answers_pending: r.text_answers_pending,
                finished_at: r.finished_at,
            })
            .collect())
    }

    /// Everything a grader needs: the session's answers with their questions
    /// and the current auto-graded tally.
    pub async fn grading_view(&self, registration_id: Uuid) -> Result<GradingView> {
        let mut conn = self.pool.acquire().await?;
        let session = sqlx::query_as::<_, ExamSession>("SELECT * FROM exam_registrations WHERE id = $1")
            .bind(registration_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Registration {} not found", registration_id)))?;
        let exam = load_exam(&mut conn, session.exam_id).await?;
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(session.user_id)
            .fetch_one(&mut *conn)
            .await?;
        let questions = load_questions_by_ids(&mut conn, &session.selected_question_ids).await?;
        let answers = stored_answers(&mut conn, session.id).await?;

        let payloads: Vec<AnswerPayload> = answers.iter().map(AnswerPayload::from).collect();
        let by_id: HashMap<i64, &Question> = questions.iter().map(|q| (q.id, q)).collect();

        Ok(GradingView {
            registration_id: session.id,
            user_id: user.id,
            user_name: user.full_name(),
            exam_id: exam.id,
            exam_title: exam.title.clone(),
            passing_score: exam.passing_score,
            status: session.status.clone(),
            total_questions: session.total_questions,
            text_questions: grading_service::text_question_count(&questions),
            correct_answers: grading_service::count_auto_correct(&questions, &payloads),
            current_score: session.score,
            auto_graded_score: session.auto_graded_score,
            answers: answers
                .into_iter()
                .map(|a| answer_view(a, &by_id))
                .collect(),
        })
    }

    pub async fn grade_text(
        &self,
        registration_id: Uuid,
        grader_id: Uuid,
        request: GradeTextRequest,
    ) -> Result<GradeTextResponse> {
        let graded_at = now();
        let mut tx = self.pool.begin().await?;

        let session = sqlx::query_as::<_, ExamSession>(
            "SELECT * FROM exam_registrations WHERE id = $1 FOR UPDATE",
        )
        .bind(registration_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(Error::NoActiveAttempt)?;
        if session.status()? != SessionStatus::PendingReview {
            return Err(Error::NotPendingReview);
        }

        let exam = load_exam(&mut tx, session.exam_id).await?;
        let questions = load_questions_by_ids(&mut tx, &session.selected_question_ids).await?;
        let answers = stored_answers(&mut tx, session.id).await?;
        let text_question_ids: Vec<i64> = questions.iter().filter(|q| q.is_text()).map(|q| q.id).collect();
        let answers_by_id: HashMap<Uuid, &UserAnswer> = answers.iter().map(|a| (a.id, a)).collect();

        // Last grade per answer wins.
        let grades: HashMap<Uuid, _> = request.grades.iter().map(|g| (g.answer_id, g)).collect();
        for (answer_id, grade) in &grades {
            let Some(answer) = answers_by_id.get(answer_id) else {
                return Err(Error::InvalidAnswerPayload(format!(
                    "answer {} does not belong to this session",
                    answer_id
                )));
            };
            if !text_question_ids.contains(&answer.question_id) {
                return Err(Error::InvalidAnswerPayload(format!(
                    "answer {} is not a text answer",
                    answer_id
                )));
            }
            sqlx::query(
                "UPDATE exam_user_answers SET is_correct = $1, admin_feedback = $2, graded_at = $3, graded_by = $4 \
                 WHERE id = $5",
            )
            .bind(grade.is_correct)
            .bind(normalize_feedback(grade.feedback.as_ref()))
            .bind(graded_at)
            .bind(grader_id)
            .bind(answer_id)
            .execute(&mut *tx)
            .await?;
        }

        let payloads: Vec<AnswerPayload> = answers.iter().map(AnswerPayload::from).collect();
        let auto_correct = grading_service::count_auto_correct(&questions, &payloads);
        let text_correct = grades.values().filter(|g| g.is_correct).count();
        let outcome = grading_service::decide_review(
            &exam,
            session.total_questions.max(0) as usize,
            text_question_ids.len(),
            auto_correct,
            text_correct,
        );

        let admin_notes = request
            .admin_notes
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        sqlx::query(
            r#"
            UPDATE exam_registrations
            SET status = $1, score = $2, admin_notes = $3, graded_at = $4, graded_by = $5, updated_at = NOW()
            WHERE id = $6
            "#,
        )
        .bind(outcome.status.as_str())
        .bind(outcome.score)
        .bind(admin_notes)
        .bind(graded_at)
        .bind(grader_id)
        .bind(session.id)
        .execute(&mut *tx)
        .await?;

        let mut certificate_events = Vec::new();
        if outcome.passed {
            certificate_events.push(
                outbox_service::enqueue(
                    &mut tx,
                    &OutboxMessage::IssueCertificate {
                        registration_id: session.id,
                    },
                )
                .await?,
            );
        }
        let notification_events = match grading_service::OutcomeKind::for_status(outcome.status) {
            Some(kind) => vec![
                outbox_service::enqueue(
                    &mut tx,
                    &OutboxMessage::NotifyResult {
                        registration_id: session.id,
                        outcome: kind,
                    },
                )
                .await?,
            ],
            None => Vec::new(),
        };
        tx.commit().await?;

        tracing::info!(
            %registration_id,
            %grader_id,
            status = outcome.status.as_str(),
            score = outcome.score,
            "text answers graded"
        );

        self.outbox
            .hand_off(certificate_events, notification_events, outbox_service::CERTIFICATE_WAIT)
            .await;

        Ok(GradeTextResponse {
            registration_id: session.id,
            status: outcome.status.as_str().to_string(),
            score: outcome.score,
            passed: outcome.passed,
            auto_graded_correct: outcome.auto_graded_correct,
            text_questions_correct: outcome.text_questions_correct,
            total_correct: outcome.total_correct,
            total_questions: session.total_questions,
        })
    }
}

fn answer_view(answer: UserAnswer, questions: &HashMap<i64, &Question>) -> GradingAnswerView {
    let question = questions.get(&answer.question_id);
    GradingAnswerView {
        answer_id: answer.id,
        question_id: answer.question_id,
        question_text: question.map(|q| q.text.clone()).unwrap_or_default(),
        question_type: question
            .map(|q| q.question_type.as_str().to_string())
            .unwrap_or_default(),
        choice_id: answer.choice_id,
        choice_ids: answer.choice_ids,
        answer_text: answer.answer_text,
        is_correct: answer.is_correct,
        needs_manual_grading: answer.needs_manual_grading,
        admin_feedback: answer.admin_feedback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn feedback_drops_empty_languages() {
        let feedback = Feedback {
            az: Some("Yaxşı cavab".into()),
            en: Some("  ".into()),
            ru: None,
        };
        assert_eq!(normalize_feedback(Some(&feedback)), Some(json!({ "az": "Yaxşı cavab" })));
    }

    #[test]
    fn empty_feedback_is_stored_as_null() {
        assert_eq!(normalize_feedback(Some(&Feedback::default())), None);
        assert_eq!(normalize_feedback(None), None);
    }
}
