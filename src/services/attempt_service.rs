use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::dto::exam_dto::{
    AnswerPayload, AttemptSummary, CertificateInfo, ExamResultResponse, ExamSummary,
    PresentedChoice, PresentedQuestion, QuestionReview, SaveAnswerResponse, SessionView,
    SubmitExamResponse,
};
use crate::error::{Error, Result};
use crate::models::certificate::Certificate;
use crate::models::exam::Exam;
use crate::models::exam_session::{ExamSession, SessionStatus};
use crate::models::question::{Question, QuestionType};
use crate::models::user_answer::UserAnswer;
use crate::services::grading_service::{self, Evaluation, SubmissionOutcome};
use crate::services::outbox_service::{self, OutboxMessage, OutboxService};
use crate::services::question_bank::{load_exam, load_questions, load_questions_by_ids};
use crate::services::selection_service::draw_questions;
use crate::services::training_gate::{ensure_prerequisite, TrainingGate};
use crate::utils::time::now;

/// Attempt bookkeeping for one (user, exam).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct AttemptStats {
    pub attempts_used: i64,
    pub last_attempt_number: i32,
    pub has_passed: bool,
}

/// Start preconditions in the order they are checked.
pub fn check_can_start(exam: &Exam, stats: &AttemptStats, has_active: bool, at: DateTime<Utc>) -> Result<()> {
    if !exam.is_available_at(at) {
        return Err(Error::ExamNotAvailable);
    }
    if let Some(max_attempts) = exam.max_attempts {
        if stats.has_passed {
            return Err(Error::AlreadyPassed);
        }
        if has_active {
            return Err(Error::ActiveAttemptExists);
        }
        if stats.attempts_used >= i64::from(max_attempts) {
            return Err(Error::AttemptLimitExceeded {
                max_attempts,
                attempts_used: stats.attempts_used,
            });
        }
    } else if has_active {
        return Err(Error::ActiveAttemptExists);
    }
    Ok(())
}

#[derive(Clone)]
pub struct AttemptService {
    pool: PgPool,
    gate: Arc<dyn TrainingGate>,
    outbox: OutboxService,
}

impl AttemptService {
    pub fn new(pool: PgPool, gate: Arc<dyn TrainingGate>, outbox: OutboxService) -> Self {
        Self { pool, gate, outbox }
    }

    pub async fn start_session<R: Rng + Send>(
        &self,
        user_id: Uuid,
        exam_id: Uuid,
        rng: &mut R,
    ) -> Result<SessionView> {
        let started_at = now();
        let mut tx = self.pool.begin().await?;
        let exam = load_exam(&mut tx, exam_id).await?;

        // Serializes concurrent starts for the same (user, exam).
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("exam-start:{}:{}", user_id, exam_id))
            .execute(&mut *tx)
            .await?;

        let stats = attempt_stats(&mut tx, user_id, exam_id).await?;
        let has_active = find_active(&mut tx, user_id, exam_id, false).await?.is_some();
        check_can_start(&exam, &stats, has_active, started_at)?;

        let bank = load_questions(&mut tx, exam_id, true).await?;
        let drawn = draw_questions(&exam, &bank, rng)?;

        let session = sqlx::query_as::<_, ExamSession>(
            r#"
            INSERT INTO exam_registrations (
                user_id, exam_id, attempt_number, status, selected_question_ids, choice_order,
                total_questions, started_at
            )
            VALUES ($1, $2, $3, 'in_progress', $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(exam_id)
        .bind(stats.last_attempt_number + 1)
        .bind(&drawn.question_ids)
        .bind(drawn.choice_order_json())
        .bind(drawn.question_ids.len() as i32)
        .bind(started_at)
        .fetch_one(&mut *tx)
        .await?;

        let questions = presented_questions(&mut tx, &session, &[]).await?;
        tx.commit().await?;

        tracing::info!(
            registration_id = %session.id,
            %user_id,
            %exam_id,
            attempt = session.attempt_number,
            questions = session.total_questions,
            "exam session started"
        );
        Ok(session_view(&exam, &session, questions, stats.attempts_used + 1, started_at))
    }

    /// The open session with its frozen questions and any saved answers.
    pub async fn current_session(&self, user_id: Uuid, exam_id: Uuid) -> Result<SessionView> {
        let mut conn = self.pool.acquire().await?;
        let exam = load_exam(&mut conn, exam_id).await?;
        let session = find_active(&mut conn, user_id, exam_id, false)
            .await?
            .ok_or(Error::NoActiveAttempt)?;
        let saved = stored_answers(&mut conn, session.id).await?;
        let questions = presented_questions(&mut conn, &session, &saved).await?;
        let stats = attempt_stats(&mut conn, user_id, exam_id).await?;
        Ok(session_view(&exam, &session, questions, stats.attempts_used, now()))
    }

    /// Upserts one answer while the session is open.
    pub async fn save_answer(
        &self,
        user_id: Uuid,
        exam_id: Uuid,
        answer: AnswerPayload,
    ) -> Result<SaveAnswerResponse> {
        let mut tx = self.pool.begin().await?;
        let session = find_active(&mut tx, user_id, exam_id, true)
            .await?
            .ok_or(Error::NoActiveAttempt)?;
        if !session.contains_question(answer.question_id) {
            return Err(Error::InvalidAnswerPayload(format!(
                "question {} is not part of this session",
                answer.question_id
            )));
        }

        let question = load_questions_by_ids(&mut tx, &[answer.question_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidAnswerPayload(format!("question {} no longer exists", answer.question_id)))?;
        grading_service::validate_answer(&question, &answer)?;
        let answered_at = upsert_answer(&mut tx, session.id, &question, &answer).await?;
        tx.commit().await?;

        Ok(SaveAnswerResponse {
            saved: true,
            question_id: answer.question_id,
            answered_at,
        })
    }

    pub async fn submit(
        &self,
        user_id: Uuid,
        exam_id: Uuid,
        answers: Vec<AnswerPayload>,
    ) -> Result<SubmitExamResponse> {
        let submitted_at = now();
        let exam = {
            let mut conn = self.pool.acquire().await?;
            load_exam(&mut conn, exam_id).await?
        };
        ensure_prerequisite(self.gate.as_ref(), user_id, &exam).await?;

        let mut tx = self.pool.begin().await?;
        let session = find_active(&mut tx, user_id, exam_id, true)
            .await?
            .ok_or(Error::NoActiveAttempt)?;

        let questions = load_questions_by_ids(&mut tx, &session.selected_question_ids).await?;
        let by_id: HashMap<i64, &Question> = questions.iter().map(|q| (q.id, q)).collect();

        for answer in &answers {
            let Some(question) = by_id.get(&answer.question_id) else {
                tracing::debug!(registration_id = %session.id, question_id = answer.question_id, "answer outside session ignored");
                continue;
            };
            grading_service::validate_answer(question, answer)?;
            upsert_answer(&mut tx, session.id, question, answer).await?;
        }

        let stored: Vec<AnswerPayload> = stored_answers(&mut tx, session.id)
            .await?
            .iter()
            .map(AnswerPayload::from)
            .collect();
        let time_exceeded = session.time_exceeded(exam.duration_minutes, submitted_at);
        let outcome = grading_service::score_session(
            &exam,
            &questions,
            session.total_questions.max(0) as usize,
            &stored,
            time_exceeded,
        );

        sqlx::query(
            r#"
            UPDATE exam_registrations
            SET status = $1, score = $2, finished_at = $3, needs_manual_grading = $4,
                auto_graded_score = $5, updated_at = NOW()
            WHERE id = $6
            "#,
        )
        .bind(outcome.status.as_str())
        .bind(outcome.score)
        .bind(submitted_at)
        .bind(outcome.needs_manual_grading)
        .bind(outcome.auto_graded_score)
        .bind(session.id)
        .execute(&mut *tx)
        .await?;

        let mut certificate_events = Vec::new();
        if outcome.issues_certificate() {
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
        let mut notification_events = Vec::new();
        if let Some(kind) = outcome.notification() {
            notification_events.push(
                outbox_service::enqueue(
                    &mut tx,
                    &OutboxMessage::NotifyResult {
                        registration_id: session.id,
                        outcome: kind,
                    },
                )
                .await?,
            );
        }

        let stats = attempt_stats(&mut tx, user_id, exam_id).await?;
        tx.commit().await?;

        tracing::info!(
            registration_id = %session.id,
            %user_id,
            %exam_id,
            status = outcome.status.as_str(),
            score = outcome.score,
            time_exceeded,
            "exam submitted"
        );

        // Certificate first so the response can carry it when it is quick.
        self.outbox
            .hand_off(certificate_events, notification_events, outbox_service::CERTIFICATE_WAIT)
            .await;

        let certificate = match self.certificate_for(user_id, exam_id).await {
            Ok(c) if outcome.status == SessionStatus::Passed => c.map(certificate_info),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(registration_id = %session.id, error = ?e, "could not load certificate");
                None
            }
        };

        let review = result_review(&exam, &session, &questions, &stored, &outcome);
        Ok(SubmitExamResponse {
            registration_id: session.id,
            status: outcome.status.as_str().to_string(),
            score: outcome.score,
            passed: outcome.passed,
            passing_score: exam.passing_score,
            correct_answers: outcome.correct_auto,
            total_questions: session.total_questions,
            text_questions: outcome.text_questions,
            needs_manual_grading: outcome.needs_manual_grading,
            time_exceeded,
            attempt_number: session.attempt_number,
            attempt_text: exam.attempt_text(session.attempt_number),
            remaining_attempts: exam.remaining_attempts(stats.attempts_used),
            message: outcome.status.user_message().to_string(),
            certificate,
            review,
        })
    }

    /// Attempt history and certificate for the user on this exam.
    pub async fn results(&self, user_id: Uuid, exam_id: Uuid) -> Result<ExamResultResponse> {
        let mut conn = self.pool.acquire().await?;
        let exam = load_exam(&mut conn, exam_id).await?;
        let sessions = sqlx::query_as::<_, ExamSession>(
            "SELECT * FROM exam_registrations WHERE user_id = $1 AND exam_id = $2 ORDER BY attempt_number",
        )
        .bind(user_id)
        .bind(exam_id)
        .fetch_all(&mut *conn)
        .await?;
        drop(conn);

        let attempts_used = sessions.len() as i64;
        let passed = sessions.iter().any(|s| s.status == SessionStatus::Passed.as_str());
        let certificate = self.certificate_for(user_id, exam_id).await?.map(certificate_info);

        Ok(ExamResultResponse {
            exam: exam_summary(&exam),
            attempts: sessions
                .into_iter()
                .map(|s| AttemptSummary {
                    registration_id: s.id,
                    attempt_number: s.attempt_number,
                    status: s.status,
                    score: s.score,
                    started_at: s.started_at,
                    finished_at: s.finished_at,
                })
                .collect(),
            attempts_used,
            remaining_attempts: exam.remaining_attempts(attempts_used),
            passed,
            certificate,
        })
    }

    async fn certificate_for(&self, user_id: Uuid, exam_id: Uuid) -> Result<Option<Certificate>> {
        Ok(sqlx::query_as::<_, Certificate>(
            "SELECT * FROM certificates WHERE user_id = $1 AND related_exam_id = $2",
        )
        .bind(user_id)
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?)
    }
}

pub async fn attempt_stats(conn: &mut PgConnection, user_id: Uuid, exam_id: Uuid) -> Result<AttemptStats> {
    Ok(sqlx::query_as::<_, AttemptStats>(
        r#"
        SELECT COUNT(*) AS attempts_used,
               COALESCE(MAX(attempt_number), 0) AS last_attempt_number,
               COALESCE(BOOL_OR(status = 'passed'), FALSE) AS has_passed
        FROM exam_registrations
        WHERE user_id = $1 AND exam_id = $2
        "#,
    )
    .bind(user_id)
    .bind(exam_id)
    .fetch_one(conn)
    .await?)
}

async fn find_active(
    conn: &mut PgConnection,
    user_id: Uuid,
    exam_id: Uuid,
    for_update: bool,
) -> Result<Option<ExamSession>> {
    let sql = if for_update {
        "SELECT * FROM exam_registrations WHERE user_id = $1 AND exam_id = $2 AND status = 'in_progress' FOR UPDATE"
    } else {
        "SELECT * FROM exam_registrations WHERE user_id = $1 AND exam_id = $2 AND status = 'in_progress'"
    };
    Ok(sqlx::query_as::<_, ExamSession>(sql)
        .bind(user_id)
        .bind(exam_id)
        .fetch_optional(conn)
        .await?)
}

pub(crate) async fn stored_answers(conn: &mut PgConnection, registration_id: Uuid) -> Result<Vec<UserAnswer>> {
    Ok(sqlx::query_as::<_, UserAnswer>(
        "SELECT * FROM exam_user_answers WHERE registration_id = $1 ORDER BY question_id",
    )
    .bind(registration_id)
    .fetch_all(conn)
    .await?)
}

/// One stored answer per (session, question); the latest write wins and any
/// earlier manual grade is cleared.
async fn upsert_answer(
    conn: &mut PgConnection,
    registration_id: Uuid,
    question: &Question,
    answer: &AnswerPayload,
) -> Result<DateTime<Utc>> {
    let evaluation = grading_service::evaluate(question, answer);
    let is_correct = match evaluation {
        Evaluation::Correct => Some(true),
        Evaluation::Incorrect => Some(false),
        Evaluation::Manual => None,
    };
    let text = answer.text().map(str::to_string);
    let needs_manual_grading = question.is_text() && text.is_some();

    let (choice_id, choice_ids, answer_text) = match question.question_type {
        QuestionType::Text => (None, None, text),
        QuestionType::MultipleChoice => {
            let mut ids = answer.choice_ids.clone().unwrap_or_default();
            ids.sort_unstable();
            ids.dedup();
            (None, Some(ids), None)
        }
        QuestionType::SingleChoice | QuestionType::TrueFalse => (answer.choice_id, None, None),
    };

    let answered_at: DateTime<Utc> = sqlx::query_scalar(
        r#"
        INSERT INTO exam_user_answers (
            registration_id, question_id, choice_id, choice_ids, answer_text, is_correct,
            needs_manual_grading, answered_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
        ON CONFLICT (registration_id, question_id) DO UPDATE SET
            choice_id = EXCLUDED.choice_id,
            choice_ids = EXCLUDED.choice_ids,
            answer_text = EXCLUDED.answer_text,
            is_correct = EXCLUDED.is_correct,
            needs_manual_grading = EXCLUDED.needs_manual_grading,
            admin_feedback = NULL,
            graded_at = NULL,
            graded_by = NULL,
            answered_at = EXCLUDED.answered_at
        RETURNING answered_at
        "#,
    )
    .bind(registration_id)
    .bind(question.id)
    .bind(choice_id)
    .bind(choice_ids)
    .bind(answer_text)
    .bind(is_correct)
    .bind(needs_manual_grading)
    .fetch_one(conn)
    .await?;
    Ok(answered_at)
}

/// Questions in drawn order with the stored choice order applied and
/// correctness hidden.
async fn presented_questions(
    conn: &mut PgConnection,
    session: &ExamSession,
    saved: &[UserAnswer],
) -> Result<Vec<PresentedQuestion>> {
    let questions = load_questions_by_ids(conn, &session.selected_question_ids).await?;
    Ok(present(session, questions, saved))
}

pub(crate) fn present(
    session: &ExamSession,
    questions: Vec<Question>,
    saved: &[UserAnswer],
) -> Vec<PresentedQuestion> {
    let mut by_id: HashMap<i64, Question> = questions.into_iter().map(|q| (q.id, q)).collect();
    let saved: HashMap<i64, &UserAnswer> = saved.iter().map(|a| (a.question_id, a)).collect();
    let choice_order = session.choice_order();

    session
        .selected_question_ids
        .iter()
        .filter_map(|id| by_id.remove(id))
        .map(|q| {
            let mut choices: Vec<PresentedChoice> = q
                .choices
                .iter()
                .map(|c| PresentedChoice {
                    id: c.id,
                    choice_text: c.choice_text.clone(),
                })
                .collect();
            if let Some(order) = choice_order.get(&q.id) {
                let rank = |id: i64| order.iter().position(|o| *o == id).unwrap_or(usize::MAX);
                choices.sort_by_key(|c| rank(c.id));
            }
            PresentedQuestion {
                id: q.id,
                question_text: q.text,
                question_type: q.question_type.as_str().to_string(),
                question_media: q.media,
                choices,
                saved_answer: saved.get(&q.id).map(|a| AnswerPayload::from(*a)),
            }
        })
        .collect()
}

fn exam_summary(exam: &Exam) -> ExamSummary {
    ExamSummary {
        id: exam.id,
        title: exam.title.clone(),
        description: exam.description.clone(),
        duration_minutes: exam.duration_minutes,
        passing_score: exam.passing_score,
        max_attempts: exam.max_attempts,
        auto_submit: exam.auto_submit,
    }
}

fn session_view(
    exam: &Exam,
    session: &ExamSession,
    questions: Vec<PresentedQuestion>,
    attempts_used: i64,
    at: DateTime<Utc>,
) -> SessionView {
    SessionView {
        registration_id: session.id,
        exam: exam_summary(exam),
        status: session.status.clone(),
        attempt_number: session.attempt_number,
        attempt_text: exam.attempt_text(session.attempt_number),
        remaining_attempts: exam.remaining_attempts(attempts_used),
        started_at: session.started_at,
        time_elapsed_minutes: session.elapsed_minutes(at),
        time_remaining_minutes: session.remaining_minutes(exam.duration_minutes, at),
        time_exceeded: session.time_exceeded(exam.duration_minutes, at),
        total_questions: session.total_questions,
        questions,
    }
}

fn certificate_info(cert: Certificate) -> CertificateInfo {
    CertificateInfo {
        id: cert.id,
        certificate_number: cert.certificate_number,
        issue_date: cert.issue_date,
        pdf_path: cert.pdf_path,
    }
}

/// Per-question feedback, only when the exam reveals answers or explanations
/// and the outcome is already known.
fn result_review(
    exam: &Exam,
    session: &ExamSession,
    questions: &[Question],
    answers: &[AnswerPayload],
    outcome: &SubmissionOutcome,
) -> Vec<QuestionReview> {
    let reveal = exam.show_correct_answers || exam.show_explanations;
    if !reveal || outcome.status == SessionStatus::PendingReview {
        return Vec::new();
    }
    let by_id: HashMap<i64, &Question> = questions.iter().map(|q| (q.id, q)).collect();
    let answers: HashMap<i64, &AnswerPayload> = answers.iter().map(|a| (a.question_id, a)).collect();

    session
        .selected_question_ids
        .iter()
        .filter_map(|id| by_id.get(id))
        .map(|q| QuestionReview {
            question_id: q.id,
            question_text: q.text.clone(),
            is_correct: match answers.get(&q.id).map(|a| grading_service::evaluate(q, a)) {
                Some(Evaluation::Correct) => Some(true),
                Some(Evaluation::Manual) => None,
                _ if q.is_text() => None,
                _ => Some(false),
            },
            correct_choice_ids: exam
                .show_correct_answers
                .then(|| q.correct_choice_ids().into_iter().collect()),
            explanation: if exam.show_explanations {
                q.explanation.clone()
            } else {
                None
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::exam::fixtures::exam;
    use crate::models::question::fixtures::{question, text_question};
    use chrono::Duration;
    use serde_json::json;

    fn stats(attempts_used: i64, has_passed: bool) -> AttemptStats {
        AttemptStats {
            attempts_used,
            last_attempt_number: attempts_used as i32,
            has_passed,
        }
    }

    #[test]
    fn capped_exam_already_passed_wins_over_limit() {
        let mut e = exam(50);
        e.max_attempts = Some(1);
        assert!(matches!(
            check_can_start(&e, &stats(1, true), false, Utc::now()),
            Err(Error::AlreadyPassed)
        ));
    }

    #[test]
    fn limit_counts_every_attempt() {
        let mut e = exam(50);
        e.max_attempts = Some(2);
        assert!(check_can_start(&e, &stats(1, false), false, Utc::now()).is_ok());
        match check_can_start(&e, &stats(2, false), false, Utc::now()) {
            Err(Error::AttemptLimitExceeded {
                max_attempts,
                attempts_used,
            }) => {
                assert_eq!(max_attempts, 2);
                assert_eq!(attempts_used, 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn uncapped_exam_can_be_retaken_after_passing() {
        let e = exam(50);
        assert!(check_can_start(&e, &stats(5, true), false, Utc::now()).is_ok());
        assert!(matches!(
            check_can_start(&e, &stats(5, true), true, Utc::now()),
            Err(Error::ActiveAttemptExists)
        ));
    }

    #[test]
    fn outside_the_window_is_unavailable() {
        let mut e = exam(50);
        e.end_date = Some(Utc::now() - Duration::days(1));
        assert!(matches!(
            check_can_start(&e, &stats(0, false), false, Utc::now()),
            Err(Error::ExamNotAvailable)
        ));
    }

    #[test]
    fn presentation_follows_drawn_and_choice_order() {
        let now = Utc::now();
        let session = ExamSession {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            exam_id: Uuid::new_v4(),
            attempt_number: 1,
            status: "in_progress".into(),
            selected_question_ids: vec![2, 1, 3],
            choice_order: json!({ "2": [23, 21, 22] }),
            total_questions: 3,
            started_at: now,
            finished_at: None,
            score: None,
            needs_manual_grading: false,
            auto_graded_score: None,
            admin_notes: None,
            graded_at: None,
            graded_by: None,
            certificate_id: None,
            created_at: now,
            updated_at: now,
        };
        let questions = vec![
            question(1, QuestionType::SingleChoice, &[true, false]),
            question(2, QuestionType::MultipleChoice, &[true, false, true]),
            text_question(3),
        ];

        let presented = present(&session, questions, &[]);
        let ids: Vec<i64> = presented.iter().map(|q| q.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        let order: Vec<i64> = presented[0].choices.iter().map(|c| c.id).collect();
        assert_eq!(order, vec![23, 21, 22]);
        let order: Vec<i64> = presented[1].choices.iter().map(|c| c.id).collect();
        assert_eq!(order, vec![11, 12]);
        assert!(presented[2].choices.is_empty());
        // correctness never leaves the server
        let body = serde_json::to_value(&presented).unwrap();
        assert!(!body.to_string().contains("is_correct"));
    }
}
