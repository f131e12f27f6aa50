use std::collections::HashMap;

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::dto::exam_dto::{CreateExamRequest, CreateQuestionRequest};
use crate::error::{Error, Result};
use crate::models::exam::Exam;
use crate::models::question::{Choice, Question, QuestionRow, QuestionType};

const QUESTION_COLUMNS: &str =
    "id, exam_id, question_text, question_type, sequence, is_required, question_media, explanation";

pub async fn load_exam(conn: &mut PgConnection, exam_id: Uuid) -> Result<Exam> {
    sqlx::query_as::<_, Exam>("SELECT * FROM exams WHERE id = $1")
        .bind(exam_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Exam {} not found", exam_id)))
}

/// Questions of an exam, ordered by sequence. `required_only` restricts the
/// result to the draw pool.
pub async fn load_questions(
    conn: &mut PgConnection,
    exam_id: Uuid,
    required_only: bool,
) -> Result<Vec<Question>> {
    let rows = sqlx::query_as::<_, QuestionRow>(&format!(
        "SELECT {} FROM exam_questions WHERE exam_id = $1 AND ($2 = FALSE OR is_required) \
         ORDER BY sequence, id",
        QUESTION_COLUMNS
    ))
    .bind(exam_id)
    .bind(required_only)
    .fetch_all(&mut *conn)
    .await?;
    attach_choices(conn, rows).await
}

/// Current definitions of the given questions. Ids that no longer exist are
/// silently missing from the result.
pub async fn load_questions_by_ids(conn: &mut PgConnection, ids: &[i64]) -> Result<Vec<Question>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, QuestionRow>(&format!(
        "SELECT {} FROM exam_questions WHERE id = ANY($1) ORDER BY sequence, id",
        QUESTION_COLUMNS
    ))
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;
    attach_choices(conn, rows).await
}

async fn attach_choices(conn: &mut PgConnection, rows: Vec<QuestionRow>) -> Result<Vec<Question>> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let choices = sqlx::query_as::<_, Choice>(
        "SELECT id, question_id, choice_text, is_correct, sequence, explanation \
         FROM exam_choices WHERE question_id = ANY($1)",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_question: HashMap<i64, Vec<Choice>> = HashMap::new();
    for c in choices {
        by_question.entry(c.question_id).or_default().push(c);
    }

    rows.into_iter()
        .map(|row| {
            let choices = by_question.remove(&row.id).unwrap_or_default();
            Question::from_row(row, choices)
        })
        .collect()
}

/// Exam authoring.
#[derive(Clone)]
pub struct QuestionBank {
    pool: PgPool,
}

impl QuestionBank {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_exam(&self, exam_id: Uuid) -> Result<Exam> {
        let mut conn = self.pool.acquire().await?;
        load_exam(&mut conn, exam_id).await
    }

    pub async fn questions(&self, exam_id: Uuid) -> Result<Vec<Question>> {
        let mut conn = self.pool.acquire().await?;
        load_questions(&mut conn, exam_id, false).await
    }

    pub async fn create_exam(&self, payload: CreateExamRequest) -> Result<Exam> {
        if let (Some(start), Some(end)) = (payload.start_date, payload.end_date) {
            if end < start {
                return Err(Error::BadRequest(
                    "end_date must not be before start_date".to_string(),
                ));
            }
        }

        let exam = sqlx::query_as::<_, Exam>(
            r#"
            INSERT INTO exams (
                training_id, title, description, passing_score, duration_minutes, max_attempts,
                exam_question_count, shuffle_questions, shuffle_choices, show_results_immediately,
                show_correct_answers, show_explanations, auto_submit, start_date, end_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING *
            "#,
        )
        .bind(payload.training_id)
        .bind(payload.title)
        .bind(payload.description)
        .bind(payload.passing_score)
        .bind(payload.duration_minutes)
        .bind(payload.max_attempts)
        .bind(payload.exam_question_count.unwrap_or(10))
        .bind(payload.shuffle_questions.unwrap_or(false))
        .bind(payload.shuffle_choices.unwrap_or(false))
        .bind(payload.show_results_immediately.unwrap_or(false))
        .bind(payload.show_correct_answers.unwrap_or(false))
        .bind(payload.show_explanations.unwrap_or(false))
        .bind(payload.auto_submit.unwrap_or(false))
        .bind(payload.start_date)
        .bind(payload.end_date)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(exam_id = %exam.id, title = %exam.title, "exam created");
        Ok(exam)
    }

    pub async fn add_question(&self, exam_id: Uuid, payload: CreateQuestionRequest) -> Result<Question> {
        validate_choices(&payload)?;

        let mut tx = self.pool.begin().await?;
        load_exam(&mut tx, exam_id).await?;

        let sequence = match payload.sequence {
            Some(s) => s,
            None => {
                sqlx::query_scalar::<_, i32>(
                    "SELECT COALESCE(MAX(sequence), 0) + 1 FROM exam_questions WHERE exam_id = $1",
                )
                .bind(exam_id)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let row = sqlx::query_as::<_, QuestionRow>(&format!(
            "INSERT INTO exam_questions \
             (exam_id, question_text, question_type, sequence, is_required, question_media, explanation) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            QUESTION_COLUMNS
        ))
        .bind(exam_id)
        .bind(&payload.question_text)
        .bind(payload.question_type.as_str())
        .bind(sequence)
        .bind(payload.is_required.unwrap_or(true))
        .bind(&payload.question_media)
        .bind(&payload.explanation)
        .fetch_one(&mut *tx)
        .await?;

        let mut choices = Vec::with_capacity(payload.choices.len());
        for (n, c) in payload.choices.iter().enumerate() {
            let choice = sqlx::query_as::<_, Choice>(
                "INSERT INTO exam_choices (question_id, choice_text, is_correct, sequence, explanation) \
                 VALUES ($1, $2, $3, $4, $5) \
                 RETURNING id, question_id, choice_text, is_correct, sequence, explanation",
            )
            .bind(row.id)
            .bind(&c.choice_text)
            .bind(c.is_correct)
            .bind(n as i32 + 1)
            .bind(&c.explanation)
            .fetch_one(&mut *tx)
            .await?;
            choices.push(choice);
        }

        tx.commit().await?;
        Question::from_row(row, choices)
    }

    /// Exams that have sessions cannot be removed.
    pub async fn delete_exam(&self, exam_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        load_exam(&mut tx, exam_id).await?;

        let sessions: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM exam_registrations WHERE exam_id = $1")
                .bind(exam_id)
                .fetch_one(&mut *tx)
                .await?;
        if sessions > 0 {
            return Err(Error::Conflict(format!(
                "Exam has {} session(s) and cannot be deleted",
                sessions
            )));
        }

        sqlx::query("DELETE FROM exams WHERE id = $1")
            .bind(exam_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(exam_id = %exam_id, "exam deleted");
        Ok(())
    }
}

fn validate_choices(payload: &CreateQuestionRequest) -> Result<()> {
    let correct = payload.choices.iter().filter(|c| c.is_correct).count();
    let ok = match payload.question_type {
        QuestionType::Text => payload.choices.is_empty(),
        QuestionType::SingleChoice => payload.choices.len() >= 2 && correct == 1,
        QuestionType::TrueFalse => payload.choices.len() == 2 && correct == 1,
        QuestionType::MultipleChoice => payload.choices.len() >= 2 && correct >= 1,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::BadRequest(format!(
            "Invalid choices for a {} question",
            payload.question_type.as_str()
        )))
    }
}
