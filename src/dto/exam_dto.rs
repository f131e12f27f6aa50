use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::Validate;

use crate::models::user_answer::UserAnswer;

/// One answer as sent by the examinee. Which field is set depends on the
/// question type: `choice_id` for single choice and true/false,
/// `choice_ids` for multiple choice, `answer_text` for text.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct AnswerPayload {
    #[validate(range(min = 1))]
    pub question_id: i64,
    pub choice_id: Option<i64>,
    pub choice_ids: Option<Vec<i64>>,
    #[validate(length(max = 10000))]
    pub answer_text: Option<String>,
}

impl AnswerPayload {
    /// Trimmed text, `None` when blank.
    pub fn text(&self) -> Option<&str> {
        self.answer_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

impl From<&UserAnswer> for AnswerPayload {
    fn from(answer: &UserAnswer) -> Self {
        Self {
            question_id: answer.question_id,
            choice_id: answer.choice_id,
            choice_ids: answer.choice_ids.clone(),
            answer_text: answer.answer_text.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitExamRequest {
    #[validate(nested)]
    pub answers: Vec<AnswerPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentedChoice {
    pub id: i64,
    pub choice_text: String,
}

/// A question as the examinee sees it: no correctness flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentedQuestion {
    pub id: i64,
    pub question_text: String,
    pub question_type: String,
    pub question_media: Option<JsonValue>,
    pub choices: Vec<PresentedChoice>,
    pub saved_answer: Option<AnswerPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSummary {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub duration_minutes: i32,
    pub passing_score: i32,
    pub max_attempts: Option<i32>,
    pub auto_submit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub registration_id: Uuid,
    pub exam: ExamSummary,
    pub status: String,
    pub attempt_number: i32,
    pub attempt_text: String,
    pub remaining_attempts: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub time_elapsed_minutes: i64,
    pub time_remaining_minutes: i64,
    pub time_exceeded: bool,
    pub total_questions: i32,
    pub questions: Vec<PresentedQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAnswerResponse {
    pub saved: bool,
    pub question_id: i64,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub id: Uuid,
    pub certificate_number: String,
    pub issue_date: chrono::NaiveDate,
    pub pdf_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionReview {
    pub question_id: i64,
    pub question_text: String,
    pub is_correct: Option<bool>,
    pub correct_choice_ids: Option<Vec<i64>>,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitExamResponse {
    pub registration_id: Uuid,
    pub status: String,
    pub score: i32,
    pub passed: bool,
    pub passing_score: i32,
    pub correct_answers: usize,
    pub total_questions: i32,
    pub text_questions: usize,
    pub needs_manual_grading: bool,
    pub time_exceeded: bool,
    pub attempt_number: i32,
    pub attempt_text: String,
    pub remaining_attempts: Option<i64>,
    pub message: String,
    pub certificate: Option<CertificateInfo>,
    /// Only filled when the exam shows correct answers or explanations.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub review: Vec<QuestionReview>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub registration_id: Uuid,
    pub attempt_number: i32,
    pub status: String,
    pub score: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamResultResponse {
    pub exam: ExamSummary,
    pub attempts: Vec<AttemptSummary>,
    pub attempts_used: i64,
    pub remaining_attempts: Option<i64>,
    pub passed: bool,
    pub certificate: Option<CertificateInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateChoiceRequest {
    #[validate(length(min = 1, max = 2000))]
    pub choice_text: String,
    #[serde(default)]
    pub is_correct: bool,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    #[validate(length(min = 1, max = 5000))]
    pub question_text: String,
    pub question_type: crate::models::question::QuestionType,
    pub sequence: Option<i32>,
    pub is_required: Option<bool>,
    pub question_media: Option<JsonValue>,
    pub explanation: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub choices: Vec<CreateChoiceRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateExamRequest {
    pub training_id: Option<Uuid>,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub description: Option<String>,
    #[validate(range(min = 0, max = 100))]
    pub passing_score: i32,
    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: i32,
    #[validate(range(min = 1))]
    pub max_attempts: Option<i32>,
    #[validate(range(min = 0))]
    pub exam_question_count: Option<i32>,
    pub shuffle_questions: Option<bool>,
    pub shuffle_choices: Option<bool>,
    pub show_results_immediately: Option<bool>,
    pub show_correct_answers: Option<bool>,
    pub show_explanations: Option<bool>,
    pub auto_submit: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingReviewItem {
    pub registration_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub user_email: String,
    pub exam_id: Uuid,
    pub exam_title: String,
    pub attempt_number: i32,
    pub auto_graded_score: Option<i32>,
    pub text_answers_pending: i64,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingAnswerView {
    pub answer_id: Uuid,
    pub question_id: i64,
    pub question_text: String,
    pub question_type: String,
    pub choice_id: Option<i64>,
    pub choice_ids: Option<Vec<i64>>,
    pub answer_text: Option<String>,
    pub is_correct: Option<bool>,
    pub needs_manual_grading: bool,
    pub admin_feedback: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingView {
    pub registration_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub exam_id: Uuid,
    pub exam_title: String,
    pub passing_score: i32,
    pub status: String,
    pub total_questions: i32,
    pub text_questions: usize,
    pub correct_answers: usize,
    pub current_score: Option<i32>,
    pub auto_graded_score: Option<i32>,
    pub answers: Vec<GradingAnswerView>,
}

/// Feedback per language. Only `az`, `en` and `ru` are kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Feedback {
    pub az: Option<String>,
    pub en: Option<String>,
    pub ru: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TextGrade {
    pub answer_id: Uuid,
    pub is_correct: bool,
    pub feedback: Option<Feedback>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GradeTextRequest {
    #[validate(length(min = 1))]
    pub grades: Vec<TextGrade>,
    #[validate(length(max = 5000))]
    pub admin_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeTextResponse {
    pub registration_id: Uuid,
    pub status: String,
    pub score: i32,
    pub passed: bool,
    pub auto_graded_correct: usize,
    pub text_questions_correct: usize,
    pub total_correct: usize,
    pub total_questions: i32,
}
