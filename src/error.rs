use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, Error>;

const SINGLE_ACTIVE_INDEX: &str = "exam_registrations_single_active";
const ATTEMPT_NUMBER_CONSTRAINT: &str = "exam_registrations_user_id_exam_id_attempt_number_key";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Maximum number of attempts ({max_attempts}) has been used")]
    AttemptLimitExceeded { max_attempts: i32, attempts_used: i64 },

    #[error("Exam has already been passed")]
    AlreadyPassed,

    #[error("Exam has no questions to draw from")]
    NoQuestionsAvailable,

    #[error("No active attempt for this exam")]
    NoActiveAttempt,

    #[error("An attempt for this exam is already in progress")]
    ActiveAttemptExists,

    #[error("Exam session is not pending review")]
    NotPendingReview,

    #[error("Prerequisite training has not been completed")]
    PrerequisiteNotMet { training_id: uuid::Uuid },

    #[error("Invalid answer payload: {0}")]
    InvalidAnswerPayload(String),

    #[error("Exam is not available at this time")]
    ExamNotAvailable,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code returned alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            Error::AttemptLimitExceeded { .. } => "attempt_limit_exceeded",
            Error::AlreadyPassed => "already_passed",
            Error::NoQuestionsAvailable => "no_questions_available",
            Error::NoActiveAttempt => "no_active_attempt",
            Error::ActiveAttemptExists => "active_attempt_exists",
            Error::NotPendingReview => "not_pending_review",
            Error::PrerequisiteNotMet { .. } => "prerequisite_not_met",
            Error::InvalidAnswerPayload(_) => "invalid_answer_payload",
            Error::ExamNotAvailable => "exam_not_available",
            Error::BadRequest(_) | Error::Validation(_) | Error::Json(_) => "bad_request",
            Error::Unauthorized(_) => "unauthorized",
            Error::Conflict(_) => "conflict",
            Error::NotFound(_) => "not_found",
            Error::Reqwest(_) => "upstream_error",
            _ => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::AttemptLimitExceeded { .. }
            | Error::AlreadyPassed
            | Error::PrerequisiteNotMet { .. }
            | Error::ExamNotAvailable => StatusCode::FORBIDDEN,
            Error::NoQuestionsAvailable | Error::InvalidAnswerPayload(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Error::NoActiveAttempt | Error::ActiveAttemptExists | Error::Conflict(_) => {
                StatusCode::CONFLICT
            }
            Error::NotPendingReview
            | Error::BadRequest(_)
            | Error::Validation(_)
            | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Reqwest(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let code = self.code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self, "request failed");
            "An unexpected error occurred".to_string()
        } else {
            self.to_string()
        };

        let mut body = json!({ "error": code, "message": message });
        match &self {
            Error::AttemptLimitExceeded {
                max_attempts,
                attempts_used,
            } => {
                body["max_attempts"] = json!(max_attempts);
                body["attempts_used"] = json!(attempts_used);
            }
            Error::PrerequisiteNotMet { training_id } => {
                body["training_id"] = json!(training_id);
            }
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db)
                if matches!(
                    db.constraint(),
                    Some(SINGLE_ACTIVE_INDEX) | Some(ATTEMPT_NUMBER_CONSTRAINT)
                ) =>
            {
                Error::ActiveAttemptExists
            }
            other => Error::Database(other),
        }
    }
}
