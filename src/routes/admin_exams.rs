use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::dto::exam_dto::{CreateExamRequest, CreateQuestionRequest};
use crate::error::Result;
use crate::models::exam::Exam;
use crate::models::question::Question;
use crate::AppState;

#[axum::debug_handler]
pub async fn create_exam(
    State(state): State<AppState>,
    Json(req): Json<CreateExamRequest>,
) -> Result<(StatusCode, Json<Exam>)> {
    req.validate()?;
    let exam = state.question_bank.create_exam(req).await?;
    Ok((StatusCode::CREATED, Json(exam)))
}

#[axum::debug_handler]
pub async fn get_exam_questions(
    State(state): State<AppState>,
    Path(exam_id): Path<Uuid>,
) -> Result<Json<Vec<Question>>> {
    Ok(Json(state.question_bank.questions(exam_id).await?))
}

#[axum::debug_handler]
pub async fn add_question(
    State(state): State<AppState>,
    Path(exam_id): Path<Uuid>,
    Json(req): Json<CreateQuestionRequest>,
) -> Result<(StatusCode, Json<Question>)> {
    req.validate()?;
    let question = state.question_bank.add_question(exam_id, req).await?;
    Ok((StatusCode::CREATED, Json(question)))
}

#[axum::debug_handler]
pub async fn delete_exam(
    State(state): State<AppState>,
    Path(exam_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.question_bank.delete_exam(exam_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
