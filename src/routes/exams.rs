use axum::{
    extract::{Path, State},
    response::Json,
    Extension,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use uuid::Uuid;
use validator::Validate;

use crate::dto::exam_dto::{
    AnswerPayload, ExamResultResponse, SaveAnswerResponse, SessionView, SubmitExamRequest,
    SubmitExamResponse,
};
use crate::error::Result;
use crate::middleware::auth::Claims;
use crate::AppState;

#[axum::debug_handler]
pub async fn start_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<Json<SessionView>> {
    let user_id = claims.user_id()?;
    let mut rng = StdRng::from_entropy();
    let view = state
        .attempt_service
        .start_session(user_id, exam_id, &mut rng)
        .await
        .map_err(|e| {
            tracing::info!(%user_id, %exam_id, error = %e, "exam start refused");
            e
        })?;
    Ok(Json(view))
}

#[axum::debug_handler]
pub async fn get_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<Json<SessionView>> {
    let view = state
        .attempt_service
        .current_session(claims.user_id()?, exam_id)
        .await?;
    Ok(Json(view))
}

#[axum::debug_handler]
pub async fn save_answer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
    Json(req): Json<AnswerPayload>,
) -> Result<Json<SaveAnswerResponse>> {
    req.validate()?;
    let saved = state
        .attempt_service
        .save_answer(claims.user_id()?, exam_id, req)
        .await?;
    Ok(Json(saved))
}

#[axum::debug_handler]
pub async fn submit_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
    Json(req): Json<SubmitExamRequest>,
) -> Result<Json<SubmitExamResponse>> {
    req.validate()?;
    let result = state
        .attempt_service
        .submit(claims.user_id()?, exam_id, req.answers)
        .await?;
    Ok(Json(result))
}

#[axum::debug_handler]
pub async fn get_results(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<Json<ExamResultResponse>> {
    let results = state
        .attempt_service
        .results(claims.user_id()?, exam_id)
        .await?;
    Ok(Json(results))
}
