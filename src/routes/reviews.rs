use axum::{
    extract::{Path, State},
    response::Json,
    Extension,
};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;
use validator::Validate;

use crate::dto::exam_dto::{GradeTextRequest, GradeTextResponse, GradingView};
use crate::error::Result;
use crate::middleware::auth::Claims;
use crate::AppState;

#[axum::debug_handler]
pub async fn list_pending_reviews(State(state): State<AppState>) -> Result<Json<JsonValue>> {
    let items = state.review_service.list_pending().await?;
    Ok(Json(json!({ "total": items.len(), "items": items })))
}

#[axum::debug_handler]
pub async fn get_grading_view(
    State(state): State<AppState>,
    Path(registration_id): Path<Uuid>,
) -> Result<Json<GradingView>> {
    Ok(Json(state.review_service.grading_view(registration_id).await?))
}

#[axum::debug_handler]
pub async fn grade_text_answers(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(registration_id): Path<Uuid>,
    Json(req): Json<GradeTextRequest>,
) -> Result<Json<GradeTextResponse>> {
    req.validate()?;
    let grader_id = claims.user_id()?;
    let graded = state
        .review_service
        .grade_text(registration_id, grader_id, req)
        .await?;
    Ok(Json(graded))
}
