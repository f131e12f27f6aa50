pub mod admin_exams;
pub mod exams;
pub mod health;
pub mod reviews;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post},
    Router,
};

use crate::middleware::auth::{require_bearer_auth, require_staff};
use crate::middleware::rate_limit::{rps_middleware, RateLimiter};
use crate::AppState;

pub fn router(state: AppState, user_rps: u32, admin_rps: u32) -> Router {
    let user_api = Router::new()
        .route("/api/exams/:id/start", post(exams::start_exam))
        .route("/api/exams/:id/session", get(exams::get_session))
        .route("/api/exams/:id/answer", patch(exams::save_answer))
        .route("/api/exams/:id/submit", post(exams::submit_exam))
        .route("/api/exams/:id/result", get(exams::get_results))
        .layer(from_fn_with_state(RateLimiter::new(user_rps), rps_middleware))
        .layer(from_fn(require_bearer_auth));

    let admin_api = Router::new()
        .route("/api/admin/reviews", get(reviews::list_pending_reviews))
        .route(
            "/api/admin/reviews/:registration_id",
            get(reviews::get_grading_view),
        )
        .route(
            "/api/admin/reviews/:registration_id/grade",
            post(reviews::grade_text_answers),
        )
        .route("/api/admin/exams", post(admin_exams::create_exam))
        .route(
            "/api/admin/exams/:id",
            axum::routing::delete(admin_exams::delete_exam),
        )
        .route(
            "/api/admin/exams/:id/questions",
            get(admin_exams::get_exam_questions).post(admin_exams::add_question),
        )
        .layer(from_fn_with_state(RateLimiter::new(admin_rps), rps_middleware))
        .layer(from_fn(require_staff));

    Router::new()
        .route("/health", get(health::health))
        .merge(user_api)
        .merge(admin_api)
        .with_state(state)
}
