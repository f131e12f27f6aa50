mod common;

use std::sync::Arc;
use std::time::Duration;

use aqrar_exam_backend::dto::exam_dto::{AnswerPayload, GradeTextRequest, TextGrade};
use aqrar_exam_backend::error::{Error, Result};
use aqrar_exam_backend::models::certificate::Certificate;
use aqrar_exam_backend::models::question::QuestionType;
use aqrar_exam_backend::services::certificate_service::{CertificateIssuer, CertificateRequest};
use async_trait::async_trait;
use common::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use uuid::Uuid;

/// Renderer that never finishes.
struct StalledIssuer;

#[async_trait]
impl CertificateIssuer for StalledIssuer {
    async fn issue(&self, _request: &CertificateRequest) -> Result<Certificate> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(Error::Internal("renderer gave up".into()))
    }
}

async fn stalled() -> Option<TestContext> {
    setup_with(|_| Arc::new(StalledIssuer)).await
}

#[tokio::test]
async fn submit_answers_while_the_certificate_is_still_rendering() {
    let Some(ctx) = stalled().await else { return };
    let user = seed_user(&ctx.pool, "farmer").await;
    let training = seed_training(&ctx.pool, "online", false, true).await;
    let mut req = exam_request(50);
    req.training_id = Some(training);
    let exam = create_exam(&ctx.state, req).await;
    let q = add_question(&ctx.state, exam.id, QuestionType::SingleChoice, &[true, false]).await;

    let svc = &ctx.state.attempt_service;
    svc.start_session(user, exam.id, &mut StdRng::seed_from_u64(11)).await.unwrap();
    let answers = vec![AnswerPayload {
        question_id: q.id,
        choice_id: Some(correct_choice(&q)),
        ..Default::default()
    }];

    let result = tokio::time::timeout(Duration::from_secs(10), svc.submit(user, exam.id, answers))
        .await
        .expect("submit returned without waiting on the renderer")
        .unwrap();
    assert_eq!(result.status, "passed");
    assert!(result.certificate.is_none());

    // left for the worker
    let status: String = sqlx::query_scalar(
        "SELECT status FROM outbox_events WHERE event_type = 'certificate.issue' AND payload->>'registration_id' = $1",
    )
    .bind(result.registration_id.to_string())
    .fetch_one(&ctx.pool)
    .await
    .unwrap();
    assert_ne!(status, "done");
}

#[tokio::test]
async fn grading_answers_while_the_certificate_is_still_rendering() {
    let Some(ctx) = stalled().await else { return };
    let user = seed_user(&ctx.pool, "farmer").await;
    let grader = seed_user(&ctx.pool, "trainer").await;
    let training = seed_training(&ctx.pool, "online", false, true).await;
    let mut req = exam_request(50);
    req.training_id = Some(training);
    req.show_results_immediately = Some(false);
    let exam = create_exam(&ctx.state, req).await;
    let q = add_question(&ctx.state, exam.id, QuestionType::SingleChoice, &[true, false]).await;
    let t = add_question(&ctx.state, exam.id, QuestionType::Text, &[]).await;

    let svc = &ctx.state.attempt_service;
    svc.start_session(user, exam.id, &mut StdRng::seed_from_u64(12)).await.unwrap();
    let submitted = svc
        .submit(
            user,
            exam.id,
            vec![
                AnswerPayload {
                    question_id: q.id,
                    choice_id: Some(correct_choice(&q)),
                    ..Default::default()
                },
                AnswerPayload {
                    question_id: t.id,
                    answer_text: Some("Mulch keeps moisture in".into()),
                    ..Default::default()
                },
            ],
        )
        .await
        .unwrap();
    assert_eq!(submitted.status, "pending_review");

    let answer_id: Uuid =
        sqlx::query_scalar("SELECT id FROM exam_user_answers WHERE registration_id = $1 AND question_id = $2")
            .bind(submitted.registration_id)
            .bind(t.id)
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
    let request = GradeTextRequest {
        grades: vec![TextGrade {
            answer_id,
            is_correct: true,
            feedback: None,
        }],
        admin_notes: None,
    };

    let graded = tokio::time::timeout(
        Duration::from_secs(10),
        ctx.state.review_service.grade_text(submitted.registration_id, grader, request),
    )
    .await
    .expect("grading returned without waiting on the renderer")
    .unwrap();
    assert_eq!(graded.status, "passed");
}
