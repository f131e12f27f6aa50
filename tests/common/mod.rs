#![allow(dead_code)]

use std::env;
use std::sync::{Arc, Mutex};

use aqrar_exam_backend::dto::exam_dto::{CreateChoiceRequest, CreateExamRequest, CreateQuestionRequest};
use aqrar_exam_backend::error::Result;
use aqrar_exam_backend::models::exam::Exam;
use aqrar_exam_backend::models::question::{Question, QuestionType};
use aqrar_exam_backend::services::certificate_service::{CertificateIssuer, PgCertificateIssuer};
use aqrar_exam_backend::services::notification_service::{Notifier, ResultNotification};
use aqrar_exam_backend::services::training_gate::PgTrainingGate;
use aqrar_exam_backend::AppState;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub sent: Arc<Mutex<Vec<ResultNotification>>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &ResultNotification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub struct TestContext {
    pub pool: PgPool,
    pub state: AppState,
    pub notifier: RecordingNotifier,
}

/// Connects and migrates, or returns `None` when no database is configured.
pub async fn setup() -> Option<TestContext> {
    setup_with(|pool| Arc::new(PgCertificateIssuer::new(pool, None, "/tmp".into()))).await
}

/// Like [`setup`], with the certificate issuer built by `issuer`.
pub async fn setup_with<F>(issuer: F) -> Option<TestContext>
where
    F: FnOnce(PgPool) -> Arc<dyn CertificateIssuer>,
{
    dotenvy::dotenv().ok();
    let database_url = env::var("DATABASE_URL").ok()?;

    env::set_var("SERVER_ADDRESS", "127.0.0.1:0");
    env::set_var("JWT_SECRET", "test_secret_key");
    env::set_var("WEBHOOK_SECRET", "whsec_test");
    env::set_var("NOTIFICATION_WEBHOOK_URL", "");
    env::set_var("PUBLIC_RPS", "1000");
    env::set_var("ADMIN_RPS", "1000");
    aqrar_exam_backend::config::ensure_config().expect("config");

    let pool = aqrar_exam_backend::database::pool::connect(&database_url, 5)
        .await
        .expect("pool");
    aqrar_exam_backend::database::pool::run_migrations(&pool)
        .await
        .expect("migrations");

    let notifier = RecordingNotifier::default();
    let state = AppState::with_collaborators(
        pool.clone(),
        Arc::new(PgTrainingGate::new(pool.clone())),
        issuer(pool.clone()),
        Arc::new(notifier.clone()),
    );
    Some(TestContext {
        pool,
        state,
        notifier,
    })
}

pub async fn seed_user(pool: &PgPool, role: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, email, first_name, last_name, role) VALUES ($1, $2, $3, $4, $5)")
        .bind(id)
        .bind(format!("user_{}@example.com", id))
        .bind("Test")
        .bind("Farmer")
        .bind(role)
        .execute(pool)
        .await
        .expect("seed user");
    id
}

pub async fn seed_training(pool: &PgPool, training_type: &str, exam_required: bool, has_certificate: bool) -> Uuid {
    sqlx::query_scalar(
        "INSERT INTO trainings (title, training_type, exam_required, has_certificate) \
         VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind("Orchard care")
    .bind(training_type)
    .bind(exam_required)
    .bind(has_certificate)
    .fetch_one(pool)
    .await
    .expect("seed training")
}

pub async fn complete_training(pool: &PgPool, user_id: Uuid, training_id: Uuid) {
    sqlx::query(
        "INSERT INTO training_registrations (user_id, training_id, status) VALUES ($1, $2, 'completed') \
         ON CONFLICT (user_id, training_id) DO UPDATE SET status = 'completed'",
    )
    .bind(user_id)
    .bind(training_id)
    .execute(pool)
    .await
    .expect("complete training");
}

pub fn exam_request(passing_score: i32) -> CreateExamRequest {
    CreateExamRequest {
        training_id: None,
        title: "Soil health".into(),
        description: None,
        passing_score,
        duration_minutes: 30,
        max_attempts: None,
        exam_question_count: Some(0),
        shuffle_questions: None,
        shuffle_choices: None,
        show_results_immediately: None,
        show_correct_answers: None,
        show_explanations: None,
        auto_submit: None,
        start_date: None,
        end_date: None,
    }
}

pub async fn create_exam(state: &AppState, request: CreateExamRequest) -> Exam {
    state.question_bank.create_exam(request).await.expect("create exam")
}

/// Adds a question; `correct` flags one choice each.
pub async fn add_question(state: &AppState, exam_id: Uuid, question_type: QuestionType, correct: &[bool]) -> Question {
    let request = CreateQuestionRequest {
        question_text: format!("{} question", question_type.as_str()),
        question_type,
        sequence: None,
        is_required: None,
        question_media: None,
        explanation: Some("Because agronomy.".into()),
        choices: correct
            .iter()
            .enumerate()
            .map(|(n, c)| CreateChoiceRequest {
                choice_text: format!("option {}", n + 1),
                is_correct: *c,
                explanation: None,
            })
            .collect(),
    };
    state.question_bank.add_question(exam_id, request).await.expect("add question")
}

pub fn correct_choice(question: &Question) -> i64 {
    question.choices.iter().find(|c| c.is_correct).expect("correct choice").id
}

pub fn wrong_choice(question: &Question) -> i64 {
    question.choices.iter().find(|c| !c.is_correct).expect("wrong choice").id
}
