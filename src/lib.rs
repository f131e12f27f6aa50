pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use reqwest::Client;
use sqlx::PgPool;

use crate::services::{
    attempt_service::AttemptService,
    certificate_service::{CertificateIssuer, PgCertificateIssuer},
    notification_service::{Notifier, WebhookNotifier},
    outbox_service::OutboxService,
    question_bank::QuestionBank,
    review_service::ReviewService,
    training_gate::{PgTrainingGate, TrainingGate},
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub question_bank: QuestionBank,
    pub attempt_service: AttemptService,
    pub review_service: ReviewService,
    pub outbox_service: OutboxService,
}

impl AppState {
    pub fn new(pool: PgPool) -> error::Result<Self> {
        let config = config::get_config();
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;

        let gate = Arc::new(PgTrainingGate::new(pool.clone()));
        let issuer = Arc::new(PgCertificateIssuer::new(
            pool.clone(),
            config.certificate_script.clone(),
            config.certificate_output_dir.clone(),
        ));
        let notifier = Arc::new(WebhookNotifier::new(
            http_client,
            config.notification_webhook_url.clone(),
            config.webhook_secret.clone(),
        ));
        Ok(Self::with_collaborators(pool, gate, issuer, notifier))
    }

    /// Wires the services around the given collaborators.
    pub fn with_collaborators(
        pool: PgPool,
        gate: Arc<dyn TrainingGate>,
        issuer: Arc<dyn CertificateIssuer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let outbox_service = OutboxService::new(pool.clone(), issuer, notifier);
        Self {
            question_bank: QuestionBank::new(pool.clone()),
            attempt_service: AttemptService::new(pool.clone(), gate, outbox_service.clone()),
            review_service: ReviewService::new(pool.clone(), outbox_service.clone()),
            outbox_service,
            pool,
        }
    }
}
