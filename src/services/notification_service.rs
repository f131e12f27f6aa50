use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::services::grading_service::OutcomeKind;

/// Body of the exam result notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultNotification {
    pub event: String,
    pub registration_id: Uuid,
    pub user_id: Uuid,
    pub user_email: String,
    pub user_name: String,
    pub exam_id: Uuid,
    pub exam_title: String,
    pub outcome: OutcomeKind,
    pub score: Option<i32>,
    pub attempt_number: i32,
    pub certificate_number: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &ResultNotification) -> Result<()>;
}

/// Posts notifications to a webhook, signed with `X-Webhook-Secret`.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    target_url: String,
    secret: String,
}

impl WebhookNotifier {
    pub fn new(client: Client, target_url: String, secret: String) -> Self {
        Self {
            client,
            target_url,
            secret,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &ResultNotification) -> Result<()> {
        if self.target_url.trim().is_empty() {
            tracing::debug!(registration_id = %notification.registration_id, "no notification target configured");
            return Ok(());
        }

        let resp = self
            .client
            .post(&self.target_url)
            .header("X-Webhook-Secret", &self.secret)
            .json(notification)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Internal(format!(
                "notification webhook returned {}: {}",
                status.as_u16(),
                body
            )));
        }
        tracing::info!(
            registration_id = %notification.registration_id,
            outcome = ?notification.outcome,
            "exam result notification delivered"
        );
        Ok(())
    }
}
