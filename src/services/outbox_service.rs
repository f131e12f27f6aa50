//! Side effects of scoring (certificates, notifications) are written to
//! `outbox_events` in the same transaction as the status change and executed
//! afterwards, first inline and then by the background worker on retry.
//! A failing side effect never touches the session itself.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::exam::Exam;
use crate::models::exam_session::{ExamSession, SessionStatus};
use crate::models::outbox_event::OutboxEvent;
use crate::models::training::Training;
use crate::models::user::User;
use crate::services::certificate_service::{should_issue, CertificateIssuer, CertificateRequest};
use crate::services::grading_service::OutcomeKind;
use crate::services::notification_service::{Notifier, ResultNotification};

const MAX_BACKOFF_SECS: i64 = 3600;

/// A `processing` claim older than this is treated as abandoned and
/// re-run by the worker. Longer than the renderer and webhook timeouts.
pub const CLAIM_LEASE_SECS: i64 = 300;

/// How long a request waits for its certificate before answering without it.
pub const CERTIFICATE_WAIT: std::time::Duration = std::time::Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboxMessage {
    IssueCertificate { registration_id: Uuid },
    NotifyResult { registration_id: Uuid, outcome: OutcomeKind },
}

impl OutboxMessage {
    pub fn event_type(&self) -> &'static str {
        match self {
            OutboxMessage::IssueCertificate { .. } => "certificate.issue",
            OutboxMessage::NotifyResult { .. } => "notification.exam_result",
        }
    }

    pub fn registration_id(&self) -> Uuid {
        match self {
            OutboxMessage::IssueCertificate { registration_id }
            | OutboxMessage::NotifyResult { registration_id, .. } => *registration_id,
        }
    }
}

/// Writes an event inside the caller's transaction.
pub async fn enqueue(conn: &mut PgConnection, message: &OutboxMessage) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO outbox_events (event_type, payload) VALUES ($1, $2) RETURNING id",
    )
    .bind(message.event_type())
    .bind(serde_json::to_value(message)?)
    .fetch_one(conn)
    .await?;
    Ok(id)
}

/// 30s, 60s, 120s, ... capped at an hour.
pub fn retry_delay(attempts: i32) -> Duration {
    let exp = attempts.saturating_sub(1).clamp(0, 16) as u32;
    Duration::seconds((30_i64 * 2_i64.pow(exp)).min(MAX_BACKOFF_SECS))
}

/// Everything a side effect needs to know about the finished session.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub session: ExamSession,
    pub exam: Exam,
    pub user: User,
    pub training: Option<Training>,
    pub certificate_number: Option<String>,
}

/// Executes one message against the collaborators. Skips work that no
/// longer applies instead of failing.
pub async fn deliver(
    issuer: &dyn CertificateIssuer,
    notifier: &dyn Notifier,
    message: &OutboxMessage,
    ctx: &EventContext,
) -> Result<()> {
    match message {
        OutboxMessage::IssueCertificate { registration_id } => {
            if ctx.session.status()? != SessionStatus::Passed {
                tracing::warn!(%registration_id, status = %ctx.session.status, "session no longer passed, certificate skipped");
                return Ok(());
            }
            if !should_issue(ctx.training.as_ref()) {
                tracing::debug!(%registration_id, "training grants no certificate");
                return Ok(());
            }
            if ctx.session.certificate_id.is_some() {
                return Ok(());
            }
            let request = CertificateRequest {
                registration_id: *registration_id,
                user: ctx.user.clone(),
                exam: ctx.exam.clone(),
                training: ctx.training.clone(),
            };
            issuer.issue(&request).await?;
            Ok(())
        }
        OutboxMessage::NotifyResult {
            registration_id,
            outcome,
        } => {
            let notification = ResultNotification {
                event: message.event_type().to_string(),
                registration_id: *registration_id,
                user_id: ctx.user.id,
                user_email: ctx.user.email.clone(),
                user_name: ctx.user.full_name(),
                exam_id: ctx.exam.id,
                exam_title: ctx.exam.title.clone(),
                outcome: *outcome,
                score: ctx.session.score,
                attempt_number: ctx.session.attempt_number,
                certificate_number: ctx.certificate_number.clone(),
            };
            notifier.notify(&notification).await
        }
    }
}

#[derive(Clone)]
pub struct OutboxService {
    pool: PgPool,
    issuer: Arc<dyn CertificateIssuer>,
    notifier: Arc<dyn Notifier>,
}

impl OutboxService {
    pub fn new(pool: PgPool, issuer: Arc<dyn CertificateIssuer>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            pool,
            issuer,
            notifier,
        }
    }

    /// Claims and processes the oldest due event, including claims whose
    /// lease ran out. Returns false when idle.
    pub async fn run_once(&self) -> Result<bool> {
        let claimed = sqlx::query_as::<_, OutboxEvent>(
            r#"
            UPDATE outbox_events SET status = 'processing', attempts = attempts + 1, updated_at = NOW()
            WHERE id = (
                SELECT id FROM outbox_events
                WHERE (status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= NOW()))
                   OR (status = 'processing' AND updated_at < NOW() - make_interval(secs => $1))
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(CLAIM_LEASE_SECS as f64)
        .fetch_optional(&self.pool)
        .await?;

        let Some(event) = claimed else { return Ok(false) };
        self.process(event).await?;
        Ok(true)
    }

    /// Best-effort immediate execution of events written by a request.
    /// Anything left pending is picked up by the worker.
    pub async fn dispatch(&self, event_ids: &[Uuid]) {
        for id in event_ids {
            let claimed = sqlx::query_as::<_, OutboxEvent>(
                "UPDATE outbox_events SET status = 'processing', attempts = attempts + 1, updated_at = NOW() \
                 WHERE id = $1 AND status = 'pending' RETURNING *",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await;

            match claimed {
                Ok(Some(event)) => {
                    if let Err(e) = self.process(event).await {
                        tracing::error!(event_id = %id, error = ?e, "outbox dispatch failed");
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::error!(event_id = %id, error = ?e, "outbox claim failed"),
            }
        }
    }

    /// Runs a request's certificate events, then its notification events, on
    /// a background task. Waits up to `wait` for the certificate step so a
    /// quick certificate can be returned; a slow one finishes detached.
    pub async fn hand_off(&self, certificates: Vec<Uuid>, notifications: Vec<Uuid>, wait: std::time::Duration) {
        if certificates.is_empty() && notifications.is_empty() {
            return;
        }
        let awaits_certificate = !certificates.is_empty();
        let (certified_tx, certified_rx) = oneshot::channel();
        let outbox = self.clone();
        tokio::spawn(async move {
            outbox.dispatch(&certificates).await;
            let _ = certified_tx.send(());
            outbox.dispatch(&notifications).await;
        });

        if awaits_certificate && tokio::time::timeout(wait, certified_rx).await.is_err() {
            tracing::warn!(wait_ms = wait.as_millis() as u64, "certificate not ready, answering without it");
        }
    }

    async fn process(&self, event: OutboxEvent) -> Result<()> {
        let outcome = match serde_json::from_value::<OutboxMessage>(event.payload.clone()) {
            Ok(message) => match self.load_context(message.registration_id()).await {
                Ok(ctx) => deliver(self.issuer.as_ref(), self.notifier.as_ref(), &message, &ctx).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(Error::from(e)),
        };

        match outcome {
            Ok(()) => {
                sqlx::query(
                    "UPDATE outbox_events SET status = 'done', last_error = NULL, updated_at = NOW() WHERE id = $1",
                )
                .bind(event.id)
                .execute(&self.pool)
                .await?;
                tracing::debug!(event_id = %event.id, event_type = %event.event_type, "outbox event done");
            }
            Err(err) => {
                let exhausted = event.attempts >= event.max_attempts;
                let next_retry_at: Option<DateTime<Utc>> =
                    (!exhausted).then(|| Utc::now() + retry_delay(event.attempts));
                sqlx::query(
                    "UPDATE outbox_events SET status = $1, last_error = $2, next_retry_at = $3, updated_at = NOW() \
                     WHERE id = $4",
                )
                .bind(if exhausted { "failed" } else { "pending" })
                .bind(err.to_string())
                .bind(next_retry_at)
                .bind(event.id)
                .execute(&self.pool)
                .await?;
                tracing::warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    attempts = event.attempts,
                    exhausted,
                    error = %err,
                    "outbox event failed"
                );
            }
        }
        Ok(())
    }

    async fn load_context(&self, registration_id: Uuid) -> Result<EventContext> {
        let session = sqlx::query_as::<_, ExamSession>("SELECT * FROM exam_registrations WHERE id = $1")
            .bind(registration_id)
            .fetch_one(&self.pool)
            .await?;
        let exam = sqlx::query_as::<_, Exam>("SELECT * FROM exams WHERE id = $1")
            .bind(session.exam_id)
            .fetch_one(&self.pool)
            .await?;
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(session.user_id)
            .fetch_one(&self.pool)
            .await?;
        let training = match exam.training_id {
            Some(id) => {
                sqlx::query_as::<_, Training>("SELECT * FROM trainings WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => None,
        };
        let certificate_number = match session.certificate_id {
            Some(id) => {
                sqlx::query_scalar::<_, String>("SELECT certificate_number FROM certificates WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => None,
        };

        Ok(EventContext {
            session,
            exam,
            user,
            training,
            certificate_number,
        })
    }
}
