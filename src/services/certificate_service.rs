use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::certificate::Certificate;
use crate::models::exam::Exam;
use crate::models::training::Training;
use crate::models::user::User;

pub const ISSUER_NAME: &str = "Aqrar Portal";

const RENDER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct CertificateRequest {
    pub registration_id: Uuid,
    pub user: User,
    pub exam: Exam,
    pub training: Option<Training>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Issues (or returns the already issued) certificate for the user and exam.
    async fn issue(&self, request: &CertificateRequest) -> Result<Certificate>;
}

/// Certificates exist only for trainings that grant one.
pub fn should_issue(training: Option<&Training>) -> bool {
    training.map_or(false, |t| t.has_certificate)
}

#[derive(Debug, Serialize)]
struct RenderInput<'a> {
    certificate_number: &'a str,
    user_name: String,
    exam_title: &'a str,
    training_title: Option<&'a str>,
    issue_date: String,
    issuer_name: &'a str,
    output_dir: &'a str,
}

#[derive(Debug, Deserialize)]
struct RenderOutput {
    storage_path: String,
}

#[derive(Clone)]
pub struct PgCertificateIssuer {
    pool: PgPool,
    script: Option<String>,
    output_dir: String,
}

impl PgCertificateIssuer {
    pub fn new(pool: PgPool, script: Option<String>, output_dir: String) -> Self {
        Self {
            pool,
            script,
            output_dir,
        }
    }

    async fn find_existing(&self, user_id: Uuid, exam_id: Uuid) -> Result<Option<Certificate>> {
        Ok(sqlx::query_as::<_, Certificate>(
            "SELECT * FROM certificates WHERE user_id = $1 AND related_exam_id = $2",
        )
        .bind(user_id)
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Runs the external renderer: JSON on stdin, `{"storage_path": ...}` on stdout.
    async fn render(&self, script: &str, cert: &Certificate, request: &CertificateRequest) -> Result<String> {
        let input = RenderInput {
            certificate_number: &cert.certificate_number,
            user_name: request.user.full_name(),
            exam_title: &request.exam.title,
            training_title: request.training.as_ref().map(|t| t.title.as_str()),
            issue_date: cert.issue_date.to_string(),
            issuer_name: &cert.issuer_name,
            output_dir: &self.output_dir,
        };
        let body = serde_json::to_vec(&input)?;

        let mut child = Command::new(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&body).await?;
        }
        let output = tokio::time::timeout(RENDER_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| Error::Internal(format!("certificate renderer timed out after {:?}", RENDER_TIMEOUT)))??;
        if !output.status.success() {
            return Err(Error::Internal(format!(
                "certificate renderer exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let parsed: RenderOutput = serde_json::from_slice(&output.stdout)?;
        Ok(parsed.storage_path)
    }
}

#[async_trait]
impl CertificateIssuer for PgCertificateIssuer {
    async fn issue(&self, request: &CertificateRequest) -> Result<Certificate> {
        let inserted = sqlx::query_as::<_, Certificate>(
            r#"
            INSERT INTO certificates (user_id, related_training_id, related_exam_id, certificate_number, issuer_name)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, related_exam_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(request.user.id)
        .bind(request.training.as_ref().map(|t| t.id))
        .bind(request.exam.id)
        .bind(Uuid::new_v4().to_string())
        .bind(ISSUER_NAME)
        .fetch_optional(&self.pool)
        .await?;

        let mut cert = match inserted {
            Some(c) => {
                tracing::info!(certificate_id = %c.id, user_id = %c.user_id, exam_id = %c.related_exam_id, "certificate issued");
                c
            }
            None => self
                .find_existing(request.user.id, request.exam.id)
                .await?
                .ok_or_else(|| Error::Internal("certificate vanished after conflict".to_string()))?,
        };

        if cert.pdf_path.is_none() {
            if let Some(script) = self.script.as_deref() {
                let path = self.render(script, &cert, request).await?;
                sqlx::query("UPDATE certificates SET pdf_path = $1 WHERE id = $2")
                    .bind(&path)
                    .bind(cert.id)
                    .execute(&self.pool)
                    .await?;
                cert.pdf_path = Some(path);
            }
        }

        sqlx::query(
            "UPDATE exam_registrations SET certificate_id = $1, updated_at = NOW() \
             WHERE id = $2 AND certificate_id IS NULL",
        )
        .bind(cert.id)
        .bind(request.registration_id)
        .execute(&self.pool)
        .await?;

        Ok(cert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn training(has_certificate: bool) -> Training {
        Training {
            id: Uuid::new_v4(),
            title: "Drip irrigation".into(),
            training_type: "online".into(),
            exam_required: true,
            has_certificate,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn only_certificate_trainings_issue() {
        assert!(should_issue(Some(&training(true))));
        assert!(!should_issue(Some(&training(false))));
        assert!(!should_issue(None));
    }
}
