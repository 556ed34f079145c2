use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("mail API rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("mail delivery is not configured (MAIL_API_URL is unset)")]
    NotConfigured,
}

pub type MailResult<T> = Result<T, MailError>;

#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, to: &str, subject: &str, body: &str) -> MailResult<()>;

    /// Whether `send` can reach a recipient at all.
    fn delivers(&self) -> bool {
        true
    }
}

/// Picks the HTTP mailer when an API endpoint is configured.
pub fn from_config(config: &AppConfig) -> MailResult<Arc<dyn Mailer>> {
    match config.mail_api_url.as_deref() {
        Some(url) if !url.trim().is_empty() => Ok(Arc::new(HttpMailer::new(
            url.trim(),
            config.mail_api_key.clone(),
            &config.mail_from,
        )?)),
        _ => {
            warn!("MAIL_API_URL is not set; password reset emails are disabled");
            Ok(Arc::new(LogMailer))
        }
    }
}

pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    from: String,
}

#[derive(Serialize)]
struct OutgoingMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

impl HttpMailer {
    pub fn new(endpoint: &str, api_key: Option<String>, from: &str) -> MailResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> MailResult<()> {
        let mut request = self.client.post(&self.endpoint).json(&OutgoingMessage {
            from: &self.from,
            to,
            subject,
            text: body,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(to = %to, subject = %subject, "mail dispatched");
        Ok(())
    }
}

/// Used when no mail API is configured. Every send fails; bodies are never logged.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> MailResult<()> {
        warn!(to = %to, subject = %subject, "mail not delivered, no MAIL_API_URL configured");
        Err(MailError::NotConfigured)
    }

    fn delivers(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_mailer_never_reports_delivery() {
        let mailer = LogMailer;
        assert!(!mailer.delivers());
        let err = mailer
            .send("alice@gmail.com", "subject", "secret body")
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::NotConfigured));
    }
}
