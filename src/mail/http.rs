use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde_json::json;

use crate::app::{DogearError, Result};
use crate::mail::{KindleConfig, Mailer, OutboundEmail};

/// Mailer for a Resend-style `POST /emails` JSON API.
pub struct HttpMailer {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpMailer {
    pub fn new(config: &KindleConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<()> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| DogearError::ConfigMissing("kindle.api_key".to_string()))?;

        let attachments: Vec<_> = email
            .attachments
            .iter()
            .map(|attachment| {
                json!({
                    "filename": attachment.filename,
                    "content": STANDARD.encode(&attachment.content),
                    "content_type": attachment.content_type,
                })
            })
            .collect();

        let body = json!({
            "from": email.from,
            "to": [email.to],
            "subject": email.subject,
            "text": email.text,
            "attachments": attachments,
        });

        let response = self
            .client
            .post(format!("{}/emails", self.base_url))
            .header(AUTHORIZATION, format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DogearError::Timeout(format!("email send: {}", e))
                } else {
                    DogearError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DogearError::upstream(status, &error_text));
        }

        tracing::debug!("Email \"{}\" accepted for {}", email.subject, email.to);
        Ok(())
    }
}
