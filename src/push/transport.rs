use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::app::{DogearError, Result};
use crate::domain::PushEnvironment;

pub const SANDBOX_HOST: &str = "https://api.sandbox.push.apple.com";
pub const PRODUCTION_HOST: &str = "https://api.push.apple.com";

/// One notification addressed to one device.
pub struct PushRequest<'a> {
    pub device_token: &'a str,
    pub environment: PushEnvironment,
    pub topic: &'a str,
    pub bearer: &'a str,
    pub collapse_id: Option<&'a str>,
    pub payload: &'a Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResponse {
    pub status: u16,
    /// Provider reason code on non-2xx answers, e.g. `Unregistered`.
    pub reason: Option<String>,
}

impl PushResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, request: &PushRequest<'_>) -> Result<PushResponse>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    reason: Option<String>,
}

/// HTTP/2 client for the provider's `/3/device/{token}` endpoint.
pub struct HttpPushTransport {
    client: Client,
    sandbox_host: String,
    production_host: String,
}

impl HttpPushTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_hosts(timeout, SANDBOX_HOST, PRODUCTION_HOST)
    }

    pub fn with_hosts(timeout: Duration, sandbox_host: &str, production_host: &str) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            sandbox_host: sandbox_host.trim_end_matches('/').to_string(),
            production_host: production_host.trim_end_matches('/').to_string(),
        })
    }

    fn host(&self, environment: PushEnvironment) -> &str {
        match environment {
            PushEnvironment::Sandbox => &self.sandbox_host,
            PushEnvironment::Production => &self.production_host,
        }
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn send(&self, request: &PushRequest<'_>) -> Result<PushResponse> {
        let url = format!("{}/3/device/{}", self.host(request.environment), request.device_token);
        let mut builder = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("bearer {}", request.bearer))
            .header("apns-topic", request.topic)
            .header("apns-push-type", "alert")
            .header("apns-priority", "10")
            .json(request.payload);
        if let Some(collapse_id) = request.collapse_id {
            builder = builder.header("apns-collapse-id", collapse_id);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                DogearError::Timeout(format!("push delivery: {}", e))
            } else {
                DogearError::Http(e)
            }
        })?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(PushResponse { status, reason: None });
        }

        let text = response.text().await.unwrap_or_default();
        let reason = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|body| body.reason);
        Ok(PushResponse { status, reason })
    }
}
