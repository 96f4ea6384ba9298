//! Outbound email: the capability trait, its HTTP adapter and the
//! reading-device document that gets attached.

pub mod document;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app::Result;
use crate::jobs::RetryPolicy;

pub use document::{attachment_filename, kindle_document};
pub use http::HttpMailer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

/// Transactional email capability.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<()>;
}

/// Configuration for reading-device delivery by email
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KindleConfig {
    /// Send-to-device address; no address means the channel is not configured
    pub to_address: Option<String>,

    /// Sender address, must be approved on the device account
    pub from_address: Option<String>,

    /// API key for the email endpoint (env: DOGEAR_MAIL_API_KEY)
    pub api_key: Option<String>,

    /// Base URL of a Resend-compatible API
    pub base_url: String,

    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,

    /// Queue a sync automatically when an item is saved (default: false)
    pub auto_sync: bool,

    pub retry: RetryPolicy,
}

impl Default for KindleConfig {
    fn default() -> Self {
        Self {
            to_address: None,
            from_address: None,
            api_key: None,
            base_url: "https://api.resend.com".to_string(),
            timeout_secs: 30,
            auto_sync: false,
            retry: RetryPolicy::new(4, vec![60, 300, 900]),
        }
    }
}

impl KindleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
