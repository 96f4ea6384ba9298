use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::job::JobToken;

pub const DEFAULT_OWNER: &str = "default";

fn default_owner() -> String {
    DEFAULT_OWNER.to_string()
}

/// A saved article and the state of every enrichment channel attached to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    #[serde(default = "default_owner")]
    pub owner_id: String,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub cover: CoverState,
    #[serde(default)]
    pub kindle: KindleState,
    #[serde(default)]
    pub cover_sync: JobState,
    #[serde(default)]
    pub push_channels: PushChannels,
}

impl Item {
    pub fn new(owner_id: &str, url: &str, title: Option<String>) -> Self {
        Self {
            id: Self::generate_id(owner_id, url),
            url: url.to_string(),
            title,
            owner_id: owner_id.to_string(),
            saved_at: Utc::now(),
            read: false,
            progress: 0.0,
            cover: CoverState::default(),
            kindle: KindleState::default(),
            cover_sync: JobState::default(),
            push_channels: PushChannels::default(),
        }
    }

    /// Generate a deterministic ID from owner and URL
    pub fn generate_id(owner_id: &str, url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(owner_id.as_bytes());
        hasher.update(url.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }

    /// Short form of the id for log lines.
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoverState {
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Idle,
    Pending,
    Processing,
    Retrying,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Whether a job in this status still owns the channel.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Processing | JobStatus::Retrying
        )
    }
}

/// Per-channel job bookkeeping, shared by the cover and email-sync channels.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    #[serde(default)]
    pub status: JobStatus,
    /// Stored as `jobId` on the cover channel and `syncVersion` on the email channel.
    #[serde(flatten)]
    pub token: Option<JobToken>,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub max_attempts: u32,
    pub reason: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_code: Option<String>,
    pub retryable: Option<bool>,
}

impl JobState {
    /// An active job whose last update is older than `threshold` is considered abandoned.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match self.updated_at.or(self.queued_at) {
            Some(at) => now - at > threshold,
            None => true,
        }
    }

    pub fn holds_token(&self, token: &str) -> bool {
        self.token.as_ref().is_some_and(|t| t.as_str() == token)
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
        self.error_code = None;
        self.retryable = None;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KindleState {
    #[serde(flatten)]
    pub job: JobState,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    #[default]
    Pending,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessReason {
    WaitingForReader,
    WaitingForCover,
    WaitingForReaderAndCover,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessState {
    #[serde(default)]
    pub status: ReadinessStatus,
    pub ready_at: Option<DateTime<Utc>>,
    pub reason: Option<ReadinessReason>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Sent,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KindleChannel {
    #[serde(default)]
    pub status: DeliveryStatus,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IosChannel {
    #[serde(default)]
    pub status: DeliveryStatus,
    pub updated_at: Option<DateTime<Utc>>,
    pub event_id: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushChannels {
    #[serde(default)]
    pub readiness: ReadinessState,
    #[serde(default)]
    pub kindle: KindleChannel,
    #[serde(default)]
    pub ios: IosChannel,
}
