use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token identifying one enqueue of a channel job. The wire key differs per channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobToken {
    #[serde(rename = "jobId")]
    JobId(String),
    #[serde(rename = "syncVersion")]
    SyncVersion(String),
}

impl JobToken {
    pub fn as_str(&self) -> &str {
        match self {
            JobToken::JobId(token) | JobToken::SyncVersion(token) => token,
        }
    }
}

/// Queue payload for both job channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub item_id: String,
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(flatten)]
    pub token: JobToken,
    pub reason: String,
    pub queued_at: DateTime<Utc>,
}
