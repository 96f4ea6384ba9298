//! Retryable jobs: one orchestrator, parameterised per channel.
//!
//! A channel's job lives on the item as a [`JobState`] guarded by a token.
//! Every fresh enqueue mints a new token, and every write made on behalf of
//! a queue message first checks that the message still carries the stored
//! token. A superseded message therefore changes nothing.

pub mod cover;
pub mod email;
pub mod failure;
pub mod orchestrator;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::Result;
use crate::domain::{Item, JobState, JobToken};

pub use cover::CoverChannel;
pub use email::EmailSyncChannel;
pub use failure::JobFailure;
pub use orchestrator::{EnqueueOutcome, JobOrchestrator, ProcessOutcome};

/// Channel-specific parts of a retryable job.
#[async_trait]
pub trait JobChannel: Send + Sync {
    /// Short name used in logs and error codes (`{name}_queue_failed`).
    fn name(&self) -> &'static str;

    fn queue(&self) -> &'static str;

    fn state<'a>(&self, item: &'a Item) -> &'a JobState;

    fn state_mut<'a>(&self, item: &'a mut Item) -> &'a mut JobState;

    /// Wrap a freshly minted token in this channel's wire form.
    fn token(&self, value: String) -> JobToken;

    /// Whether the channel's effect already exists, making a new job pointless.
    fn is_satisfied(&self, item: &Item) -> Result<bool>;

    /// The unit of work. Errors are classified with [`JobFailure::classify`].
    async fn run(&self, item: &Item) -> Result<()>;

    /// Channel fields to set in the same write that marks the job succeeded.
    fn record_success(&self, item: &mut Item, now: DateTime<Utc>);

    /// Channel fields to set in the same write that marks the job failed.
    fn record_failure(&self, item: &mut Item, failure: &JobFailure, now: DateTime<Utc>) {
        let _ = (item, failure, now);
    }
}

/// Attempt budget and backoff schedule for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before attempt `n + 1`, indexed by `n - 1`; the last entry repeats.
    pub retry_delays_secs: Vec<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delays_secs: vec![30, 120, 600],
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retry_delays_secs: Vec<u64>) -> Self {
        Self {
            max_attempts,
            retry_delays_secs,
        }
    }

    /// Delay scheduled after `attempt` failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        let secs = self
            .retry_delays_secs
            .get(index)
            .or_else(|| self.retry_delays_secs.last())
            .copied()
            .unwrap_or(60);
        Duration::from_secs(secs)
    }
}
