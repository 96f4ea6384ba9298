use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::app::{DogearError, Result};
use crate::domain::{short_id, Item, JobMessage, JobState, JobStatus};
use crate::jobs::failure::JobFailure;
use crate::jobs::{JobChannel, RetryPolicy};
use crate::queue::JobQueue;
use crate::readiness::{ReadinessTracker, ReadinessUpdate};
use crate::store::Repository;

/// Active jobs not updated for this many minutes are treated as abandoned.
pub const STALE_AFTER_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued { token: String },
    AlreadySatisfied,
    AlreadyActive,
    /// The pending record was written but the message never left; the job is failed.
    QueueFailed { code: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The message carried an old token, or the item is gone.
    Superseded,
    Succeeded { readiness: ReadinessUpdate },
    RetryScheduled { attempt: u32, delay: Duration },
    Failed { code: String },
}

pub struct JobOrchestrator<C: JobChannel> {
    channel: C,
    repo: Repository,
    queue: Option<Arc<dyn JobQueue>>,
    readiness: Arc<ReadinessTracker>,
    policy: RetryPolicy,
}

impl<C: JobChannel> JobOrchestrator<C> {
    pub fn new(
        channel: C,
        repo: Repository,
        queue: Option<Arc<dyn JobQueue>>,
        readiness: Arc<ReadinessTracker>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            channel,
            repo,
            queue,
            readiness,
            policy,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start a fresh job for `item_id`.
    ///
    /// The pending record is persisted before the message is sent, so the
    /// item shows in-flight work even when sending fails.
    pub fn enqueue(
        &self,
        item_id: &str,
        reason: &str,
        force: bool,
        max_attempts: Option<u32>,
    ) -> Result<EnqueueOutcome> {
        let name = self.channel.name();
        let item = self
            .repo
            .get_item(item_id)?
            .ok_or_else(|| DogearError::ItemNotFound(item_id.to_string()))?;

        if !force && self.channel.is_satisfied(&item)? {
            tracing::debug!("{} job for {} already satisfied", name, item.short_id());
            return Ok(EnqueueOutcome::AlreadySatisfied);
        }

        let now = Utc::now();
        let token = Uuid::new_v4().to_string();
        let max_attempts = max_attempts.unwrap_or(self.policy.max_attempts).max(1);
        let stale_after = chrono::Duration::minutes(STALE_AFTER_MINUTES);

        let claimed = self.repo.update_item(item_id, |item| {
            let state = self.channel.state_mut(item);
            if state.status.is_active() && !state.is_stale(now, stale_after) {
                return None;
            }
            if state.status.is_active() {
                tracing::warn!(
                    "Abandoning stale {} job {:?} for {}",
                    name,
                    state.token,
                    short_id(item_id)
                );
            }
            *state = JobState {
                status: JobStatus::Pending,
                token: Some(self.channel.token(token.clone())),
                attempt: 0,
                max_attempts,
                reason: Some(reason.to_string()),
                queued_at: Some(now),
                updated_at: Some(now),
                ..JobState::default()
            };
            Some(())
        })?;

        if claimed.is_none() {
            tracing::debug!("{} job for {} already active", name, short_id(item_id));
            return Ok(EnqueueOutcome::AlreadyActive);
        }

        let message = JobMessage {
            item_id: item_id.to_string(),
            attempt: 1,
            max_attempts,
            token: self.channel.token(token.clone()),
            reason: reason.to_string(),
            queued_at: now,
        };

        let Some(queue) = self.queue.as_ref() else {
            let failure = JobFailure::new(
                format!("{}_queue_unavailable", name),
                false,
                "no job queue configured",
            );
            self.fail(item_id, &token, &failure)?;
            return Ok(EnqueueOutcome::QueueFailed { code: failure.code });
        };

        if let Err(e) = self.send(queue.as_ref(), &message, None) {
            let failure = JobFailure::new(format!("{}_queue_failed", name), false, e.to_string());
            self.fail(item_id, &token, &failure)?;
            return Ok(EnqueueOutcome::QueueFailed { code: failure.code });
        }

        tracing::info!("Queued {} job for {} ({})", name, short_id(item_id), reason);
        Ok(EnqueueOutcome::Queued { token })
    }

    /// Handle one delivery of a job message.
    pub async fn process(&self, message: &JobMessage) -> Result<ProcessOutcome> {
        let name = self.channel.name();
        let token = message.token.as_str();
        let item_id = message.item_id.as_str();
        let started = Utc::now();
        let attempt = message.attempt.clamp(1, message.max_attempts.max(1));

        let stale_after = chrono::Duration::minutes(STALE_AFTER_MINUTES);

        let marked = self.repo.update_item(item_id, |item| {
            let state = self.channel.state_mut(item);
            if !state.holds_token(token) || !state.status.is_active() {
                return None;
            }
            // Redelivered copies of an attempt that already ran or is running
            if attempt < state.attempt
                || (attempt == state.attempt
                    && state.status == JobStatus::Processing
                    && !state.is_stale(started, stale_after))
            {
                return None;
            }
            state.status = JobStatus::Processing;
            state.attempt = attempt;
            state.max_attempts = message.max_attempts;
            state.started_at = Some(started);
            state.last_attempt_at = Some(started);
            state.updated_at = Some(started);
            state.next_retry_at = None;
            Some(())
        });

        let item = match marked {
            Ok(Some((item, ()))) => item,
            Ok(None) | Err(DogearError::ItemNotFound(_)) => {
                tracing::debug!("Dropping superseded {} message for {}", name, short_id(item_id));
                return Ok(ProcessOutcome::Superseded);
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            "Running {} job for {} (attempt {}/{})",
            name,
            item.short_id(),
            attempt,
            message.max_attempts
        );

        match self.channel.run(&item).await {
            Ok(()) => self.succeed(item_id, token),
            Err(e) => {
                let failure = JobFailure::classify(&e, name);
                tracing::warn!(
                    "{} job for {} failed on attempt {}: [{}] {}",
                    name,
                    item.short_id(),
                    attempt,
                    failure.code,
                    failure.message
                );
                if failure.retryable && attempt < message.max_attempts {
                    self.schedule_retry(message, attempt, failure)
                } else {
                    self.finish_failed(item_id, token, failure)
                }
            }
        }
    }

    fn succeed(&self, item_id: &str, token: &str) -> Result<ProcessOutcome> {
        let now = Utc::now();
        let recorded = self.repo.update_item(item_id, |item: &mut Item| {
            let state = self.channel.state_mut(item);
            if !state.holds_token(token) {
                return None;
            }
            state.status = JobStatus::Succeeded;
            state.completed_at = Some(now);
            state.updated_at = Some(now);
            state.next_retry_at = None;
            state.clear_error();
            self.channel.record_success(item, now);
            Some(())
        })?;

        if recorded.is_none() {
            tracing::debug!(
                "{} job for {} superseded while running, result discarded",
                self.channel.name(),
                short_id(item_id)
            );
            return Ok(ProcessOutcome::Superseded);
        }

        tracing::info!("{} job for {} succeeded", self.channel.name(), short_id(item_id));
        let readiness = self.readiness.recompute(item_id)?;
        Ok(ProcessOutcome::Succeeded { readiness })
    }

    fn schedule_retry(
        &self,
        message: &JobMessage,
        attempt: u32,
        failure: JobFailure,
    ) -> Result<ProcessOutcome> {
        let item_id = message.item_id.as_str();
        let token = message.token.as_str();
        let delay = self.policy.delay_for(attempt);
        let now = Utc::now();
        let next_retry_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d));

        let recorded = self.repo.update_item(item_id, |item| {
            let state = self.channel.state_mut(item);
            if !state.holds_token(token) {
                return None;
            }
            state.status = JobStatus::Retrying;
            state.next_retry_at = next_retry_at;
            state.updated_at = Some(now);
            state.last_error = Some(failure.message.clone());
            state.error_code = Some(failure.code.clone());
            state.retryable = Some(true);
            Some(())
        })?;
        if recorded.is_none() {
            return Ok(ProcessOutcome::Superseded);
        }

        let next = JobMessage {
            attempt: attempt + 1,
            queued_at: now,
            ..message.clone()
        };

        let sent = match self.queue.as_ref() {
            Some(queue) => self.send(queue.as_ref(), &next, Some(delay)),
            None => Err(DogearError::Queue("no job queue configured".to_string())),
        };

        if let Err(e) = sent {
            tracing::error!(
                "Could not schedule retry of {} job for {}: {}",
                self.channel.name(),
                short_id(item_id),
                e
            );
            let failure = JobFailure::new(
                format!("{}_retry_enqueue_failed", self.channel.name()),
                false,
                e.to_string(),
            );
            return self.finish_failed(item_id, token, failure);
        }

        tracing::info!(
            "Retrying {} job for {} in {}s (attempt {}/{})",
            self.channel.name(),
            short_id(item_id),
            delay.as_secs(),
            next.attempt,
            next.max_attempts
        );
        Ok(ProcessOutcome::RetryScheduled {
            attempt: next.attempt,
            delay,
        })
    }

    fn finish_failed(&self, item_id: &str, token: &str, failure: JobFailure) -> Result<ProcessOutcome> {
        if !self.fail(item_id, token, &failure)? {
            return Ok(ProcessOutcome::Superseded);
        }
        tracing::error!(
            "{} job for {} failed: [{}] {}",
            self.channel.name(),
            short_id(item_id),
            failure.code,
            failure.message
        );
        Ok(ProcessOutcome::Failed { code: failure.code })
    }

    /// Persist a terminal failure if `token` still owns the job.
    fn fail(&self, item_id: &str, token: &str, failure: &JobFailure) -> Result<bool> {
        let now = Utc::now();
        let recorded = self.repo.update_item(item_id, |item| {
            let state = self.channel.state_mut(item);
            if !state.holds_token(token) {
                return None;
            }
            state.status = JobStatus::Failed;
            state.completed_at = Some(now);
            state.updated_at = Some(now);
            state.next_retry_at = None;
            state.last_error = Some(failure.message.clone());
            state.error_code = Some(failure.code.clone());
            state.retryable = Some(failure.retryable);
            self.channel.record_failure(item, failure, now);
            Some(())
        })?;
        Ok(recorded.is_some())
    }

    fn send(&self, queue: &dyn JobQueue, message: &JobMessage, delay: Option<Duration>) -> Result<()> {
        let body = serde_json::to_value(message)?;
        queue.send(self.channel.queue(), &body, delay)
    }
}
