//! Glue between the stages: the on-save flow, queue batch dispatch and the
//! readiness → push hand-off.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::app::{DogearError, Result};
use crate::domain::{short_id, DeliveryStatus, Item, JobMessage, DEFAULT_OWNER};
use crate::jobs::{CoverChannel, EmailSyncChannel, EnqueueOutcome, JobOrchestrator, ProcessOutcome};
use crate::push::{PushOutcome, PushService};
use crate::queue::{JobQueue, QueuedMessage, COVER_QUEUE, EMAIL_SYNC_QUEUE};
use crate::readiness::{ReadinessTracker, ReadinessUpdate};
use crate::reader::ContentReader;
use crate::store::Repository;

/// What happened when a URL was saved.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub item: Item,
    /// False when an item for this owner and URL already existed.
    pub created: bool,
    pub has_document: bool,
    pub readiness: ReadinessUpdate,
    pub cover: EnqueueOutcome,
    /// None when auto-sync is off or the sync waits for the cover job.
    pub kindle: Option<EnqueueOutcome>,
}

/// Counts for one drained batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub failed: usize,
}

pub struct Pipeline {
    repo: Repository,
    reader: Arc<ContentReader>,
    readiness: Arc<ReadinessTracker>,
    cover: JobOrchestrator<CoverChannel>,
    kindle: JobOrchestrator<EmailSyncChannel>,
    push: Arc<PushService>,
    auto_sync: bool,
}

impl Pipeline {
    pub fn new(
        repo: Repository,
        reader: Arc<ContentReader>,
        readiness: Arc<ReadinessTracker>,
        cover: JobOrchestrator<CoverChannel>,
        kindle: JobOrchestrator<EmailSyncChannel>,
        push: Arc<PushService>,
        auto_sync: bool,
    ) -> Self {
        Self {
            repo,
            reader,
            readiness,
            cover,
            kindle,
            push,
            auto_sync,
        }
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn push(&self) -> &PushService {
        &self.push
    }

    /// Save `url`, extract it, and start the enrichment jobs.
    pub async fn save(&self, url: &str, title: Option<String>, owner_id: Option<&str>) -> Result<SaveOutcome> {
        let parsed = url::Url::parse(url)?;
        let owner_id = owner_id.unwrap_or(DEFAULT_OWNER);
        let candidate = Item::new(owner_id, parsed.as_str(), title);

        let created = self.repo.create_item(&candidate)?;
        let item = if created {
            tracing::info!("Saved {} as {}", candidate.url, candidate.short_id());
            candidate
        } else {
            tracing::info!("{} already saved, refreshing enrichment", candidate.url);
            self.repo
                .get_item(&candidate.id)?
                .ok_or_else(|| DogearError::ItemNotFound(candidate.id.clone()))?
        };

        let has_document = match self.reader.load_or_extract(&self.repo, &item).await {
            Ok(doc) => doc.is_some(),
            Err(e) => {
                tracing::warn!("Extraction for {} failed: {}", item.short_id(), e);
                false
            }
        };

        let readiness = self.readiness.recompute(&item.id)?;
        if readiness.became_ready {
            self.notify_ready(&item.id).await;
        }

        let cover = self.cover.enqueue(&item.id, "saved", false, None)?;
        // A running cover job queues the sync itself once it settles
        let cover_pending = matches!(
            cover,
            EnqueueOutcome::Queued { .. } | EnqueueOutcome::AlreadyActive
        );
        let kindle = if self.auto_sync && !cover_pending {
            Some(self.kindle.enqueue(&item.id, "saved", false, None)?)
        } else {
            None
        };

        let item = self.repo.get_item(&item.id)?.unwrap_or(item);
        Ok(SaveOutcome {
            item,
            created,
            has_document,
            readiness,
            cover,
            kindle,
        })
    }

    pub fn enqueue_cover(&self, item_id: &str, force: bool) -> Result<EnqueueOutcome> {
        let reason = if force { "manual_force" } else { "manual" };
        self.cover.enqueue(item_id, reason, force, None)
    }

    pub fn enqueue_kindle(&self, item_id: &str, force: bool) -> Result<EnqueueOutcome> {
        let reason = if force { "manual_force" } else { "manual" };
        self.kindle.enqueue(item_id, reason, force, None)
    }

    /// Process one queue message and fan out to push when it made the item ready.
    pub async fn handle_message(&self, queue: &str, body: &serde_json::Value) -> Result<ProcessOutcome> {
        let message: JobMessage = serde_json::from_value(body.clone())?;
        let outcome = match queue {
            COVER_QUEUE => self.cover.process(&message).await?,
            EMAIL_SYNC_QUEUE => self.kindle.process(&message).await?,
            other => return Err(DogearError::Queue(format!("Unknown queue: {}", other))),
        };

        if let ProcessOutcome::Succeeded { readiness } = &outcome {
            if readiness.became_ready {
                self.notify_ready(&message.item_id).await;
            }
        }
        if queue == COVER_QUEUE {
            self.sync_after_cover(&message.item_id, &outcome);
        }
        Ok(outcome)
    }

    /// Queue the reading-device copy once the cover job has settled either way.
    fn sync_after_cover(&self, item_id: &str, outcome: &ProcessOutcome) {
        if !self.auto_sync {
            return;
        }
        let reason = match outcome {
            ProcessOutcome::Succeeded { .. } => "cover_ready",
            ProcessOutcome::Failed { .. } => "cover_failed",
            _ => return,
        };
        match self.kindle.enqueue(item_id, reason, false, None) {
            Ok(queued) => {
                tracing::debug!("Email sync for {} after cover: {:?}", short_id(item_id), queued)
            }
            Err(e) => {
                tracing::error!("Could not queue email sync for {}: {}", short_id(item_id), e)
            }
        }
    }

    /// Process a batch in order, isolating failures per message.
    ///
    /// Every message is acknowledged: retries travel as new delayed messages.
    pub async fn handle_batch(&self, queue: &dyn JobQueue, messages: Vec<QueuedMessage>) -> BatchReport {
        let mut report = BatchReport::default();
        for message in messages {
            match self.handle_message(&message.queue, &message.body).await {
                Ok(outcome) => {
                    report.processed += 1;
                    tracing::debug!("Message {} on {}: {:?}", message.id, message.queue, outcome);
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!("Message {} on {} failed: {}", message.id, message.queue, e);
                }
            }
            if let Err(e) = queue.ack(message.id) {
                tracing::warn!("Failed to ack message {}: {}", message.id, e);
            }
        }
        report
    }

    /// Receive and process due messages from every job queue once.
    pub async fn drain_once(&self, queue: &dyn JobQueue, batch_size: usize, lease: Duration) -> Result<BatchReport> {
        let mut total = BatchReport::default();
        for name in [COVER_QUEUE, EMAIL_SYNC_QUEUE] {
            let messages = queue.receive(name, batch_size, lease)?;
            if messages.is_empty() {
                continue;
            }
            tracing::info!("Processing {} message(s) from {}", messages.len(), name);
            let report = self.handle_batch(queue, messages).await;
            total.processed += report.processed;
            total.failed += report.failed;
        }
        Ok(total)
    }

    /// Recompute readiness explicitly and notify on the transition.
    pub async fn refresh_readiness(&self, item_id: &str) -> Result<ReadinessUpdate> {
        let update = self.readiness.recompute(item_id)?;
        if update.became_ready {
            self.notify_ready(item_id).await;
        }
        Ok(update)
    }

    /// Notify on the ready transition. Errors are logged; `notify` has
    /// already recorded them on the item's iOS channel.
    async fn notify_ready(&self, item_id: &str) {
        if let Err(e) = self.notify(item_id, None).await {
            tracing::error!("Ready notification for {} failed: {}", short_id(item_id), e);
        }
    }

    /// Deliver the ready notification and persist the outcome on the item's iOS channel.
    pub async fn notify(&self, item_id: &str, target_device: Option<&str>) -> Result<PushOutcome> {
        let item = self
            .repo
            .get_item(item_id)?
            .ok_or_else(|| DogearError::ItemNotFound(item_id.to_string()))?;
        let doc = self.repo.get_reader(item_id)?;

        let outcome = match self.push.deliver(&item, doc.as_ref(), target_device).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let now = Utc::now();
                let recorded = self.repo.update_item(item_id, |item| {
                    let ios = &mut item.push_channels.ios;
                    ios.status = DeliveryStatus::Failed;
                    ios.updated_at = Some(now);
                    ios.last_error = Some(e.to_string());
                    Some(())
                });
                if let Err(store_err) = recorded {
                    tracing::error!(
                        "Could not record push failure for {}: {}",
                        short_id(item_id),
                        store_err
                    );
                }
                return Err(e);
            }
        };

        let now = Utc::now();
        self.repo.update_item(item_id, |item| {
            let ios = &mut item.push_channels.ios;
            ios.status = outcome.status();
            ios.updated_at = Some(now);
            ios.event_id = Some(outcome.event_id.clone());
            ios.last_error = outcome.last_error();
            Some(())
        })?;
        tracing::info!(
            "iOS channel for {} is now {:?}",
            short_id(item_id),
            outcome.status()
        );
        Ok(outcome)
    }
}
