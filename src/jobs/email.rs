use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app::{DogearError, Result};
use crate::domain::{DeliveryStatus, Item, JobState, JobStatus, JobToken};
use crate::jobs::{JobChannel, JobFailure};
use crate::mail::{attachment_filename, kindle_document, Attachment, KindleConfig, Mailer, OutboundEmail};
use crate::queue::EMAIL_SYNC_QUEUE;
use crate::reader::ContentReader;
use crate::store::Repository;

/// Emailing the article to a reading device as a retryable job.
pub struct EmailSyncChannel {
    repo: Repository,
    reader: Arc<ContentReader>,
    mailer: Arc<dyn Mailer>,
    config: KindleConfig,
}

impl EmailSyncChannel {
    pub fn new(
        repo: Repository,
        reader: Arc<ContentReader>,
        mailer: Arc<dyn Mailer>,
        config: KindleConfig,
    ) -> Self {
        Self {
            repo,
            reader,
            mailer,
            config,
        }
    }

    fn addresses(&self) -> Result<(&str, &str)> {
        let to = self
            .config
            .to_address
            .as_deref()
            .ok_or_else(|| DogearError::ConfigMissing("kindle.to_address".to_string()))?;
        let from = self
            .config
            .from_address
            .as_deref()
            .ok_or_else(|| DogearError::ConfigMissing("kindle.from_address".to_string()))?;
        Ok((from, to))
    }
}

/// Synced at or after the latest cover, so the device copy is current.
fn synced_with_cover(item: &Item) -> bool {
    if item.kindle.job.status != JobStatus::Succeeded {
        return false;
    }
    match (item.kindle.last_synced_at, item.cover.updated_at) {
        (Some(synced), Some(cover)) => synced >= cover,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[async_trait]
impl JobChannel for EmailSyncChannel {
    fn name(&self) -> &'static str {
        "kindle"
    }

    fn queue(&self) -> &'static str {
        EMAIL_SYNC_QUEUE
    }

    fn state<'a>(&self, item: &'a Item) -> &'a JobState {
        &item.kindle.job
    }

    fn state_mut<'a>(&self, item: &'a mut Item) -> &'a mut JobState {
        &mut item.kindle.job
    }

    fn token(&self, value: String) -> JobToken {
        JobToken::SyncVersion(value)
    }

    fn is_satisfied(&self, item: &Item) -> Result<bool> {
        Ok(synced_with_cover(item))
    }

    async fn run(&self, item: &Item) -> Result<()> {
        let (from, to) = self.addresses()?;

        let doc = self
            .reader
            .load_or_extract(&self.repo, item)
            .await?
            .ok_or_else(|| DogearError::Parse(format!("no readable content at {}", item.url)))?;
        let cover = self.repo.get_cover(&item.id)?;

        let title = item.title.as_deref().unwrap_or(&doc.title);
        let email = OutboundEmail {
            from: from.to_string(),
            to: to.to_string(),
            subject: title.to_string(),
            text: format!("{}\n{}", title, item.url),
            attachments: vec![Attachment {
                filename: attachment_filename(title),
                content_type: "text/html".to_string(),
                content: kindle_document(item, &doc, cover.as_ref()).into_bytes(),
            }],
        };

        self.mailer.send(&email).await
    }

    fn record_success(&self, item: &mut Item, now: DateTime<Utc>) {
        item.kindle.last_synced_at = Some(now);
        let channel = &mut item.push_channels.kindle;
        channel.status = DeliveryStatus::Sent;
        channel.updated_at = Some(now);
        channel.last_error = None;
    }

    fn record_failure(&self, item: &mut Item, failure: &JobFailure, now: DateTime<Utc>) {
        let channel = &mut item.push_channels.kindle;
        channel.status = DeliveryStatus::Failed;
        channel.updated_at = Some(now);
        channel.last_error = Some(failure.message.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_OWNER;

    #[test]
    fn test_synced_with_cover() {
        let mut item = Item::new(DEFAULT_OWNER, "https://example.com/a", None);
        assert!(!synced_with_cover(&item));

        let now = Utc::now();
        item.kindle.job.status = JobStatus::Succeeded;
        item.kindle.last_synced_at = Some(now);
        assert!(synced_with_cover(&item));

        // A newer cover makes the device copy stale
        item.cover.updated_at = Some(now + chrono::Duration::seconds(5));
        assert!(!synced_with_cover(&item));

        item.cover.updated_at = Some(now - chrono::Duration::seconds(5));
        assert!(synced_with_cover(&item));
    }
}
