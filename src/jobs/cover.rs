use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app::{DogearError, Result};
use crate::cover::CoverGenerator;
use crate::domain::{Item, JobState, JobToken};
use crate::jobs::JobChannel;
use crate::queue::COVER_QUEUE;
use crate::reader::ContentReader;
use crate::store::Repository;

/// Cover generation as a retryable job.
pub struct CoverChannel {
    repo: Repository,
    reader: Arc<ContentReader>,
    generator: Arc<CoverGenerator>,
}

impl CoverChannel {
    pub fn new(repo: Repository, reader: Arc<ContentReader>, generator: Arc<CoverGenerator>) -> Self {
        Self {
            repo,
            reader,
            generator,
        }
    }
}

#[async_trait]
impl JobChannel for CoverChannel {
    fn name(&self) -> &'static str {
        "cover"
    }

    fn queue(&self) -> &'static str {
        COVER_QUEUE
    }

    fn state<'a>(&self, item: &'a Item) -> &'a JobState {
        &item.cover_sync
    }

    fn state_mut<'a>(&self, item: &'a mut Item) -> &'a mut JobState {
        &mut item.cover_sync
    }

    fn token(&self, value: String) -> JobToken {
        JobToken::JobId(value)
    }

    fn is_satisfied(&self, item: &Item) -> Result<bool> {
        self.repo.has_cover(&item.id)
    }

    async fn run(&self, item: &Item) -> Result<()> {
        let doc = self
            .reader
            .load_or_extract(&self.repo, item)
            .await?
            .ok_or_else(|| DogearError::Parse(format!("no readable content at {}", item.url)))?;

        self.generator.generate(item, &doc, None).await?;
        Ok(())
    }

    fn record_success(&self, item: &mut Item, now: DateTime<Utc>) {
        item.cover.updated_at = Some(now);
    }
}
