//! Per-item readiness: an item is ready for notification once both its
//! reader document and its cover exist.

use chrono::Utc;

use crate::app::{DogearError, Result};
use crate::domain::{Item, ReadinessReason, ReadinessStatus};
use crate::store::Repository;

/// Result of one readiness evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessUpdate {
    pub ready: bool,
    /// True only on the evaluation that moved the item from pending to ready.
    pub became_ready: bool,
    pub reason: Option<ReadinessReason>,
}

pub struct ReadinessTracker {
    repo: Repository,
    min_words: usize,
}

fn waiting_reason(reader_ready: bool, cover_ready: bool) -> Option<ReadinessReason> {
    match (reader_ready, cover_ready) {
        (true, true) => None,
        (false, true) => Some(ReadinessReason::WaitingForReader),
        (true, false) => Some(ReadinessReason::WaitingForCover),
        (false, false) => Some(ReadinessReason::WaitingForReaderAndCover),
    }
}

impl ReadinessTracker {
    pub fn new(repo: Repository, min_words: usize) -> Self {
        Self { repo, min_words }
    }

    /// Recompute and persist the readiness record of `item_id`.
    ///
    /// Push delivery is the caller's job when `became_ready` is set.
    pub fn recompute(&self, item_id: &str) -> Result<ReadinessUpdate> {
        let reader_ready = self
            .repo
            .get_reader(item_id)?
            .is_some_and(|doc| doc.passes_gate(self.min_words));

        let updated = self.repo.update_item(item_id, |item: &mut Item| {
            let cover_ready = item.cover.updated_at.is_some();
            Some(apply(item, reader_ready, cover_ready))
        })?;

        let update = updated
            .map(|(_, update)| update)
            .ok_or_else(|| DogearError::ItemNotFound(item_id.to_string()))?;

        if update.became_ready {
            tracing::info!("Item {} is ready", crate::domain::short_id(item_id));
        } else {
            tracing::debug!(
                "Item {} readiness: ready={} reason={:?}",
                crate::domain::short_id(item_id),
                update.ready,
                update.reason
            );
        }
        Ok(update)
    }
}

fn apply(item: &mut Item, reader_ready: bool, cover_ready: bool) -> ReadinessUpdate {
    let readiness = &mut item.push_channels.readiness;

    if readiness.status == ReadinessStatus::Ready {
        // Ready is sticky; readyAt is kept from the first transition
        if readiness.ready_at.is_none() {
            readiness.ready_at = Some(Utc::now());
        }
        readiness.reason = None;
        return ReadinessUpdate {
            ready: true,
            became_ready: false,
            reason: None,
        };
    }

    let reason = waiting_reason(reader_ready, cover_ready);
    readiness.reason = reason;

    if reason.is_none() {
        readiness.status = ReadinessStatus::Ready;
        readiness.ready_at.get_or_insert_with(Utc::now);
        return ReadinessUpdate {
            ready: true,
            became_ready: true,
            reason: None,
        };
    }

    ReadinessUpdate {
        ready: false,
        became_ready: false,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CoverBlob, ReaderDocument, DEFAULT_OWNER};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn setup() -> (Repository, ReadinessTracker, Item) {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        let item = Item::new(DEFAULT_OWNER, "https://example.com/a", None);
        repo.put_item(&item).unwrap();
        let tracker = ReadinessTracker::new(repo.clone(), 50);
        (repo, tracker, item)
    }

    fn document(words: usize) -> ReaderDocument {
        ReaderDocument {
            title: "t".into(),
            byline: None,
            excerpt: None,
            site_name: None,
            image_url: None,
            word_count: words,
            content_html: String::new(),
            retrieved_at: Utc::now(),
        }
    }

    fn set_cover(repo: &Repository, id: &str, present: bool) {
        repo.update_item(id, |item| {
            item.cover.updated_at = present.then(Utc::now);
            Some(())
        })
        .unwrap();
        if present {
            let blob = CoverBlob {
                base64: "AA==".into(),
                content_type: "image/png".into(),
                created_at: Utc::now(),
            };
            repo.put_cover(id, &blob).unwrap();
        }
    }

    #[test]
    fn test_waiting_reasons() {
        let (repo, tracker, item) = setup();
        let update = tracker.recompute(&item.id).unwrap();
        assert_eq!(update.reason, Some(ReadinessReason::WaitingForReaderAndCover));

        repo.put_reader(&item.id, &document(100)).unwrap();
        let update = tracker.recompute(&item.id).unwrap();
        assert_eq!(update.reason, Some(ReadinessReason::WaitingForCover));
        assert!(!update.ready);

        let stored = repo.get_item(&item.id).unwrap().unwrap();
        assert_eq!(stored.push_channels.readiness.status, ReadinessStatus::Pending);
        assert_eq!(
            stored.push_channels.readiness.reason,
            Some(ReadinessReason::WaitingForCover)
        );
    }

    #[test]
    fn test_thin_reader_document_does_not_count() {
        let (repo, tracker, item) = setup();
        repo.put_reader(&item.id, &document(10)).unwrap();
        set_cover(&repo, &item.id, true);
        let update = tracker.recompute(&item.id).unwrap();
        assert_eq!(update.reason, Some(ReadinessReason::WaitingForReader));
    }

    #[test]
    fn test_becomes_ready_once() {
        let (repo, tracker, item) = setup();
        repo.put_reader(&item.id, &document(100)).unwrap();
        set_cover(&repo, &item.id, true);

        let first = tracker.recompute(&item.id).unwrap();
        assert!(first.ready);
        assert!(first.became_ready);

        let second = tracker.recompute(&item.id).unwrap();
        assert!(second.ready);
        assert!(!second.became_ready);
    }

    #[test]
    fn test_ready_at_survives_regression() {
        let (repo, tracker, item) = setup();
        repo.put_reader(&item.id, &document(100)).unwrap();
        set_cover(&repo, &item.id, true);
        tracker.recompute(&item.id).unwrap();
        let ready_at = repo
            .get_item(&item.id)
            .unwrap()
            .unwrap()
            .push_channels
            .readiness
            .ready_at;
        assert!(ready_at.is_some());

        // Reader and cover both disappear
        repo.delete_reader(&item.id).unwrap();
        set_cover(&repo, &item.id, false);
        let update = tracker.recompute(&item.id).unwrap();
        assert!(update.ready);

        let stored = repo.get_item(&item.id).unwrap().unwrap();
        assert_eq!(stored.push_channels.readiness.status, ReadinessStatus::Ready);
        assert_eq!(stored.push_channels.readiness.ready_at, ready_at);
    }

    #[test]
    fn test_missing_item_is_an_error() {
        let (_, tracker, _) = setup();
        assert!(tracker.recompute("nope").is_err());
    }
}
