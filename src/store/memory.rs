use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::app::{DogearError, Result};
use crate::queue::{JobQueue, QueuedMessage};
use crate::store::{KvStore, Versioned};

/// A message as it was handed to [`JobQueue::send`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub queue: String,
    pub body: serde_json::Value,
    pub delay: Option<Duration>,
}

struct Pending {
    id: i64,
    queue: String,
    body: serde_json::Value,
    visible_at: Instant,
    deliveries: u32,
}

/// In-process store and queue. Keeps a log of every sent message.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, Versioned>>,
    pending: Mutex<Vec<Pending>>,
    sent: Mutex<Vec<SentMessage>>,
    next_id: AtomicI64,
    fail_sends: AtomicBool,
    fail_prefix: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `send` fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make `delete` and `list` fail for keys under `prefix`.
    pub fn set_fail_prefix(&self, prefix: Option<&str>) {
        if let Ok(mut slot) = self.fail_prefix.lock() {
            *slot = prefix.map(String::from);
        }
    }

    fn check_prefix(&self, key: &str) -> Result<()> {
        let slot = self.fail_prefix.lock().map_err(Self::lock_error)?;
        match slot.as_deref() {
            Some(prefix) if key.starts_with(prefix) => Err(DogearError::Other(format!(
                "memory store refused {}",
                key
            ))),
            _ => Ok(()),
        }
    }

    /// Every message sent so far on `queue`, in order.
    pub fn sent(&self, queue: &str) -> Vec<SentMessage> {
        self.sent
            .lock()
            .map(|sent| sent.iter().filter(|m| m.queue == queue).cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return every message on `queue`, ignoring delays.
    pub fn drain(&self, queue: &str) -> Vec<QueuedMessage> {
        let Ok(mut pending) = self.pending.lock() else {
            return Vec::new();
        };
        let (taken, kept): (Vec<_>, Vec<_>) =
            pending.drain(..).partition(|message| message.queue == queue);
        *pending = kept;
        taken
            .into_iter()
            .map(|message| QueuedMessage {
                id: message.id,
                queue: message.queue,
                body: message.body,
                deliveries: message.deliveries + 1,
            })
            .collect()
    }

    fn lock_error<T>(e: std::sync::PoisonError<T>) -> DogearError {
        DogearError::Other(format!("Memory store lock poisoned: {}", e))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Versioned>> {
        let records = self.records.lock().map_err(Self::lock_error)?;
        Ok(records.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<i64> {
        let mut records = self.records.lock().map_err(Self::lock_error)?;
        let version = records.get(key).map(|v| v.version + 1).unwrap_or(1);
        records.insert(
            key.to_string(),
            Versioned {
                value: value.to_string(),
                version,
            },
        );
        Ok(version)
    }

    fn put_if_version(&self, key: &str, value: &str, expected: Option<i64>) -> Result<bool> {
        let mut records = self.records.lock().map_err(Self::lock_error)?;
        let current = records.get(key).map(|v| v.version);
        if current != expected {
            return Ok(false);
        }
        records.insert(
            key.to_string(),
            Versioned {
                value: value.to_string(),
                version: current.unwrap_or(0) + 1,
            },
        );
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.check_prefix(key)?;
        let mut records = self.records.lock().map_err(Self::lock_error)?;
        records.remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.check_prefix(prefix)?;
        let records = self.records.lock().map_err(Self::lock_error)?;
        Ok(records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

impl JobQueue for MemoryStore {
    fn send(&self, queue: &str, body: &serde_json::Value, delay: Option<Duration>) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(DogearError::Queue(format!("send to {} rejected", queue)));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending
            .lock()
            .map_err(Self::lock_error)?
            .push(Pending {
                id,
                queue: queue.to_string(),
                body: body.clone(),
                visible_at: Instant::now() + delay.unwrap_or_default(),
                deliveries: 0,
            });
        self.sent.lock().map_err(Self::lock_error)?.push(SentMessage {
            queue: queue.to_string(),
            body: body.clone(),
            delay,
        });
        Ok(())
    }

    fn receive(&self, queue: &str, limit: usize, lease: Duration) -> Result<Vec<QueuedMessage>> {
        let mut pending = self.pending.lock().map_err(Self::lock_error)?;
        let now = Instant::now();
        let mut batch = Vec::new();
        for message in pending
            .iter_mut()
            .filter(|m| m.queue == queue && m.visible_at <= now)
            .take(limit)
        {
            message.visible_at = now + lease;
            message.deliveries += 1;
            batch.push(QueuedMessage {
                id: message.id,
                queue: message.queue.clone(),
                body: message.body.clone(),
                deliveries: message.deliveries,
            });
        }
        Ok(batch)
    }

    fn ack(&self, id: i64) -> Result<()> {
        let mut pending = self.pending.lock().map_err(Self::lock_error)?;
        pending.retain(|m| m.id != id);
        Ok(())
    }
}
