//! Delayed-delivery message queue capability.
//!
//! Delivery is at-least-once: a received message stays leased until it is
//! acknowledged, and becomes visible again once the lease runs out.

use std::time::Duration;

use crate::app::Result;

pub const COVER_QUEUE: &str = "cover";
pub const EMAIL_SYNC_QUEUE: &str = "kindle-sync";

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub id: i64,
    pub queue: String,
    pub body: serde_json::Value,
    /// How many times this message has been handed out, including this one.
    pub deliveries: u32,
}

pub trait JobQueue: Send + Sync {
    /// Send a message, optionally hidden from consumers for `delay`.
    fn send(&self, queue: &str, body: &serde_json::Value, delay: Option<Duration>) -> Result<()>;

    /// Lease up to `limit` due messages for `lease`.
    fn receive(&self, queue: &str, limit: usize, lease: Duration) -> Result<Vec<QueuedMessage>>;

    fn ack(&self, id: i64) -> Result<()>;
}
