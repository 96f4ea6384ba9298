//! # Dogear
//!
//! Save an article once; Dogear extracts a reader view, generates a cover,
//! emails a copy to a reading device and notifies your phone when the
//! article is ready.
//!
//! ## Architecture
//!
//! ```text
//! save → Reader → Cover job ─┐
//!                Email job ──┼→ Readiness → Push
//! ```
//!
//! Jobs run off an at-least-once queue. Each channel's state lives on the
//! item behind a token, so redelivered or superseded messages are no-ops.
//!
//! ## Quick Start
//!
//! ```bash
//! # Save an article
//! dogear save https://example.com/post
//!
//! # Process queued jobs
//! dogear worker
//!
//! # Inspect an item
//! dogear status 3f2a
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the store,
/// the queue, the external capabilities and the [`Pipeline`](pipeline::Pipeline).
pub mod app;

/// Command-line interface using clap.
pub mod cli;

/// Configuration loaded from `~/.config/dogear/config.toml`.
pub mod config;

/// Cover generation: page-declared images or an image-generation API.
pub mod cover;

/// Queue worker with PID file and signal handling.
pub mod daemon;

/// Core domain models: items, job state, reader documents, devices.
pub mod domain;

/// HTTP fetching of pages and images.
///
/// - [`Fetcher`](fetcher::Fetcher): Async trait for fetching
/// - [`HttpFetcher`](fetcher::HttpFetcher): reqwest-based implementation
pub mod fetcher;

/// Retryable jobs and the cover and email-sync channels.
pub mod jobs;

/// Outbound email for the reading-device channel.
pub mod mail;

/// Stage glue: on-save flow, queue dispatch, readiness → push.
pub mod pipeline;

/// Push notifications: device registry, provider tokens, delivery.
pub mod push;

/// Delayed-delivery job queue capability.
pub mod queue;

/// Content extraction with an optional headless-browser fallback.
pub mod reader;

/// Readiness tracking across the reader and cover channels.
pub mod readiness;

/// Key-value persistence with conditional writes.
///
/// - [`KvStore`](store::KvStore): Trait for the substrate
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
/// - [`MemoryStore`](store::MemoryStore): In-memory implementation
pub mod store;
