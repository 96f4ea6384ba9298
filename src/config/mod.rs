//! Configuration management for Dogear.
//!
//! Configuration is read from `~/.config/dogear/config.toml` at startup.
//! A commented template is written there on first run.
//! Secrets may instead come from the environment so they stay out of the file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cover::CoverConfig;
use crate::mail::KindleConfig;
use crate::push::PushConfig;
use crate::reader::ReaderConfig;

pub const IMAGE_API_KEY_ENV: &str = "DOGEAR_IMAGE_API_KEY";
pub const MAIL_API_KEY_ENV: &str = "DOGEAR_MAIL_API_KEY";
pub const PUSH_PRIVATE_KEY_ENV: &str = "DOGEAR_PUSH_PRIVATE_KEY";

/// Everything the pipeline and the worker read at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub reader: ReaderConfig,
    pub cover: CoverConfig,
    pub kindle: KindleConfig,
    pub push: PushConfig,
    pub worker: WorkerConfig,
}

/// Queue worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Poll interval in seconds (default: 5)
    pub poll_interval_secs: u64,

    /// Messages leased per queue per poll (default: 10)
    pub batch_size: usize,

    /// Seconds a leased message stays invisible before redelivery (default: 300)
    pub lease_secs: u64,

    /// Database path; defaults to the platform data directory
    pub db_path: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            batch_size: 10,
            lease_secs: 300,
            db_path: None,
        }
    }
}

impl WorkerConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

impl Config {
    /// Read `~/.config/dogear/config.toml`, writing the template first if it
    /// is absent, then overlay environment secrets. Unset keys keep defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load a config file without consulting the environment.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Overlay secrets found by `lookup`; empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = lookup(IMAGE_API_KEY_ENV) {
            self.cover.api_key = Some(key);
        }
        if let Some(key) = lookup(MAIL_API_KEY_ENV) {
            self.kindle.api_key = Some(key);
        }
        if let Some(pem) = lookup(PUSH_PRIVATE_KEY_ENV) {
            // Single-line env values often carry escaped newlines
            self.push.private_key = Some(pem.replace("\\n", "\n"));
        }
    }

    /// Get the default config file path: `~/.config/dogear/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("dogear").join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        tracing::info!("Wrote default configuration to {}", path.display());
        Ok(())
    }

    /// Template written on first run.
    fn default_config_content() -> String {
        r##"# Dogear configuration
#
# Secrets can be left out of this file and supplied by environment:
#   DOGEAR_IMAGE_API_KEY     cover.api_key
#   DOGEAR_MAIL_API_KEY      kindle.api_key
#   DOGEAR_PUSH_PRIVATE_KEY  push.private_key (PKCS#8 PEM)
#
# Missing credentials do not stop Dogear from starting; the affected jobs
# fail with "config_missing" instead.

[reader]
# Extractions with fewer words are discarded
min_words = 50

# Timeout for fetching the raw page in seconds
fetch_timeout_secs = 20

# Fall back to a headless browser for client-rendered pages
render_enabled = true
headless = true
navigation_timeout_secs = 20
render_timeout_secs = 30

# The page counts as settled once its visible text length changes by less
# than settle_threshold_chars for settle_window_ms
settle_poll_ms = 500
settle_window_ms = 1500
settle_threshold_chars = 50

[cover]
base_url = "https://api.openai.com/v1"
model = "gpt-image-1"
size = "1024x1536"
quality = "medium"
timeout_secs = 180

# Stream partial images while generating
stream = false
partial_images = 2

# Largest page-declared cover image accepted, in bytes
max_image_bytes = 5242880

snippet_max_words = 1000
snippet_min_words = 40

[cover.retry]
max_attempts = 3
retry_delays_secs = [30, 120, 600]

[kindle]
# to_address = "you@kindle.com"
# from_address = "dogear@example.com"
base_url = "https://api.resend.com"
timeout_secs = 30

# Email every saved article automatically
auto_sync = false

[kindle.retry]
max_attempts = 4
retry_delays_secs = [60, 300, 900]

[push]
# team_id = "ABCDE12345"
# key_id = "KEY1234567"
# private_key_path = "/path/to/AuthKey.p8"
# topic = "com.example.dogear"
sandbox_host = "https://api.sandbox.push.apple.com"
production_host = "https://api.push.apple.com"
timeout_secs = 10

# Provider tokens are reused for this long
token_ttl_minutes = 50

[worker]
poll_interval_secs = 5
batch_size = 10
lease_secs = 300
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
