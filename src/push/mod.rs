//! Push Delivery Service: device registry, provider tokens and per-device
//! delivery with pruning of permanently dead tokens.

pub mod jwt;
pub mod payload;
pub mod registry;
pub mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::{DogearError, Result};
use crate::domain::{DeliveryStatus, DeviceRecord, Item, Platform, ReaderDocument};

pub use jwt::{der_to_jose, DerSigner, P256Signer, ProviderTokenSigner, TokenCache};
pub use payload::ready_payload;
pub use registry::{token_hash, DeviceRegistry};
pub use transport::{HttpPushTransport, PushRequest, PushResponse, PushTransport};

/// Provider reasons meaning the token will never work again.
pub const TERMINAL_REASONS: &[&str] = &[
    "BadDeviceToken",
    "Unregistered",
    "DeviceTokenNotForTopic",
    "ExpiredToken",
];

/// Provider reasons meaning our bearer token was rejected.
const PROVIDER_TOKEN_REASONS: &[&str] = &["ExpiredProviderToken", "InvalidProviderToken"];

pub fn is_terminal_reason(reason: &str) -> bool {
    TERMINAL_REASONS.contains(&reason)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub team_id: Option<String>,
    pub key_id: Option<String>,
    /// PKCS#8 PEM; `DOGEAR_PUSH_PRIVATE_KEY` takes precedence.
    pub private_key: Option<String>,
    pub private_key_path: Option<PathBuf>,
    /// Default `apns-topic` for devices registered without a bundle id.
    pub topic: Option<String>,
    pub sandbox_host: String,
    pub production_host: String,
    pub timeout_secs: u64,
    pub token_ttl_minutes: i64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            team_id: None,
            key_id: None,
            private_key: None,
            private_key_path: None,
            topic: None,
            sandbox_host: transport::SANDBOX_HOST.to_string(),
            production_host: transport::PRODUCTION_HOST.to_string(),
            timeout_secs: 10,
            token_ttl_minutes: 50,
        }
    }
}

impl PushConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn private_key_pem(&self) -> Result<String> {
        if let Some(pem) = self.private_key.as_deref().filter(|p| !p.trim().is_empty()) {
            return Ok(pem.to_string());
        }
        match &self.private_key_path {
            Some(path) => Ok(std::fs::read_to_string(path)?),
            None => Err(DogearError::ConfigMissing("push.private_key".to_string())),
        }
    }

    /// Build the provider token signer, or explain which credential is missing.
    pub fn signer(&self) -> Result<ProviderTokenSigner> {
        let team_id = self
            .team_id
            .as_deref()
            .ok_or_else(|| DogearError::ConfigMissing("push.team_id".to_string()))?;
        let key_id = self
            .key_id
            .as_deref()
            .ok_or_else(|| DogearError::ConfigMissing("push.key_id".to_string()))?;
        let key = P256Signer::from_pkcs8_pem(&self.private_key_pem()?)?;
        let cache = Arc::new(TokenCache::new(chrono::Duration::minutes(self.token_ttl_minutes)));
        Ok(ProviderTokenSigner::new(team_id, key_id, Arc::new(key), cache))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoDevices,
    NoValidDevices,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoDevices => "no_devices",
            SkipReason::NoValidDevices => "no_valid_devices",
        }
    }
}

/// Aggregate result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub event_id: String,
    pub attempted_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub pruned_count: usize,
    pub skipped: Option<SkipReason>,
    /// Delivery-wide failure, e.g. signing; no device was attempted.
    pub error: Option<String>,
}

impl PushOutcome {
    fn new(event_id: String) -> Self {
        Self {
            event_id,
            attempted_count: 0,
            success_count: 0,
            failed_count: 0,
            pruned_count: 0,
            skipped: None,
            error: None,
        }
    }

    pub fn delivered(&self) -> bool {
        self.success_count > 0
    }

    pub fn status(&self) -> DeliveryStatus {
        if self.skipped.is_some() {
            DeliveryStatus::Skipped
        } else if self.delivered() {
            DeliveryStatus::Sent
        } else {
            DeliveryStatus::Failed
        }
    }

    /// Human-readable reason when nothing was delivered.
    pub fn last_error(&self) -> Option<String> {
        if let Some(skipped) = self.skipped {
            return Some(skipped.as_str().to_string());
        }
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        (!self.delivered()).then(|| format!("{} of {} devices failed", self.failed_count, self.attempted_count))
    }
}

pub struct PushService {
    registry: DeviceRegistry,
    transport: Arc<dyn PushTransport>,
    signer: Option<Arc<ProviderTokenSigner>>,
    default_topic: Option<String>,
}

impl PushService {
    pub fn new(
        registry: DeviceRegistry,
        transport: Arc<dyn PushTransport>,
        signer: Option<Arc<ProviderTokenSigner>>,
        default_topic: Option<String>,
    ) -> Self {
        Self {
            registry,
            transport,
            signer,
            default_topic,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    fn topic_for<'a>(&'a self, device: &'a DeviceRecord) -> Option<&'a str> {
        device.bundle_id.as_deref().or(self.default_topic.as_deref())
    }

    /// Notify the owner's iOS devices that `item` is ready.
    ///
    /// A failed device listing propagates. Everything after that, including
    /// pruning errors, is logged and reported in the outcome.
    pub async fn deliver(
        &self,
        item: &Item,
        doc: Option<&ReaderDocument>,
        target_device: Option<&str>,
    ) -> Result<PushOutcome> {
        let mut outcome = PushOutcome::new(Uuid::new_v4().to_string());

        let devices = self.registry.list(&item.owner_id)?;
        if devices.is_empty() {
            tracing::debug!("No devices registered for {}", item.owner_id);
            outcome.skipped = Some(SkipReason::NoDevices);
            return Ok(outcome);
        }

        let targets: Vec<&DeviceRecord> = devices
            .iter()
            .filter(|d| d.platform == Platform::Ios)
            .filter(|d| !d.token.is_empty())
            .filter(|d| target_device.map_or(true, |target| d.device_id == target))
            .filter(|d| self.topic_for(d).is_some())
            .collect();
        if targets.is_empty() {
            tracing::debug!("No deliverable devices for {}", item.owner_id);
            outcome.skipped = Some(SkipReason::NoValidDevices);
            return Ok(outcome);
        }

        let bearer = match self.bearer() {
            Ok(bearer) => bearer,
            Err(e) => {
                tracing::error!("Cannot sign push credentials: {}", e);
                outcome.error = Some(e.to_string());
                return Ok(outcome);
            }
        };

        let payload = ready_payload(item, doc, &outcome.event_id);
        for device in targets {
            outcome.attempted_count += 1;
            let Some(topic) = self.topic_for(device) else {
                continue;
            };
            let request = PushRequest {
                device_token: &device.token,
                environment: device.environment,
                topic,
                bearer: &bearer,
                collapse_id: Some(&item.id),
                payload: &payload,
            };

            match self.transport.send(&request).await {
                Ok(response) if response.is_success() => {
                    outcome.success_count += 1;
                    tracing::debug!("Push sent to device {}", device.device_id);
                }
                Ok(response) => {
                    outcome.failed_count += 1;
                    let reason = response.reason.unwrap_or_default();
                    tracing::warn!(
                        "Push to device {} rejected: {} {}",
                        device.device_id,
                        response.status,
                        reason
                    );
                    if is_terminal_reason(&reason) {
                        match self.registry.remove(&device.owner_id, &device.device_id) {
                            Ok(true) => {
                                outcome.pruned_count += 1;
                                tracing::info!("Pruned device {} ({})", device.device_id, reason);
                            }
                            Ok(false) => {}
                            Err(e) => {
                                tracing::error!(
                                    "Could not prune device {}: {}",
                                    device.device_id,
                                    e
                                );
                            }
                        }
                    } else if PROVIDER_TOKEN_REASONS.contains(&reason.as_str()) {
                        if let Some(signer) = &self.signer {
                            signer.invalidate();
                        }
                    }
                }
                Err(e) => {
                    outcome.failed_count += 1;
                    tracing::warn!("Push to device {} failed: {}", device.device_id, e);
                }
            }
        }

        tracing::info!(
            "Push for {}: {} sent, {} failed, {} pruned",
            item.short_id(),
            outcome.success_count,
            outcome.failed_count,
            outcome.pruned_count
        );
        Ok(outcome)
    }

    fn bearer(&self) -> Result<String> {
        self.signer
            .as_ref()
            .ok_or_else(|| DogearError::ConfigMissing("push credentials".to_string()))?
            .bearer()
    }
}
