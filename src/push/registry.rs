use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::app::Result;
use crate::domain::{DeviceRecord, DeviceRef, DeviceRegistration};
use crate::store::{keys, Repository};

/// One-way hash of a push token, used as the secondary index key.
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.trim().as_bytes()))
}

/// Push devices keyed by `(owner, device)` plus a `token hash -> device` index.
///
/// A token hash resolves to at most one device: registering a token that
/// another device holds evicts that other device.
#[derive(Clone)]
pub struct DeviceRegistry {
    repo: Repository,
}

impl DeviceRegistry {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub fn get(&self, owner_id: &str, device_id: &str) -> Result<Option<DeviceRecord>> {
        self.repo.get_json(&keys::device(owner_id, device_id))
    }

    pub fn upsert(&self, registration: DeviceRegistration) -> Result<DeviceRecord> {
        let now = Utc::now();
        let hash = token_hash(&registration.token);
        let this = DeviceRef {
            owner_id: registration.owner_id.clone(),
            device_id: registration.device_id.clone(),
        };
        let existing = self.get(&this.owner_id, &this.device_id)?;

        if let Some(previous) = &existing {
            if previous.token_hash != hash {
                self.unlink(&previous.token_hash, &this)?;
            }
        }

        let index_key = keys::device_token(&hash);
        if let Some(holder) = self.repo.get_json::<DeviceRef>(&index_key)? {
            if holder != this {
                tracing::info!(
                    "Token moved from device {}/{} to {}/{}, evicting the old device",
                    holder.owner_id,
                    holder.device_id,
                    this.owner_id,
                    this.device_id
                );
                self.repo
                    .kv()
                    .delete(&keys::device(&holder.owner_id, &holder.device_id))?;
            }
        }

        let record = DeviceRecord {
            owner_id: registration.owner_id,
            device_id: registration.device_id,
            token: registration.token.trim().to_string(),
            token_hash: hash,
            platform: registration.platform,
            environment: registration.environment,
            bundle_id: registration.bundle_id,
            app_version: registration.app_version,
            build_number: registration.build_number,
            registered_at: existing.map(|e| e.registered_at).unwrap_or(now),
            updated_at: now,
        };

        self.repo
            .put_json(&keys::device(&record.owner_id, &record.device_id), &record)?;
        self.repo.put_json(&index_key, &this)?;
        Ok(record)
    }

    /// Delete a device and, if it still owns it, its token index entry.
    ///
    /// Returns false when there was nothing to remove.
    pub fn remove(&self, owner_id: &str, device_id: &str) -> Result<bool> {
        let Some(record) = self.get(owner_id, device_id)? else {
            return Ok(false);
        };
        self.repo.kv().delete(&keys::device(owner_id, device_id))?;
        self.unlink(
            &record.token_hash,
            &DeviceRef {
                owner_id: owner_id.to_string(),
                device_id: device_id.to_string(),
            },
        )?;
        Ok(true)
    }

    pub fn list(&self, owner_id: &str) -> Result<Vec<DeviceRecord>> {
        let mut devices = Vec::new();
        for key in self.repo.kv().list(&keys::device_prefix(owner_id))? {
            if let Some(record) = self.repo.get_json::<DeviceRecord>(&key)? {
                devices.push(record);
            }
        }
        Ok(devices)
    }

    /// The device currently holding `token`, if any.
    pub fn resolve_token(&self, token: &str) -> Result<Option<DeviceRecord>> {
        let Some(holder) = self
            .repo
            .get_json::<DeviceRef>(&keys::device_token(&token_hash(token)))?
        else {
            return Ok(None);
        };
        self.get(&holder.owner_id, &holder.device_id)
    }

    fn unlink(&self, hash: &str, device: &DeviceRef) -> Result<()> {
        let index_key = keys::device_token(hash);
        if let Some(holder) = self.repo.get_json::<DeviceRef>(&index_key)? {
            if &holder == device {
                self.repo.kv().delete(&index_key)?;
            }
        }
        Ok(())
    }
}
