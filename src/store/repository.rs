use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::app::{DogearError, Result};
use crate::domain::{CoverBlob, Item, ReaderDocument};
use crate::store::{keys, KvStore};

/// Attempts at a compare-and-swap update before giving up.
const MAX_CAS_ATTEMPTS: usize = 5;

/// Typed access to the records the pipeline owns.
#[derive(Clone)]
pub struct Repository {
    kv: Arc<dyn KvStore>,
}

impl Repository {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        Ok(self.get_versioned(key)?.map(|(value, _)| value))
    }

    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.kv.put(key, &serde_json::to_string(value)?)?;
        Ok(())
    }

    fn get_versioned<T: DeserializeOwned>(&self, key: &str) -> Result<Option<(T, i64)>> {
        match self.kv.get(key)? {
            Some(stored) => Ok(Some((
                serde_json::from_str(&stored.value)?,
                stored.version,
            ))),
            None => Ok(None),
        }
    }

    // Items

    pub fn get_item(&self, id: &str) -> Result<Option<Item>> {
        self.get_json(&keys::item(id))
    }

    pub fn put_item(&self, item: &Item) -> Result<()> {
        self.put_json(&keys::item(&item.id), item)
    }

    /// Insert a new item; returns false if one with the same id exists.
    pub fn create_item(&self, item: &Item) -> Result<bool> {
        self.kv
            .put_if_version(&keys::item(&item.id), &serde_json::to_string(item)?, None)
    }

    pub fn list_item_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .kv
            .list(keys::ITEM_PREFIX)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(keys::ITEM_PREFIX).map(String::from))
            .collect())
    }

    /// Read-modify-write an item as one conditional write.
    ///
    /// `apply` returns `None` to abandon the update without writing. It may
    /// run more than once when another writer races us.
    pub fn update_item<T>(
        &self,
        id: &str,
        mut apply: impl FnMut(&mut Item) -> Option<T>,
    ) -> Result<Option<(Item, T)>> {
        let key = keys::item(id);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some((mut item, version)) = self.get_versioned::<Item>(&key)? else {
                return Err(DogearError::ItemNotFound(id.to_string()));
            };
            let Some(result) = apply(&mut item) else {
                return Ok(None);
            };
            let encoded = serde_json::to_string(&item)?;
            if self.kv.put_if_version(&key, &encoded, Some(version))? {
                return Ok(Some((item, result)));
            }
            tracing::debug!("Concurrent write on {}, retrying update", key);
        }
        Err(DogearError::Conflict(key))
    }

    // Reader documents

    pub fn get_reader(&self, id: &str) -> Result<Option<ReaderDocument>> {
        self.get_json(&keys::reader(id))
    }

    pub fn put_reader(&self, id: &str, doc: &ReaderDocument) -> Result<()> {
        self.put_json(&keys::reader(id), doc)
    }

    pub fn delete_reader(&self, id: &str) -> Result<()> {
        self.kv.delete(&keys::reader(id))
    }

    // Cover blobs

    pub fn get_cover(&self, id: &str) -> Result<Option<CoverBlob>> {
        self.get_json(&keys::cover(id))
    }

    pub fn put_cover(&self, id: &str, blob: &CoverBlob) -> Result<()> {
        self.put_json(&keys::cover(id), blob)
    }

    pub fn has_cover(&self, id: &str) -> Result<bool> {
        Ok(self.kv.get(&keys::cover(id))?.is_some())
    }
}
