//! Namespaced keys for records in the key-value store.

pub fn item(id: &str) -> String {
    format!("item:{}", id)
}

pub const ITEM_PREFIX: &str = "item:";

pub fn reader(id: &str) -> String {
    format!("reader:{}", id)
}

pub fn cover(id: &str) -> String {
    format!("cover:{}", id)
}

pub fn device(owner_id: &str, device_id: &str) -> String {
    format!("device:{}:{}", owner_id, device_id)
}

pub fn device_prefix(owner_id: &str) -> String {
    format!("device:{}:", owner_id)
}

pub fn device_token(token_hash: &str) -> String {
    format!("device-token:{}", token_hash)
}
