pub mod keys;
pub mod memory;
pub mod repository;
pub mod sqlite;

use crate::app::Result;

pub use memory::MemoryStore;
pub use repository::Repository;
pub use sqlite::SqliteStore;

/// A stored value together with its write version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: String,
    pub version: i64,
}

/// Key-value substrate with prefix listing and a conditional write.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Versioned>>;

    /// Unconditional write. Returns the new version.
    fn put(&self, key: &str, value: &str) -> Result<i64>;

    /// Write only if the stored version equals `expected` (`None` means the key must be absent).
    ///
    /// Returns false when another writer got there first.
    fn put_if_version(&self, key: &str, value: &str, expected: Option<i64>) -> Result<bool>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Keys starting with `prefix`, in lexical order.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}
