//! # PwaKit IDB
//!
//! A scoped key-value wrapper over one named object store inside one named
//! database.
//!
//! ## Features
//!
//! - **get / set / delete / clear / keys**, each in its own transaction
//! - **Ordered keys**: numbers before strings, numbers ascending
//! - **Backends**: [`MemoryStore`] (transient) and [`SqliteStore`] (durable)
//!
//! No multi-operation transactions are exposed. Two calls are never atomic
//! with respect to each other.
//!
//! ## Architecture
//!
//! ```text
//! KeyValueStore (trait)
//!     ├── MemoryStore  ── BTreeMap<Key, JsonValue>
//!     └── SqliteStore  ── <data_dir>/<db_name>.sqlite3
//!                             └── table <store_name>
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use thiserror::Error;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

// ==================== Errors ====================

/// Key-value store errors.
#[derive(Error, Debug, Clone)]
pub enum IdbError {
    /// The underlying store cannot be opened or used.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored value could not be encoded or decoded.
    #[error("Data error: {0}")]
    DataError(String),
}

impl IdbError {
    pub fn unavailable(message: impl fmt::Display) -> Self {
        Self::StoreUnavailable(message.to_string())
    }
}

// ==================== Keys ====================

/// A record key.
///
/// Ordering follows the store's natural key order: every number sorts
/// before every string, numbers ascend numerically and strings by code unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Number(i64),
    String(String),
}

impl Key {
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Key::Number(n) => Some(*n),
            Key::String(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{}", n),
            Key::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

// ==================== Store ====================

/// One object store in one database.
///
/// `delete` of an absent key succeeds, so concurrent deleters never race
/// into an error.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Database name.
    fn db_name(&self) -> &str;

    /// Object store name.
    fn store_name(&self) -> &str;

    async fn get(&self, key: &Key) -> Result<Option<JsonValue>, IdbError>;

    /// Insert or overwrite.
    async fn set(&self, key: Key, value: JsonValue) -> Result<(), IdbError>;

    async fn delete(&self, key: &Key) -> Result<(), IdbError>;

    async fn clear(&self) -> Result<(), IdbError>;

    /// All keys in natural key order.
    async fn keys(&self) -> Result<Vec<Key>, IdbError>;
}
