//! Transient in-memory store.

use crate::{IdbError, Key, KeyValueStore};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory object store. Contents are lost when the process exits.
///
/// Clones share the same records.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    db_name: String,
    store_name: String,
    records: Arc<RwLock<BTreeMap<Key, JsonValue>>>,
    available: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new(db_name: &str, store_name: &str) -> Self {
        Self {
            db_name: db_name.to_string(),
            store_name: store_name.to_string(),
            records: Arc::new(RwLock::new(BTreeMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the store becoming unopenable (quota exhausted, private mode).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), IdbError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IdbError::unavailable(format!(
                "{}/{} cannot be opened",
                self.db_name, self.store_name
            )))
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn db_name(&self) -> &str {
        &self.db_name
    }

    fn store_name(&self) -> &str {
        &self.store_name
    }

    async fn get(&self, key: &Key) -> Result<Option<JsonValue>, IdbError> {
        self.check()?;
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn set(&self, key: Key, value: JsonValue) -> Result<(), IdbError> {
        self.check()?;
        self.records.write().await.insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<(), IdbError> {
        self.check()?;
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), IdbError> {
        self.check()?;
        self.records.write().await.clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<Key>, IdbError> {
        self.check()?;
        Ok(self.records.read().await.keys().cloned().collect())
    }
}
