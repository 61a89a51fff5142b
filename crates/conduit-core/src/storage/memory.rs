use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use crate::kernel::error::Result;
use crate::storage::config::ConfigData;
use crate::storage::provider::KeyValueStore;

/// Volatile key-value store, used when no storage file is configured
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<ConfigData>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `data`
    pub fn with_data(data: ConfigData) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ConfigData> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ConfigData> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.read().get_value(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.write().insert_value(key, value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.write().remove(key).is_some())
    }

    fn keys(&self) -> Vec<String> {
        self.read().keys()
    }
}
