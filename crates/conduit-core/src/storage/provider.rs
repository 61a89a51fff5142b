use std::fmt::Debug;

use serde_json::Value;

use crate::kernel::error::Result;

/// Persistent key-value store the host lends to plugins.
///
/// Plugins never see this trait directly; they receive a
/// [`PluginStorage`](crate::plugin_system::context::PluginStorage) view that
/// prefixes every key with the plugin's namespace.
pub trait KeyValueStore: Send + Sync + Debug {
    /// Get the name of this store
    fn name(&self) -> &str;

    /// Read a value
    fn get(&self, key: &str) -> Option<Value>;

    /// Read a value, falling back to `default` when the key is absent
    fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove a key. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Enumerate every key currently stored
    fn keys(&self) -> Vec<String>;
}
