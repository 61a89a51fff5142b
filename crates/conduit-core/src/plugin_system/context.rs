//! Per-plugin runtime handles.
//!
//! A [`PluginContext`] bundles what a plugin may touch at runtime: a logger
//! bound to its own output channel, a storage view confined to the
//! `plugin.<id>.` key prefix, a capability-checked API and the
//! subscriptions it has accumulated. Contexts are built by the
//! [`ContextFactory`] and cached per `id@version`.
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, log, warn, Level};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::kernel::constants;
use crate::kernel::error::Result;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::module::BoxError;
use crate::plugin_system::security::{RestrictedScope, SecurityPolicy, NOTIFY_CAPABILITY};
use crate::storage::error::StorageSystemError;
use crate::storage::{KeyValueStore, MemoryStore};
use crate::ui_bridge::{
    util, LogNotificationSink, LogOutputProvider, NotificationSink, OutputChannel,
    OutputChannelProvider,
};

/// Collaborators the host lends to every plugin context
#[derive(Clone, Debug)]
pub struct HostServices {
    pub store: Arc<dyn KeyValueStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub output: Arc<dyn OutputChannelProvider>,
    pub policy: Arc<SecurityPolicy>,
}

impl HostServices {
    /// Volatile storage, log-backed notifications and output
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            notifier: Arc::new(LogNotificationSink),
            output: Arc::new(LogOutputProvider),
            policy: Arc::new(SecurityPolicy::default()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_output(mut self, output: Arc<dyn OutputChannelProvider>) -> Self {
        self.output = output;
        self
    }

    pub fn with_policy(mut self, policy: SecurityPolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }
}

/// Source label used for a plugin's notifications and output channel
pub fn channel_name(plugin_id: &str) -> String {
    format!("Plugin: {}", plugin_id)
}

type DisposeFn = Box<dyn FnOnce() -> std::result::Result<(), BoxError> + Send>;

/// Something a plugin registered that must be released on teardown
pub struct Subscription {
    label: String,
    dispose: Option<DisposeFn>,
}

impl Subscription {
    pub fn new<F>(label: impl Into<String>, dispose: F) -> Self
    where
        F: FnOnce() -> std::result::Result<(), BoxError> + Send + 'static,
    {
        Self {
            label: label.into(),
            dispose: Some(Box::new(dispose)),
        }
    }

    /// A subscription with nothing to release
    pub fn inert(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            dispose: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("disposable", &self.dispose.is_some())
            .finish()
    }
}

/// Logger bound to one plugin
#[derive(Clone)]
pub struct PluginLogger {
    plugin_id: String,
    target: String,
    channel: Arc<dyn OutputChannel>,
    notifier: Arc<dyn NotificationSink>,
}

impl fmt::Debug for PluginLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLogger")
            .field("target", &self.target)
            .field("channel", &self.channel.name())
            .finish()
    }
}

impl PluginLogger {
    fn new(plugin_id: &str, output: &dyn OutputChannelProvider, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            target: format!("plugin::{}", plugin_id),
            channel: output.create_channel(&channel_name(plugin_id)),
            notifier,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn write(&self, level: Level, message: &str) {
        log!(target: self.target.as_str(), level, "{}", message);
        self.channel.append_line(&format!("[{}] {}", level, message));
    }

    pub fn debug(&self, message: &str) {
        self.write(Level::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.write(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.write(Level::Warn, message);
    }

    /// Errors that mention "critical" or "fatal" also reach the user.
    pub fn error(&self, message: &str) {
        self.write(Level::Error, message);
        let lowered = message.to_lowercase();
        if lowered.contains("critical") || lowered.contains("fatal") {
            self.notifier
                .notify(util::error(&channel_name(&self.plugin_id), message));
        }
    }
}

/// Key-value view confined to `plugin.<id>.`
#[derive(Clone, Debug)]
pub struct PluginStorage {
    prefix: String,
    store: Arc<dyn KeyValueStore>,
}

impl PluginStorage {
    fn new(plugin_id: &str, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            prefix: format!("{}.{}.", constants::STORAGE_NAMESPACE, plugin_id),
            store,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.store.get(&self.scoped(key))
    }

    /// Typed read. Values that do not decode as `T` read as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!("Stored value '{}' has an unexpected shape: {}", self.scoped(key), e);
                None
            }
        }
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| StorageSystemError::serialization("json", e))?;
        self.store.set(&self.scoped(key), value)
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        self.store.delete(&self.scoped(key))
    }

    /// Keys owned by this plugin, without the prefix
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .store
            .keys()
            .into_iter()
            .filter_map(|key| key.strip_prefix(&self.prefix).map(str::to_string))
            .collect();
        keys.sort();
        keys
    }

    pub fn get_all(&self) -> BTreeMap<String, Value> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get_value(&key).map(|value| (key, value)))
            .collect()
    }

    /// Remove every key owned by this plugin and return how many went.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for key in self.keys() {
            if self.delete(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Capability-checked surface handed to plugin code
#[derive(Clone, Debug)]
pub struct PluginApi {
    plugin_id: String,
    notifier: Arc<dyn NotificationSink>,
    policy: Arc<SecurityPolicy>,
}

impl PluginApi {
    pub fn is_allowed(&self, capability: &str) -> bool {
        self.policy.is_capability_allowed(capability)
    }

    pub fn restricted_scope(&self) -> RestrictedScope {
        self.policy.build_restricted_scope()
    }

    fn require(&self, capability: &str) -> std::result::Result<(), PluginSystemError> {
        if self.is_allowed(capability) {
            Ok(())
        } else {
            Err(PluginSystemError::CapabilityDenied {
                plugin_id: self.plugin_id.clone(),
                capability: capability.to_string(),
            })
        }
    }

    pub fn show_info(&self, message: &str) -> std::result::Result<(), PluginSystemError> {
        self.require(NOTIFY_CAPABILITY)?;
        self.notifier.notify(util::info(&channel_name(&self.plugin_id), message));
        Ok(())
    }

    pub fn show_warning(&self, message: &str) -> std::result::Result<(), PluginSystemError> {
        self.require(NOTIFY_CAPABILITY)?;
        self.notifier
            .notify(util::warning(&channel_name(&self.plugin_id), message));
        Ok(())
    }

    pub fn show_error(&self, message: &str) -> std::result::Result<(), PluginSystemError> {
        self.require(NOTIFY_CAPABILITY)?;
        self.notifier.notify(util::error(&channel_name(&self.plugin_id), message));
        Ok(())
    }
}

/// Runtime handle for one plugin identity
#[derive(Debug)]
pub struct PluginContext {
    plugin_id: String,
    version: String,
    logger: PluginLogger,
    storage: PluginStorage,
    api: PluginApi,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl PluginContext {
    pub fn new(manifest: &PluginManifest, services: &HostServices) -> Self {
        let id = manifest.id.as_str();
        Self {
            plugin_id: id.to_string(),
            version: manifest.version.clone(),
            logger: PluginLogger::new(id, services.output.as_ref(), services.notifier.clone()),
            storage: PluginStorage::new(id, services.store.clone()),
            api: PluginApi {
                plugin_id: id.to_string(),
                notifier: services.notifier.clone(),
                policy: services.policy.clone(),
            },
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn identity(&self) -> String {
        format!("{}@{}", self.plugin_id, self.version)
    }

    pub fn logger(&self) -> &PluginLogger {
        &self.logger
    }

    pub fn storage(&self) -> &PluginStorage {
        &self.storage
    }

    pub fn api(&self) -> &PluginApi {
        &self.api
    }

    fn subscriptions(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self, subscription: Subscription) {
        self.subscriptions().push(subscription);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions().len()
    }

    /// Release every subscription. Failures and panics are logged and do not
    /// stop the remaining disposals. Returns how many disposed cleanly.
    pub fn dispose_subscriptions(&self) -> usize {
        let drained: Vec<Subscription> = std::mem::take(&mut *self.subscriptions());
        let mut disposed = 0;
        for subscription in drained {
            let Subscription { label, dispose } = subscription;
            let Some(dispose) = dispose else {
                debug!("Subscription '{}' of '{}' has nothing to dispose", label, self.plugin_id);
                disposed += 1;
                continue;
            };
            match panic::catch_unwind(AssertUnwindSafe(dispose)) {
                Ok(Ok(())) => disposed += 1,
                Ok(Err(e)) => warn!(
                    "Failed to dispose subscription '{}' of '{}': {}",
                    label, self.plugin_id, e
                ),
                Err(_) => warn!(
                    "Subscription '{}' of '{}' panicked while disposing",
                    label, self.plugin_id
                ),
            }
        }
        disposed
    }
}

/// Builds and caches one [`PluginContext`] per `id@version`.
#[derive(Debug)]
pub struct ContextFactory {
    services: HostServices,
    contexts: Mutex<HashMap<String, Arc<PluginContext>>>,
}

impl ContextFactory {
    pub fn new(services: HostServices) -> Self {
        Self {
            services,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    pub fn services(&self) -> &HostServices {
        &self.services
    }

    fn contexts(&self) -> MutexGuard<'_, HashMap<String, Arc<PluginContext>>> {
        self.contexts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the cached context for this identity, creating it on first use.
    pub fn create_context(&self, manifest: &PluginManifest) -> Arc<PluginContext> {
        let mut contexts = self.contexts();
        contexts
            .entry(manifest.identity())
            .or_insert_with(|| {
                debug!("Creating context for {}", manifest.identity());
                Arc::new(PluginContext::new(manifest, &self.services))
            })
            .clone()
    }

    pub fn get_context(&self, manifest: &PluginManifest) -> Option<Arc<PluginContext>> {
        self.contexts().get(&manifest.identity()).cloned()
    }

    /// Disposes the context's subscriptions and forgets it. Returns false
    /// when there was no context for this identity.
    pub fn destroy_context(&self, manifest: &PluginManifest) -> bool {
        let removed = self.contexts().remove(&manifest.identity());
        match removed {
            Some(context) => {
                context.dispose_subscriptions();
                true
            }
            None => false,
        }
    }

    pub fn get_active_contexts(&self) -> Vec<Arc<PluginContext>> {
        let mut contexts: Vec<Arc<PluginContext>> = self.contexts().values().cloned().collect();
        contexts.sort_by_key(|context| context.identity());
        contexts
    }

    pub fn clear_all(&self) {
        let drained: Vec<Arc<PluginContext>> =
            self.contexts().drain().map(|(_, context)| context).collect();
        for context in drained {
            context.dispose_subscriptions();
        }
    }
}
