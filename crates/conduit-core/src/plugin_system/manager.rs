use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug, Display};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;

use crate::kernel::component::KernelComponent;
use crate::kernel::constants;
use crate::kernel::error::Result;
use crate::plugin_system::context::{channel_name, ContextFactory, PluginContext};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::events::{ListenerId, PluginEvent, PluginEventData};
use crate::plugin_system::loader::ModuleLoader;
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::module::{panic_message, ModuleExports, PluginModule};
use crate::plugin_system::registry::{ContributionRegistry, RegistryStatistics};
use crate::plugin_system::version::HostVersions;
use crate::ui_bridge::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Unloaded,
    Loaded,
    Activated,
}

/// A loaded plugin: manifest, module, exports and context
pub struct PluginInstance {
    pub manifest: Arc<PluginManifest>,
    pub module: Arc<dyn PluginModule>,
    pub exports: ModuleExports,
    pub context: Arc<PluginContext>,
    /// Manifest file the plugin was loaded from
    pub manifest_path: PathBuf,
    pub entry: PathBuf,
}

impl Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("identity", &self.manifest.identity())
            .field("manifest_path", &self.manifest_path)
            .field("entry", &self.entry)
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}

/// Outcome of [`PluginManager::activate_plugin`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exports: Option<ModuleExports>,
}

impl ActivationResult {
    fn succeeded(exports: ModuleExports) -> Self {
        Self {
            success: true,
            error: None,
            exports: Some(exports),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            exports: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStatistics {
    pub total_plugins: usize,
    pub activated_plugins: usize,
    pub registry: RegistryStatistics,
}

/// Plugin lifecycle: unloaded → loaded → activated → loaded → unloaded.
///
/// Load, validation and activation failures come back as `false` or a
/// failed [`ActivationResult`] and are published as [`PluginEvent::Error`];
/// they never propagate as errors.
#[async_trait]
pub trait PluginManager: KernelComponent {
    /// Load from a manifest file or a plugin directory
    async fn load_plugin(&self, path: &Path) -> bool;

    async fn activate_plugin(&self, id: &str) -> ActivationResult;

    async fn deactivate_plugin(&self, id: &str) -> bool;

    async fn unload_plugin(&self, id: &str) -> bool;

    /// Unload and load again from the path the plugin was loaded from
    async fn reload_plugin(&self, id: &str) -> bool;

    /// Returns how many plugins deactivated cleanly
    async fn deactivate_all_plugins(&self) -> usize;

    /// Load every plugin found under `roots`; returns how many loaded
    async fn discover_plugins(&self, roots: &[PathBuf]) -> usize;

    /// Activate loaded plugins listening for `event`; returns their ids
    async fn activate_by_event(&self, event: &str) -> Vec<String>;

    fn get_plugin(&self, id: &str) -> Option<Arc<PluginInstance>>;

    fn loaded_plugins(&self) -> Vec<String>;

    fn activated_plugins(&self) -> Vec<String>;

    fn is_plugin_loaded(&self, id: &str) -> bool;

    fn is_plugin_activated(&self, id: &str) -> bool;

    fn plugin_state(&self, id: &str) -> PluginState;

    fn statistics(&self) -> ManagerStatistics;
}

#[derive(Debug, Default)]
struct ManagerState {
    plugins: HashMap<String, Arc<PluginInstance>>,
    activated: HashSet<String>,
    paths: HashMap<String, PathBuf>,
}

/// Default implementation of plugin manager
pub struct DefaultPluginManager {
    name: &'static str,
    registry: Arc<ContributionRegistry>,
    contexts: Arc<ContextFactory>,
    loader: Arc<ModuleLoader>,
    host_versions: HostVersions,
    roots: Vec<PathBuf>,
    auto_activate: bool,
    state: RwLock<ManagerState>,
    // Serializes lifecycle operations per plugin id
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    error_listener: ListenerId,
}

impl Debug for DefaultPluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultPluginManager")
            .field("name", &self.name)
            .field("roots", &self.roots)
            .field("loaded", &self.loaded_plugins())
            .field("activated", &self.activated_plugins())
            .finish_non_exhaustive()
    }
}

impl DefaultPluginManager {
    /// Also installs the listener that turns error events into notifications.
    pub fn new(
        registry: Arc<ContributionRegistry>,
        contexts: Arc<ContextFactory>,
        loader: Arc<ModuleLoader>,
        host_versions: HostVersions,
    ) -> Self {
        let notifier = contexts.services().notifier.clone();
        let error_listener = registry.add_event_listener(PluginEvent::Error, move |data| {
            let message = data.error.as_deref().unwrap_or("Unknown error");
            notifier.notify(util::error(&channel_name(&data.plugin_id), message));
            Ok(())
        });

        Self {
            name: "DefaultPluginManager",
            registry,
            contexts,
            loader,
            host_versions,
            roots: Vec::new(),
            auto_activate: false,
            state: RwLock::new(ManagerState::default()),
            locks: Mutex::new(HashMap::new()),
            error_listener,
        }
    }

    /// Roots searched by [`KernelComponent::initialize`]
    pub fn with_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.roots = roots;
        self
    }

    /// Fire the startup event from [`KernelComponent::start`]
    pub fn with_auto_activate(mut self, auto_activate: bool) -> Self {
        self.auto_activate = auto_activate;
        self
    }

    pub fn registry(&self) -> &Arc<ContributionRegistry> {
        &self.registry
    }

    pub fn contexts(&self) -> &Arc<ContextFactory> {
        &self.contexts
    }

    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.loader
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ManagerState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ManagerState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_for(&self, id: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    /// Forget the lock of a plugin that is no longer loaded, unless another
    /// caller is waiting on it.
    fn release_lock(&self, id: &str, held: &Arc<AsyncMutex<()>>) {
        if self.is_plugin_loaded(id) {
            return;
        }
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map, one in `held`
        if locks.get(id).is_some_and(|entry| Arc::ptr_eq(entry, held) && Arc::strong_count(entry) == 2) {
            locks.remove(id);
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    fn emit(&self, event: PluginEvent, data: PluginEventData) {
        self.registry.emit_event(event, data);
    }

    fn report_error(&self, plugin_id: &str, err: &dyn Display) {
        error!("Plugin '{}': {}", plugin_id, err);
        self.emit(
            PluginEvent::Error,
            PluginEventData::new(PluginEvent::Error, plugin_id).with_error(err),
        );
    }

    async fn load_locked(&self, manifest: Arc<PluginManifest>, manifest_path: &Path) -> std::result::Result<bool, PluginSystemError> {
        let id = manifest.id.clone();
        if self.is_plugin_loaded(&id) {
            warn!("Plugin '{}' is already loaded, ignoring {}", id, manifest_path.display());
            return Ok(false);
        }

        self.host_versions.check(&manifest)?;

        let plugin_dir = manifest_path.parent().map(Path::to_path_buf).unwrap_or_default();
        let loaded = self.loader.load_module(&manifest, &plugin_dir).await?;
        let context = self.contexts.create_context(&manifest);

        let instance = Arc::new(PluginInstance {
            manifest: manifest.clone(),
            module: loaded.module,
            exports: loaded.exports,
            context,
            manifest_path: manifest_path.to_path_buf(),
            entry: loaded.entry,
        });
        {
            let mut state = self.write_state();
            if state.plugins.contains_key(&id) {
                return Ok(false);
            }
            state.plugins.insert(id.clone(), instance);
            state.paths.insert(id.clone(), manifest_path.to_path_buf());
        }

        info!("Loaded plugin {}", manifest.identity());
        self.emit(
            PluginEvent::Loaded,
            PluginEventData::new(PluginEvent::Loaded, &id).with_data(json!({
                "version": manifest.version,
                "path": manifest_path.display().to_string(),
            })),
        );
        Ok(true)
    }

    fn activation_failed(&self, id: &str, message: String) -> ActivationResult {
        let err = PluginSystemError::ActivationError {
            plugin_id: id.to_string(),
            message: message.clone(),
        };
        self.report_error(id, &err);
        ActivationResult::failed(message)
    }

    async fn activate_locked(&self, id: &str) -> ActivationResult {
        let Some(instance) = self.get_plugin(id) else {
            return ActivationResult::failed(PluginSystemError::NotLoaded(id.to_string()).to_string());
        };
        if self.is_plugin_activated(id) {
            debug!("Plugin '{}' is already activated", id);
            return ActivationResult::succeeded(instance.exports.clone());
        }

        if instance.exports.activate {
            let activation = instance.module.activate(instance.context.clone());
            match AssertUnwindSafe(activation).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return self.activation_failed(id, e.to_string()),
                Err(payload) => {
                    return self.activation_failed(id, format!("panic: {}", panic_message(payload.as_ref())));
                }
            }
        }

        // Roll back only what this activation added.
        let mut registered: Vec<String> = Vec::new();
        for contribution in instance.manifest.contributes.all() {
            let point = contribution.extension_point();
            let contribution_id = contribution.id().to_string();
            let preexisting = self.registry.get_contribution_owner(&contribution_id).as_deref() == Some(id);
            if let Err(e) = self.registry.register(point, contribution, id) {
                for registered_id in registered.iter().rev() {
                    if let Err(rollback) = self.registry.unregister(registered_id, id) {
                        warn!("Rollback of '{}' for '{}' failed: {}", registered_id, id, rollback);
                    }
                }
                instance.context.dispose_subscriptions();
                return self.activation_failed(id, e.to_string());
            }
            if !preexisting {
                registered.push(contribution_id);
            }
        }

        self.write_state().activated.insert(id.to_string());
        info!("Activated plugin '{}' ({} contribution(s))", id, registered.len());
        self.emit(
            PluginEvent::Activated,
            PluginEventData::new(PluginEvent::Activated, id)
                .with_data(json!({ "contributions": registered })),
        );
        ActivationResult::succeeded(instance.exports.clone())
    }

    /// Contributions are removed before the plugin's own deactivate runs and
    /// stay removed even if it fails.
    ///
    /// A failing deactivate entry does not keep the plugin activated: its
    /// subscriptions are still disposed, it is marked deactivated and
    /// `DEACTIVATED` is emitted. Only the return value (`false`) and the
    /// `ERROR` event report the failure.
    async fn deactivate_locked(&self, id: &str) -> bool {
        let Some(instance) = self.get_plugin(id) else {
            debug!("Cannot deactivate '{}': not loaded", id);
            return false;
        };
        if !self.is_plugin_activated(id) {
            debug!("Cannot deactivate '{}': not activated", id);
            return false;
        }

        let removed = self.registry.unregister_plugin(id);

        let mut clean = true;
        if instance.exports.deactivate {
            match AssertUnwindSafe(instance.module.deactivate()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    clean = false;
                    let err = PluginSystemError::DeactivationError {
                        plugin_id: id.to_string(),
                        message: e.to_string(),
                    };
                    self.report_error(id, &err);
                }
                Err(payload) => {
                    clean = false;
                    let err = PluginSystemError::DeactivationError {
                        plugin_id: id.to_string(),
                        message: format!("panic: {}", panic_message(payload.as_ref())),
                    };
                    self.report_error(id, &err);
                }
            }
        }

        instance.context.dispose_subscriptions();
        self.write_state().activated.remove(id);
        info!("Deactivated plugin '{}' ({} contribution(s) removed)", id, removed);
        self.emit(
            PluginEvent::Deactivated,
            PluginEventData::new(PluginEvent::Deactivated, id)
                .with_data(json!({ "removedContributions": removed, "clean": clean })),
        );
        clean
    }

    async fn unload_locked(&self, id: &str) -> bool {
        if !self.is_plugin_loaded(id) {
            debug!("Cannot unload '{}': not loaded", id);
            return false;
        }
        if self.is_plugin_activated(id) && !self.deactivate_locked(id).await {
            warn!("Plugin '{}' did not deactivate cleanly; unloading anyway", id);
        }

        let (instance, path) = {
            let mut state = self.write_state();
            state.activated.remove(id);
            (state.plugins.remove(id), state.paths.remove(id))
        };
        if let Some(instance) = instance {
            self.contexts.destroy_context(&instance.manifest);
            self.loader.evict(&instance.manifest.identity());
        }
        if let Some(path) = path {
            self.loader.invalidate_manifest(&path);
        }

        info!("Unloaded plugin '{}'", id);
        self.emit(PluginEvent::Unloaded, PluginEventData::new(PluginEvent::Unloaded, id));
        true
    }
}

impl Drop for DefaultPluginManager {
    fn drop(&mut self) {
        self.registry
            .remove_event_listener(PluginEvent::Error, self.error_listener);
    }
}

#[async_trait]
impl KernelComponent for DefaultPluginManager {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn initialize(&self) -> Result<()> {
        info!("Initializing plugin manager from {} root(s)", self.roots.len());
        let loaded = self.discover_plugins(&self.roots).await;
        info!("Loaded {} plugin(s)", loaded);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        if self.auto_activate {
            let activated = self.activate_by_event(constants::STARTUP_FINISHED_EVENT).await;
            info!("Activated {} plugin(s) on startup", activated.len());
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let count = self.deactivate_all_plugins().await;
        info!("Stopped plugin manager ({} plugin(s) deactivated)", count);
        Ok(())
    }
}

#[async_trait]
impl PluginManager for DefaultPluginManager {
    async fn load_plugin(&self, path: &Path) -> bool {
        if path.as_os_str().is_empty() {
            warn!("Refusing to load a plugin from an empty path");
            return false;
        }

        let manifest_path = self.loader.manifest_path_for(path).await;
        let manifest = match self.loader.load_manifest(&manifest_path).await {
            Ok(manifest) => manifest,
            Err(e) => {
                self.report_error(constants::UNKNOWN_PLUGIN_ID, &e);
                return false;
            }
        };

        let lock = self.lock_for(&manifest.id);
        let _guard = lock.lock().await;
        let loaded = match self.load_locked(manifest.clone(), &manifest_path).await {
            Ok(loaded) => loaded,
            Err(e) => {
                self.report_error(&manifest.id, &e);
                false
            }
        };
        self.release_lock(&manifest.id, &lock);
        loaded
    }

    async fn activate_plugin(&self, id: &str) -> ActivationResult {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let result = self.activate_locked(id).await;
        self.release_lock(id, &lock);
        result
    }

    async fn deactivate_plugin(&self, id: &str) -> bool {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let deactivated = self.deactivate_locked(id).await;
        self.release_lock(id, &lock);
        deactivated
    }

    async fn unload_plugin(&self, id: &str) -> bool {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let unloaded = self.unload_locked(id).await;
        self.release_lock(id, &lock);
        unloaded
    }

    async fn reload_plugin(&self, id: &str) -> bool {
        let path = {
            let lock = self.lock_for(id);
            let _guard = lock.lock().await;
            let tracked = self.read_state().paths.get(id).cloned();
            let Some(path) = tracked else {
                self.report_error(id, &PluginSystemError::NotLoaded(id.to_string()));
                self.release_lock(id, &lock);
                return false;
            };
            self.unload_locked(id).await;
            self.release_lock(id, &lock);
            path
        };
        info!("Reloading plugin '{}' from {}", id, path.display());
        self.load_plugin(&path).await
    }

    async fn deactivate_all_plugins(&self) -> usize {
        let mut clean = 0;
        for id in self.activated_plugins() {
            if self.deactivate_plugin(&id).await {
                clean += 1;
            }
        }
        clean
    }

    async fn discover_plugins(&self, roots: &[PathBuf]) -> usize {
        let scans = join_all(roots.iter().map(|root| self.loader.scan_for_manifests(root))).await;
        let manifests: Vec<PathBuf> = scans.into_iter().flatten().collect();
        info!("Discovered {} plugin manifest(s) in {} root(s)", manifests.len(), roots.len());

        let results = join_all(manifests.iter().map(|path| self.load_plugin(path))).await;
        results.into_iter().filter(|loaded| *loaded).count()
    }

    async fn activate_by_event(&self, event: &str) -> Vec<String> {
        let mut candidates: Vec<String> = {
            let state = self.read_state();
            state
                .plugins
                .iter()
                .filter(|(id, instance)| {
                    !state.activated.contains(*id) && instance.manifest.activates_on(event)
                })
                .map(|(id, _)| id.clone())
                .collect()
        };
        candidates.sort();

        let mut activated = Vec::new();
        for id in candidates {
            if self.activate_plugin(&id).await.success {
                activated.push(id);
            }
        }
        debug!("Event '{}' activated {:?}", event, activated);
        activated
    }

    fn get_plugin(&self, id: &str) -> Option<Arc<PluginInstance>> {
        self.read_state().plugins.get(id).cloned()
    }

    fn loaded_plugins(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read_state().plugins.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn activated_plugins(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read_state().activated.iter().cloned().collect();
        ids.sort();
        ids
    }

    fn is_plugin_loaded(&self, id: &str) -> bool {
        self.read_state().plugins.contains_key(id)
    }

    fn is_plugin_activated(&self, id: &str) -> bool {
        self.read_state().activated.contains(id)
    }

    fn plugin_state(&self, id: &str) -> PluginState {
        let state = self.read_state();
        if state.activated.contains(id) {
            PluginState::Activated
        } else if state.plugins.contains_key(id) {
            PluginState::Loaded
        } else {
            PluginState::Unloaded
        }
    }

    fn statistics(&self) -> ManagerStatistics {
        let (total_plugins, activated_plugins) = {
            let state = self.read_state();
            (state.plugins.len(), state.activated.len())
        };
        ManagerStatistics {
            total_plugins,
            activated_plugins,
            registry: self.registry.statistics(),
        }
    }
}
