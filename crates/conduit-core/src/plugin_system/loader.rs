//! Manifest reading, entry-point resolution and module loading.
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use serde_json::Value;
use tokio::fs;
use tokio_stream::wrappers::ReadDirStream;
use tokio_stream::StreamExt;

use crate::kernel::constants;
use crate::plugin_system::error::{PluginSystemError, PluginSystemErrorSource, ValidationError};
use crate::plugin_system::extension_point::ExtensionPoint;
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::module::{ModuleExports, PluginModule};
use crate::plugin_system::resolver::{ModuleRequest, ModuleResolver};
use crate::plugin_system::security::{Finding, SecurityPolicy};
use crate::storage::config::HostConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderOptions {
    pub manifest_file_name: String,
    pub scan_sources: bool,
    pub block_on_findings: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            manifest_file_name: constants::MANIFEST_FILE_NAME.to_string(),
            scan_sources: true,
            block_on_findings: false,
        }
    }
}

impl From<&HostConfig> for LoaderOptions {
    fn from(config: &HostConfig) -> Self {
        Self {
            manifest_file_name: config.manifest_file_name.clone(),
            scan_sources: config.security.scan_sources,
            block_on_findings: config.security.block_on_findings,
        }
    }
}

/// A module together with what was learned while loading it
#[derive(Clone)]
pub struct LoadedModule {
    pub module: Arc<dyn PluginModule>,
    pub exports: ModuleExports,
    pub entry: PathBuf,
    /// Name of the resolver that produced the module
    pub resolver: &'static str,
    pub findings: Vec<Finding>,
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("entry", &self.entry)
            .field("resolver", &self.resolver)
            .field("exports", &self.exports)
            .field("findings", &self.findings.len())
            .finish()
    }
}

/// Check that `exports` provides everything `manifest` promises.
///
/// Every mismatch is collected before failing.
pub fn validate_exports(manifest: &PluginManifest, exports: &ModuleExports) -> Result<(), ValidationError> {
    let mut errors = ValidationError::new();
    for point in ExtensionPoint::ALL {
        if point.requires_module_export()
            && manifest.contributes.declares(point)
            && !exports.exports_collection(point)
        {
            errors.push(format!(
                "Plugin declares {} contributions but does not export \"{}\"",
                point.label().to_lowercase(),
                point.contributes_key()
            ));
        }
    }
    if !manifest.activation_events.is_empty() && !exports.activate {
        errors.push("Plugin declares activation events but does not export an \"activate\" function");
    }
    errors.into_result()
}

/// Loads manifests (cached by path) and modules (cached by `id@version`).
pub struct ModuleLoader {
    resolvers: Vec<Arc<dyn ModuleResolver>>,
    policy: Arc<SecurityPolicy>,
    options: LoaderOptions,
    manifests: Mutex<HashMap<PathBuf, Arc<PluginManifest>>>,
    modules: Mutex<HashMap<String, LoadedModule>>,
}

impl fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resolvers: Vec<&str> = self.resolvers.iter().map(|r| r.name()).collect();
        f.debug_struct("ModuleLoader")
            .field("resolvers", &resolvers)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ModuleLoader {
    pub fn new(policy: Arc<SecurityPolicy>, options: LoaderOptions) -> Self {
        Self {
            resolvers: Vec::new(),
            policy,
            options,
            manifests: Mutex::new(HashMap::new()),
            modules: Mutex::new(HashMap::new()),
        }
    }

    /// Resolvers are consulted in the order they were added.
    pub fn with_resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    fn manifest_cache(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<PluginManifest>>> {
        self.manifests.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn module_cache(&self) -> MutexGuard<'_, HashMap<String, LoadedModule>> {
        self.modules.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Maps a plugin directory to its manifest file; files pass through.
    pub async fn manifest_path_for(&self, path: &Path) -> PathBuf {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => path.join(&self.options.manifest_file_name),
            _ => path.to_path_buf(),
        }
    }

    pub async fn load_manifest(&self, path: &Path) -> Result<Arc<PluginManifest>, PluginSystemError> {
        let cached = self.manifest_cache().get(path).cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PluginSystemError::ManifestError {
                path: path.to_path_buf(),
                source: Box::new(PluginSystemErrorSource::Io(e)),
            })?;
        let raw: Value = serde_json::from_str(&content).map_err(|e| PluginSystemError::ManifestError {
            path: path.to_path_buf(),
            source: Box::new(PluginSystemErrorSource::Json(e)),
        })?;
        let manifest = Arc::new(PluginManifest::from_value(raw, path)?);
        debug!("Loaded manifest {} from {}", manifest.identity(), path.display());

        self.manifest_cache().insert(path.to_path_buf(), manifest.clone());
        Ok(manifest)
    }

    fn resolver_for(&self, entry: &Path) -> Option<Arc<dyn ModuleResolver>> {
        let extension = entry.extension()?.to_str()?;
        self.resolvers
            .iter()
            .find(|resolver| resolver.extensions().contains(&extension))
            .cloned()
    }

    /// Explicit `main`, else the first existing `index`/`main`/`plugin`
    /// file with an extension some resolver handles.
    pub async fn resolve_entry(&self, manifest: &PluginManifest, plugin_dir: &Path) -> Result<PathBuf, PluginSystemError> {
        if let Some(main) = &manifest.main {
            let entry = plugin_dir.join(main);
            return match fs::metadata(&entry).await {
                Ok(meta) if meta.is_file() => Ok(entry),
                Ok(_) => Err(PluginSystemError::module_load(
                    &manifest.id,
                    entry,
                    "entry point is not a file".to_string(),
                )),
                Err(e) => Err(PluginSystemError::module_load(&manifest.id, entry, e)),
            };
        }

        let mut candidates = Vec::new();
        for stem in constants::DEFAULT_ENTRY_STEMS {
            for resolver in &self.resolvers {
                for extension in resolver.extensions() {
                    candidates.push(format!("{}.{}", stem, extension));
                }
            }
        }
        for candidate in &candidates {
            let entry = plugin_dir.join(candidate);
            if matches!(fs::metadata(&entry).await, Ok(meta) if meta.is_file()) {
                return Ok(entry);
            }
        }
        Err(PluginSystemError::NoEntryPoint {
            plugin_id: manifest.id.clone(),
            dir: plugin_dir.to_path_buf(),
            candidates,
        })
    }

    async fn scan_entry(&self, manifest: &PluginManifest, entry: &Path) -> Result<Vec<Finding>, PluginSystemError> {
        if !self.options.scan_sources {
            return Ok(Vec::new());
        }
        let bytes = fs::read(entry)
            .await
            .map_err(|e| PluginSystemError::module_load(&manifest.id, entry, e))?;
        // Binary entries are not scanned.
        let Ok(source) = String::from_utf8(bytes) else {
            return Ok(Vec::new());
        };
        let findings = self.policy.scan_for_violations(&source);
        for finding in &findings {
            warn!("Security finding in {} ({}): {}", manifest.id, entry.display(), finding);
        }
        if self.options.block_on_findings && !findings.is_empty() {
            let mut errors = ValidationError::new();
            for finding in &findings {
                errors.push(format!("Security finding at {}", finding));
            }
            return Err(PluginSystemError::ModuleValidation {
                plugin_id: manifest.id.clone(),
                source: errors,
            });
        }
        Ok(findings)
    }

    /// Resolve, load and cross-check the module of `manifest`.
    pub async fn load_module(&self, manifest: &PluginManifest, plugin_dir: &Path) -> Result<LoadedModule, PluginSystemError> {
        let identity = manifest.identity();
        let cached = self.module_cache().get(&identity).cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let entry = self.resolve_entry(manifest, plugin_dir).await?;
        let Some(resolver) = self.resolver_for(&entry) else {
            return Err(PluginSystemError::module_load(
                &manifest.id,
                entry,
                "no module resolver handles this file type".to_string(),
            ));
        };
        let findings = self.scan_entry(manifest, &entry).await?;

        let request = ModuleRequest {
            plugin_id: manifest.id.clone(),
            version: manifest.version.clone(),
            entry: entry.clone(),
        };
        let module = resolver.resolve(&request).await?;
        let exports = module.exports();
        validate_exports(manifest, &exports).map_err(|source| PluginSystemError::ModuleValidation {
            plugin_id: manifest.id.clone(),
            source,
        })?;

        info!("Loaded module for {} via {} resolver", identity, resolver.name());
        let loaded = LoadedModule {
            module,
            exports,
            entry,
            resolver: resolver.name(),
            findings,
        };
        self.module_cache().insert(identity, loaded.clone());
        Ok(loaded)
    }

    pub fn cached_module(&self, identity: &str) -> Option<LoadedModule> {
        self.module_cache().get(identity).cloned()
    }

    /// Forget the module cached for `identity` so the next load re-resolves it.
    pub fn evict(&self, identity: &str) -> bool {
        self.module_cache().remove(identity).is_some()
    }

    pub fn invalidate_manifest(&self, path: &Path) -> bool {
        self.manifest_cache().remove(path).is_some()
    }

    pub fn clear_caches(&self) {
        self.manifest_cache().clear();
        self.module_cache().clear();
    }

    /// Manifest files of the immediate subdirectories of `root`.
    ///
    /// A missing or unreadable root yields nothing.
    pub async fn scan_for_manifests(&self, root: &Path) -> Vec<PathBuf> {
        let read_dir = match fs::read_dir(root).await {
            Ok(read_dir) => read_dir,
            Err(e) => {
                warn!("Skipping plugin root {}: {}", root.display(), e);
                return Vec::new();
            }
        };

        let mut found = Vec::new();
        let mut entries = ReadDirStream::new(read_dir);
        while let Some(entry) = entries.next().await {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Error reading entry in {}: {}", root.display(), e);
                    continue;
                }
            };
            let dir = entry.path();
            if !matches!(fs::metadata(&dir).await, Ok(meta) if meta.is_dir()) {
                continue;
            }
            let manifest_path = dir.join(&self.options.manifest_file_name);
            if matches!(fs::metadata(&manifest_path).await, Ok(meta) if meta.is_file()) {
                found.push(manifest_path);
            } else {
                debug!("No {} in {}, skipping", self.options.manifest_file_name, dir.display());
            }
        }
        found.sort();
        found
    }
}
