//! Turning a resolved entry file into a [`PluginModule`].
//!
//! Each resolver handles the file extensions it advertises; the loader
//! tries entry candidates against those extensions in resolver order.
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use log::debug;

use crate::kernel::constants;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::module::PluginModule;

/// What the loader asks a resolver to produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRequest {
    pub plugin_id: String,
    pub version: String,
    /// Absolute path of the entry file
    pub entry: PathBuf,
}

#[async_trait]
pub trait ModuleResolver: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Extensions (without the dot) this resolver can load
    fn extensions(&self) -> Vec<&'static str>;

    /// Produce a fresh module for `request`. Never served from a cache.
    async fn resolve(&self, request: &ModuleRequest) -> Result<Arc<dyn PluginModule>, PluginSystemError>;
}

type ModuleFactory = Arc<dyn Fn() -> Arc<dyn PluginModule> + Send + Sync>;

/// Resolves `.module` descriptor files to modules linked into the host.
///
/// The descriptor's first line that is neither blank nor a `#` comment names
/// the factory to call.
#[derive(Default)]
pub struct StaticModuleResolver {
    factories: RwLock<HashMap<String, ModuleFactory>>,
}

impl fmt::Debug for StaticModuleResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticModuleResolver")
            .field("modules", &self.module_names())
            .finish()
    }
}

impl StaticModuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any factory previously registered under `name`.
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn PluginModule> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), Arc::new(factory));
    }

    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn descriptor_name(descriptor: &str) -> Option<&str> {
        descriptor
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
    }
}

#[async_trait]
impl ModuleResolver for StaticModuleResolver {
    fn name(&self) -> &'static str {
        "static"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec![constants::STATIC_MODULE_EXTENSION]
    }

    async fn resolve(&self, request: &ModuleRequest) -> Result<Arc<dyn PluginModule>, PluginSystemError> {
        let descriptor = tokio::fs::read_to_string(&request.entry)
            .await
            .map_err(|e| PluginSystemError::module_load(&request.plugin_id, &request.entry, e))?;
        let Some(name) = Self::descriptor_name(&descriptor) else {
            return Err(PluginSystemError::module_load(
                &request.plugin_id,
                &request.entry,
                "module descriptor is empty".to_string(),
            ));
        };
        let factory = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned();
        match factory {
            Some(factory) => {
                debug!("Resolved static module '{}' for '{}'", name, request.plugin_id);
                Ok(factory())
            }
            None => Err(PluginSystemError::module_load(
                &request.plugin_id,
                &request.entry,
                format!("no static module named '{}' is registered", name),
            )),
        }
    }
}
