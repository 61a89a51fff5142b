//! The contract between the host and a loaded plugin module.
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::plugin_system::context::PluginContext;
use crate::plugin_system::extension_point::ExtensionPoint;

/// Error type plugin-authored code reports through.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type ModuleResult = Result<(), BoxError>;

/// What a module makes available to the host.
///
/// `collections` maps a `contributes` key (`drivers`, `widgets`, ...) to the
/// names of the implementations the module exports under it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleExports {
    pub collections: BTreeMap<String, Vec<String>>,
    pub activate: bool,
    pub deactivate: bool,
}

impl ModuleExports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection<I, S>(mut self, point: ExtensionPoint, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections.insert(
            point.contributes_key().to_string(),
            names.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn with_activate(mut self) -> Self {
        self.activate = true;
        self
    }

    pub fn with_deactivate(mut self) -> Self {
        self.deactivate = true;
        self
    }

    pub fn exports_collection(&self, point: ExtensionPoint) -> bool {
        self.collections.contains_key(point.contributes_key())
    }
}

/// A plugin's executable module, as produced by a
/// [`ModuleResolver`](crate::plugin_system::resolver::ModuleResolver).
///
/// `activate` and `deactivate` are only called when the matching flag in
/// [`exports`](PluginModule::exports) is set.
#[async_trait]
pub trait PluginModule: Send + Sync + Debug {
    fn exports(&self) -> ModuleExports;

    async fn activate(&self, _context: Arc<PluginContext>) -> ModuleResult {
        Ok(())
    }

    async fn deactivate(&self) -> ModuleResult {
        Ok(())
    }
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic reason".to_string()
    }
}
