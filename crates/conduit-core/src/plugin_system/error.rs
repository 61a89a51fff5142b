//! # Conduit Plugin System Errors
//!
//! Defines error types specific to the Conduit Plugin System.
//!
//! - [`ValidationError`] aggregates every problem found in a manifest or in a
//!   module's exports, so one report lists them all.
//! - [`PluginSystemError`] covers registry invariant violations (duplicate
//!   contributions, ownership), module loading, lifecycle entry points,
//!   capability checks and native FFI failures.
//! - [`PluginSystemErrorSource`] carries the underlying cause of load failures.
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Aggregated validation failure; never empty when returned as an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    pub messages: Vec<String>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn extend(&mut self, other: ValidationError) {
        self.messages.extend(other.messages);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether any message mentions `needle`
    pub fn mentions(&self, needle: &str) -> bool {
        self.messages.iter().any(|m| m.contains(needle))
    }

    /// `Ok(())` when nothing was collected, `Err(self)` otherwise.
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation error(s): {}", self.messages.len(), self.messages.join("; "))
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Error)]
pub enum PluginSystemErrorSource {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Dynamic library error: {0}")]
    Library(#[from] libloading::Error),

    #[error("{0}")]
    Other(String),
}

impl From<String> for PluginSystemErrorSource {
    fn from(message: String) -> Self {
        PluginSystemErrorSource::Other(message)
    }
}

#[derive(Debug, Error)]
pub enum PluginSystemError {
    #[error("Invalid manifest at '{}': {source}", path.display())]
    ManifestValidation {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },

    #[error("Module exports of plugin '{plugin_id}' do not match its manifest: {source}")]
    ModuleValidation {
        plugin_id: String,
        #[source]
        source: ValidationError,
    },

    #[error("Failed to read manifest '{}': {source}", path.display())]
    ManifestError {
        path: PathBuf,
        #[source]
        source: Box<PluginSystemErrorSource>,
    },

    #[error("Contribution '{contribution_id}' is already registered by plugin '{existing_owner}'")]
    DuplicateContribution {
        contribution_id: String,
        existing_owner: String,
        requested_by: String,
    },

    #[error("Cannot unregister contribution '{contribution_id}': owned by different plugin")]
    OwnershipViolation {
        contribution_id: String,
        owner: String,
        requested_by: String,
    },

    #[error("Unknown extension point: {0}")]
    UnknownExtensionPoint(String),

    #[error("Invalid contribution from plugin '{plugin_id}': {message}")]
    InvalidContribution { plugin_id: String, message: String },

    #[error("Failed to load module for plugin '{plugin_id}' from '{}': {source}", path.display())]
    ModuleLoadError {
        plugin_id: String,
        path: PathBuf,
        #[source]
        source: Box<PluginSystemErrorSource>,
    },

    #[error(
        "No main entry point found for plugin '{plugin_id}' in '{}'. Specify \"main\" in the manifest or provide one of: {}",
        dir.display(),
        candidates.join(", ")
    )]
    NoEntryPoint {
        plugin_id: String,
        dir: PathBuf,
        candidates: Vec<String>,
    },

    #[error("Plugin '{plugin_id}' is incompatible with this host: {message}")]
    Incompatible { plugin_id: String, message: String },

    #[error("Plugin '{0}' is not loaded")]
    NotLoaded(String),

    #[error("Plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("Activation failed: {message}")]
    ActivationError { plugin_id: String, message: String },

    #[error("Deactivation failed: {message}")]
    DeactivationError { plugin_id: String, message: String },

    #[error("Capability '{capability}' is not available to plugin '{plugin_id}'")]
    CapabilityDenied { plugin_id: String, capability: String },

    #[error("FFI error in plugin '{plugin_id}' during '{operation}': {message}")]
    FfiError {
        plugin_id: String,
        operation: String,
        message: String,
    },

    #[error("Invalid plugin path: '{0}'")]
    InvalidPath(String),
}

impl PluginSystemError {
    /// Plugin the error is about, when known.
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            PluginSystemError::ModuleValidation { plugin_id, .. }
            | PluginSystemError::InvalidContribution { plugin_id, .. }
            | PluginSystemError::ModuleLoadError { plugin_id, .. }
            | PluginSystemError::NoEntryPoint { plugin_id, .. }
            | PluginSystemError::Incompatible { plugin_id, .. }
            | PluginSystemError::ActivationError { plugin_id, .. }
            | PluginSystemError::DeactivationError { plugin_id, .. }
            | PluginSystemError::CapabilityDenied { plugin_id, .. }
            | PluginSystemError::FfiError { plugin_id, .. } => Some(plugin_id),
            PluginSystemError::DuplicateContribution { requested_by, .. }
            | PluginSystemError::OwnershipViolation { requested_by, .. } => Some(requested_by),
            PluginSystemError::NotLoaded(plugin_id) | PluginSystemError::AlreadyLoaded(plugin_id) => {
                Some(plugin_id)
            }
            PluginSystemError::ManifestValidation { .. }
            | PluginSystemError::ManifestError { .. }
            | PluginSystemError::UnknownExtensionPoint(_)
            | PluginSystemError::InvalidPath(_) => None,
        }
    }

    /// The aggregated messages for validation failures.
    pub fn validation_messages(&self) -> Option<&[String]> {
        match self {
            PluginSystemError::ManifestValidation { source, .. }
            | PluginSystemError::ModuleValidation { source, .. } => Some(&source.messages),
            _ => None,
        }
    }

    pub(crate) fn module_load(
        plugin_id: &str,
        path: impl Into<PathBuf>,
        source: impl Into<PluginSystemErrorSource>,
    ) -> Self {
        PluginSystemError::ModuleLoadError {
            plugin_id: plugin_id.to_string(),
            path: path.into(),
            source: Box::new(source.into()),
        }
    }
}
