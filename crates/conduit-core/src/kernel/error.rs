//! # Conduit Kernel Errors
//!
//! Defines the top-level error type of the Conduit host.
//!
//! [`Error`] wraps the typed errors of each subsystem ([`PluginSystemError`],
//! [`StorageSystemError`]) and adds kernel lifecycle failures raised while the
//! [`Application`](crate::kernel::bootstrap::Application) initializes, starts or
//! stops its components.
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::plugin_system::error::PluginSystemError;
use crate::storage::error::StorageSystemError;

/// Top-level error for the Conduit host
#[derive(Debug, ThisError)]
pub enum Error {
    /// Specific, typed plugin system error
    #[error("Plugin system error: {0}")]
    PluginSystem(#[from] PluginSystemError),

    /// Specific, typed storage system error
    #[error("Storage system error: {0}")]
    StorageSystem(#[from] StorageSystemError),

    /// Error occurring during a specific kernel lifecycle phase.
    #[error("Kernel lifecycle error during {phase}: {message}")]
    KernelLifecycleError {
        phase: KernelLifecyclePhase,
        component_name: Option<String>,
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    /// Generic error with message
    #[error("Error: {0}")]
    Other(String),
}

/// Represents a specific phase in the kernel's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum KernelLifecyclePhase {
    #[error("Bootstrap")]
    Bootstrap,
    #[error("Initialize")]
    Initialize,
    #[error("Start")]
    Start,
    #[error("Shutdown")]
    Shutdown,
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl Error {
    /// Wraps an I/O failure with the operation and path it happened on.
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: PathBuf) -> Self {
        Error::StorageSystem(StorageSystemError::io(source, operation, path))
    }

    /// Builds a lifecycle error for `phase`, optionally naming the component and cause.
    pub fn lifecycle(
        phase: KernelLifecyclePhase,
        component_name: Option<&str>,
        message: impl Into<String>,
        source: Option<Error>,
    ) -> Self {
        Error::KernelLifecycleError {
            phase,
            component_name: component_name.map(str::to_string),
            message: message.into(),
            source: source.map(Box::new),
        }
    }
}
