//! Plugin host core: manifest validation, module loading, the contribution
//! registry and the plugin lifecycle manager.
pub mod kernel;
pub mod plugin_system;
pub mod storage;
pub mod ui_bridge;

// Re-export key public types for the binary and for plugins
pub use kernel::error::Error as KernelError;
pub use kernel::{Application, ApplicationBuilder, KernelComponent};
pub use plugin_system::{
    ActivationResult, Contribution, ContributionRegistry, DefaultPluginManager, ExtensionPoint,
    PluginManager, PluginManifest, PluginModule,
};
pub use storage::{HostConfig, KeyValueStore};

#[cfg(test)]
mod tests;
