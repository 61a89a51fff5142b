//! # Conduit Plugin System
//!
//! Hosts third-party plugins: discovery, manifest validation, module
//! loading, activation and the registry of everything plugins contribute.
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`validator`]** / **[`manifest`]**: the `plugin.json` model and its
//!   collect-all validation, plus a JSON Schema for external tooling.
//! - **[`extension_point`]** / **[`contribution`]**: the 15 fixed extension
//!   points and one typed contribution record per point.
//! - **[`loader`]**: manifest and module caches, entry-point probing and the
//!   exports-versus-manifest cross check. Modules come from a
//!   [`resolver::ModuleResolver`]; [`ffi`] provides the shared-library one.
//! - **[`security`]**: capability allow/deny lists, source scanning and
//!   restricted scopes.
//! - **[`registry`]**: [`ContributionRegistry`], the ownership-tracked
//!   store of contributions, with its lifecycle [`events`].
//! - **[`context`]**: per-plugin logger, namespaced storage and API.
//! - **[`manager`]**: [`PluginManager`], the load → activate → deactivate →
//!   unload state machine.
pub mod context;
pub mod contribution;
pub mod error;
pub mod events;
pub mod extension_point;
pub mod ffi;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod module;
pub mod registry;
pub mod resolver;
pub mod security;
pub mod validator;
pub mod version;

pub use context::{ContextFactory, HostServices, PluginContext, Subscription};
pub use contribution::Contribution;
pub use error::{PluginSystemError, ValidationError};
pub use events::{PluginEvent, PluginEventData};
pub use extension_point::ExtensionPoint;
pub use loader::ModuleLoader;
pub use manager::{ActivationResult, DefaultPluginManager, PluginManager, PluginState};
pub use manifest::{ManifestBuilder, PluginManifest};
pub use module::{BoxError, ModuleExports, PluginModule};
pub use registry::{ContributionRegistry, RegistryStatistics};
pub use resolver::{ModuleResolver, StaticModuleResolver};
pub use security::SecurityPolicy;

// Test module declaration
#[cfg(test)]
pub(crate) mod tests;
