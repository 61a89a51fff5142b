//! # Conduit Storage
//!
//! Persistence services the host lends to plugins, plus host configuration.
//!
//! ## Key Components:
//!
//! - **[`KeyValueStore`](provider::KeyValueStore)**: the store contract plugin
//!   storage views are layered on (`get`/`set`/`delete`/`keys`).
//! - **[`MemoryStore`](memory::MemoryStore)**: volatile store used when no
//!   storage file is configured and in tests.
//! - **[`FileStore`](local::FileStore)**: store persisted atomically to a JSON,
//!   YAML or TOML file.
//! - **[`HostConfig`](config::HostConfig)**: host settings (plugin roots,
//!   versions, security knobs) and the [`ConfigFormat`](config::ConfigFormat)
//!   detection shared with the stores.
//! - **Error Handling**: [`StorageSystemError`](error::StorageSystemError).
pub mod config;
pub mod error;
pub mod local;
pub mod memory;
pub mod provider;

pub use config::{ConfigData, ConfigFormat, HostConfig, SecuritySettings};
pub use error::StorageSystemError;
pub use local::FileStore;
pub use memory::MemoryStore;
pub use provider::KeyValueStore;
