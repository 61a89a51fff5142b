use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kernel::constants;
use crate::kernel::error::{Error, Result};
use crate::storage::error::StorageSystemError;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }

    /// Serialize any value in this format
    pub fn to_string<T: Serialize>(&self, value: &T) -> Result<String> {
        let text = match self {
            ConfigFormat::Json => serde_json::to_string_pretty(value)
                .map_err(|e| StorageSystemError::serialization("json", e))?,
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::to_string(value)
                .map_err(|e| StorageSystemError::serialization("yaml", e))?,
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::to_string_pretty(value)
                .map_err(|e| StorageSystemError::serialization("toml", e))?,
        };
        Ok(text)
    }

    /// Deserialize any value from text in this format
    pub fn from_str<T: for<'de> Deserialize<'de>>(&self, data: &str) -> Result<T> {
        let value = match self {
            ConfigFormat::Json => serde_json::from_str(data)
                .map_err(|e| StorageSystemError::deserialization("json", e))?,
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(data)
                .map_err(|e| StorageSystemError::deserialization("yaml", e))?,
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(data)
                .map_err(|e| StorageSystemError::deserialization("toml", e))?,
        };
        Ok(value)
    }
}

/// In-memory representation of stored key-value data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigData {
    /// Raw values
    #[serde(flatten)]
    values: HashMap<String, Value>,
}

impl ConfigData {
    /// Create a new empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from a HashMap
    pub fn from_hashmap(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Get a typed value
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Get a typed value with default
    pub fn get_or<T: for<'de> Deserialize<'de>>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Get the raw value
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Set a typed value
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        let json_value = serde_json::to_value(value)
            .map_err(|e| StorageSystemError::serialization("json", e))?;
        self.values.insert(key.to_string(), json_value);
        Ok(())
    }

    /// Set a raw value
    pub fn insert_value(&mut self, key: &str, value: Value) -> Option<Value> {
        self.values.insert(key.to_string(), value)
    }

    /// Remove a value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Check if key exists
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// All keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Merge with another config, overriding existing values
    pub fn merge(&mut self, other: &ConfigData) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Serialize to string based on format
    pub fn serialize(&self, format: ConfigFormat) -> Result<String> {
        format.to_string(self)
    }

    /// Deserialize from string based on format
    pub fn deserialize(data: &str, format: ConfigFormat) -> Result<Self> {
        format.from_str(data)
    }
}

/// Security knobs of the host configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Capabilities granted in addition to the default allow-list
    pub allow: Vec<String>,
    /// Capabilities denied in addition to the default deny-list
    pub deny: Vec<String>,
    /// Scan text entry files for restricted constructs before loading
    pub scan_sources: bool,
    /// Refuse to load a module whose entry file produced findings
    pub block_on_findings: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            deny: Vec::new(),
            scan_sources: true,
            block_on_findings: false,
        }
    }
}

/// Host configuration, loaded from JSON, YAML or TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Plugins shipped with the host
    pub builtin_plugins_dir: Option<PathBuf>,
    /// Plugins installed by the user
    pub user_plugins_dir: Option<PathBuf>,
    /// Additional discovery roots
    pub plugin_dirs: Vec<PathBuf>,
    /// Manifest file looked up in each plugin directory
    pub manifest_file_name: String,
    /// Version matched against `engines.host`
    pub host_engine_version: String,
    /// Version matched against `engines.framework`
    pub framework_version: String,
    /// File backing the persistent plugin store; in-memory when absent
    pub storage_file: Option<PathBuf>,
    /// Activate plugins listening for startup once the host has started
    pub auto_activate: bool,
    pub security: SecuritySettings,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            builtin_plugins_dir: None,
            user_plugins_dir: None,
            plugin_dirs: Vec::new(),
            manifest_file_name: constants::MANIFEST_FILE_NAME.to_string(),
            host_engine_version: constants::HOST_ENGINE_VERSION.to_string(),
            framework_version: constants::FRAMEWORK_API_VERSION.to_string(),
            storage_file: None,
            auto_activate: true,
            security: SecuritySettings::default(),
        }
    }
}

impl HostConfig {
    /// Load a configuration file, picking the format from its extension
    pub fn load(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path).ok_or_else(|| {
            StorageSystemError::UnsupportedConfigFormat(path.display().to_string())
        })?;
        let data = fs::read_to_string(path)
            .map_err(|e| Error::io(e, "read_config", path.to_path_buf()))?;
        format.from_str(&data)
    }

    /// Write the configuration, picking the format from the extension
    pub fn save(&self, path: &Path) -> Result<()> {
        let format = ConfigFormat::from_path(path).ok_or_else(|| {
            StorageSystemError::UnsupportedConfigFormat(path.display().to_string())
        })?;
        let text = format.to_string(self)?;
        fs::write(path, text).map_err(|e| Error::io(e, "write_config", path.to_path_buf()))
    }

    /// Every configured discovery root, builtin first, user second
    pub fn discovery_roots(&self) -> Vec<PathBuf> {
        self.builtin_plugins_dir
            .iter()
            .chain(self.user_plugins_dir.iter())
            .chain(self.plugin_dirs.iter())
            .cloned()
            .collect()
    }
}
