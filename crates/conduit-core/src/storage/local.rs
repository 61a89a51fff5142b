use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::debug;
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::kernel::error::{Error, Result};
use crate::storage::config::{ConfigData, ConfigFormat};
use crate::storage::error::StorageSystemError;
use crate::storage::provider::KeyValueStore;

/// Key-value store persisted to a single local file.
///
/// Every write rewrites the file through a temporary file in the same
/// directory, so readers never observe a half-written store.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    format: ConfigFormat,
    data: Mutex<ConfigData>,
}

impl FileStore {
    /// Open the store at `path`, creating it lazily on first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let format = ConfigFormat::from_path(&path).ok_or_else(|| {
            StorageSystemError::UnsupportedConfigFormat(path.display().to_string())
        })?;

        let data = if path.is_file() {
            let text = fs::read_to_string(&path)
                .map_err(|e| Error::io(e, "read_store", path.clone()))?;
            if text.trim().is_empty() {
                ConfigData::new()
            } else {
                ConfigData::deserialize(&text, format)?
            }
        } else {
            ConfigData::new()
        };
        debug!("Opened file store at {} with {} keys", path.display(), data.len());

        Ok(Self {
            path,
            format,
            data: Mutex::new(data),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, ConfigData> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &ConfigData) -> Result<()> {
        let contents = data.serialize(self.format)?;
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !parent.is_dir() {
            fs::create_dir_all(&parent)
                .map_err(|e| Error::io(e, "create_dir_all", parent.clone()))?;
        }

        // Create a named temporary file in the same directory as the target file
        let temp_file = NamedTempFile::new_in(&parent)
            .map_err(|e| Error::io(e, "create_temp_file", parent.clone()))?;
        temp_file
            .as_file()
            .write_all(contents.as_bytes())
            .map_err(|e| Error::io(e, "write_to_temp_file", temp_file.path().to_path_buf()))?;
        // Atomically replace the target file
        temp_file
            .persist(&self.path)
            .map_err(|e| Error::io(e.error, "persist_temp_file", self.path.clone()))?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.lock().get_value(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut data = self.lock();
        let previous = data.insert_value(key, value);
        if let Err(e) = self.persist(&data) {
            // Keep memory consistent with disk
            match previous {
                Some(previous) => data.insert_value(key, previous),
                None => data.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut data = self.lock();
        let Some(previous) = data.remove(key) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&data) {
            data.insert_value(key, previous);
            return Err(e);
        }
        Ok(true)
    }

    fn keys(&self) -> Vec<String> {
        self.lock().keys()
    }
}
