use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use log::info;

/// A named, append-only text channel (one per plugin)
pub trait OutputChannel: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn append_line(&self, line: &str);
}

/// Creates output channels on behalf of plugins
pub trait OutputChannelProvider: Send + Sync + fmt::Debug {
    fn create_channel(&self, name: &str) -> Arc<dyn OutputChannel>;
}

/// Channel that writes each line to the log facade under target `output`
#[derive(Debug, Clone)]
pub struct LogOutputChannel {
    name: String,
}

impl LogOutputChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl OutputChannel for LogOutputChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn append_line(&self, line: &str) {
        info!(target: "output", "[{}] {}", self.name, line);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogOutputProvider;

impl OutputChannelProvider for LogOutputProvider {
    fn create_channel(&self, name: &str) -> Arc<dyn OutputChannel> {
        Arc::new(LogOutputChannel::new(name))
    }
}

/// Channel that keeps its lines in memory
#[derive(Debug, Default)]
pub struct BufferedOutputChannel {
    name: String,
    lines: Mutex<Vec<String>>,
}

impl BufferedOutputChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl OutputChannel for BufferedOutputChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn append_line(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line.to_string());
    }
}

/// Provider handing out buffered channels, retrievable by name afterwards
#[derive(Debug, Default)]
pub struct MemoryOutputProvider {
    channels: Mutex<HashMap<String, Arc<BufferedOutputChannel>>>,
}

impl MemoryOutputProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self, name: &str) -> Option<Arc<BufferedOutputChannel>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }
}

impl OutputChannelProvider for MemoryOutputProvider {
    fn create_channel(&self, name: &str) -> Arc<dyn OutputChannel> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let channel = channels
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(BufferedOutputChannel::new(name)))
            .clone();
        channel
    }
}
