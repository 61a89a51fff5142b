//! Lifecycle events emitted by the plugin system.
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log::{debug, error};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::plugin_system::module::BoxError;

/// Handle returned by [`EventBus::add_listener`]
pub type ListenerId = u64;

/// Capacity of the broadcast channel handed to async subscribers
const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PluginEvent {
    #[serde(rename = "plugin:loaded")]
    Loaded,
    #[serde(rename = "plugin:activated")]
    Activated,
    #[serde(rename = "plugin:deactivated")]
    Deactivated,
    #[serde(rename = "plugin:unloaded")]
    Unloaded,
    #[serde(rename = "plugin:error")]
    Error,
}

impl PluginEvent {
    pub const ALL: [PluginEvent; 5] = [
        PluginEvent::Loaded,
        PluginEvent::Activated,
        PluginEvent::Deactivated,
        PluginEvent::Unloaded,
        PluginEvent::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginEvent::Loaded => "plugin:loaded",
            PluginEvent::Activated => "plugin:activated",
            PluginEvent::Deactivated => "plugin:deactivated",
            PluginEvent::Unloaded => "plugin:unloaded",
            PluginEvent::Error => "plugin:error",
        }
    }
}

impl fmt::Display for PluginEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload delivered with every [`PluginEvent`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginEventData {
    pub plugin_id: String,
    pub event: PluginEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PluginEventData {
    pub fn new(event: PluginEvent, plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            event,
            data: None,
            error: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Synchronous listener. A returned error or a panic is logged and
/// delivery continues with the next listener.
pub type EventListener = Arc<dyn Fn(&PluginEventData) -> Result<(), BoxError> + Send + Sync>;

/// Fan-out of [`PluginEventData`] to registered listeners and broadcast subscribers.
pub struct EventBus {
    listeners: RwLock<HashMap<PluginEvent, Vec<(ListenerId, EventListener)>>>,
    next_listener_id: AtomicU64,
    sender: broadcast::Sender<PluginEventData>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listener_count", &self.listener_count())
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            sender,
        }
    }

    pub fn add_listener<F>(&self, event: PluginEvent, listener: F) -> ListenerId
    where
        F: Fn(&PluginEventData) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners
            .entry(event)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns false when no listener with that id is registered for `event`.
    pub fn remove_listener(&self, event: PluginEvent, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(entries) = listeners.get_mut(&event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        before != entries.len()
    }

    /// Delivers `data` to every listener of `event`, then to broadcast subscribers.
    ///
    /// Listeners run against a snapshot taken before delivery, so a listener
    /// may add or remove listeners without deadlocking.
    pub fn emit(&self, event: PluginEvent, data: PluginEventData) {
        let snapshot: Vec<(ListenerId, EventListener)> = {
            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            listeners.get(&event).cloned().unwrap_or_default()
        };

        for (id, listener) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(&data))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Event listener {} for '{}' failed: {}", id, event, e);
                }
                Err(_) => {
                    error!("Event listener {} for '{}' panicked", id, event);
                }
            }
        }

        // No receivers is not an error.
        if self.sender.send(data).is_err() {
            debug!("No broadcast subscribers for '{}'", event);
        }
    }

    /// Receiver for every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PluginEventData> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.values().map(Vec::len).sum()
    }

    pub fn clear(&self) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.clear();
    }
}
