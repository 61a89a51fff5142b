//! # Conduit UI Bridge
//!
//! The narrow surface through which plugin activity becomes visible to the
//! user: notifications (info/warning/error pop-ups) and per-plugin output
//! channels. The host application provides the real implementations; the
//! ones here log through the `log` facade or record into memory.
pub mod messages;
pub mod output;

use std::fmt;
use std::sync::Mutex;
use std::time::SystemTime;

use log::{debug, error, info, warn};

pub use messages::util;
pub use output::{BufferedOutputChannel, LogOutputChannel, LogOutputProvider, MemoryOutputProvider, OutputChannel, OutputChannelProvider};

/// UI message severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageSeverity {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning message
    Warning,
    /// Error message
    Error,
    /// Critical error message
    Critical,
}

impl fmt::Display for MessageSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MessageSeverity::Debug => "DEBUG",
            MessageSeverity::Info => "INFO",
            MessageSeverity::Warning => "WARN",
            MessageSeverity::Error => "ERROR",
            MessageSeverity::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

/// A user-visible notification
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub severity: MessageSeverity,
    /// Source component, e.g. `Plugin: serial-tools`
    pub source: String,
    pub message: String,
    pub timestamp: SystemTime,
}

/// Host surface for info/warning/error notifications
pub trait NotificationSink: Send + Sync + fmt::Debug {
    fn notify(&self, notification: Notification);
}

/// Sink that forwards notifications to the log facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn notify(&self, notification: Notification) {
        let Notification { severity, source, message, .. } = notification;
        match severity {
            MessageSeverity::Debug => debug!("[{}] {}", source, message),
            MessageSeverity::Info => info!("[{}] {}", source, message),
            MessageSeverity::Warning => warn!("[{}] {}", source, message),
            MessageSeverity::Error | MessageSeverity::Critical => error!("[{}] {}", source, message),
        }
    }
}

/// Sink that keeps every notification in memory
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    received: Mutex<Vec<Notification>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all notifications received so far
    pub fn notifications(&self) -> Vec<Notification> {
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, severity: MessageSeverity) -> usize {
        self.notifications()
            .iter()
            .filter(|n| n.severity == severity)
            .count()
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn notify(&self, notification: Notification) {
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notification);
    }
}
