/// Utility functions for creating common notifications
pub mod util {
    use std::time::SystemTime;

    use crate::ui_bridge::{MessageSeverity, Notification};

    fn notification(severity: MessageSeverity, source: &str, message: &str) -> Notification {
        Notification {
            severity,
            source: source.to_string(),
            message: message.to_string(),
            timestamp: SystemTime::now(),
        }
    }

    /// Create an info notification
    pub fn info(source: &str, message: &str) -> Notification {
        notification(MessageSeverity::Info, source, message)
    }

    /// Create a warning notification
    pub fn warning(source: &str, message: &str) -> Notification {
        notification(MessageSeverity::Warning, source, message)
    }

    /// Create an error notification
    pub fn error(source: &str, message: &str) -> Notification {
        notification(MessageSeverity::Error, source, message)
    }
}
