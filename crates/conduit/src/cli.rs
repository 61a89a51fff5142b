use conduit_core::plugin_system::manager::{PluginManager, PluginState};
use conduit_core::plugin_system::security::Finding;
use conduit_core::ui_bridge::{Notification, NotificationSink};
use conduit_core::DefaultPluginManager;

/// Notification sink for the command line.
///
/// Notifications go to stderr so stdout stays machine-readable for
/// `schema` and `plugins stats`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotificationSink;

impl NotificationSink for ConsoleNotificationSink {
    fn notify(&self, notification: Notification) {
        eprintln!(
            "[{}] {}: {}",
            notification.severity, notification.source, notification.message
        );
    }
}

pub fn state_label(state: PluginState) -> &'static str {
    match state {
        PluginState::Unloaded => "unloaded",
        PluginState::Loaded => "loaded",
        PluginState::Activated => "activated",
    }
}

/// One line per plugin: `id  version  state  (N contributions)`
pub fn render_plugin_list(manager: &DefaultPluginManager) -> Vec<String> {
    let mut ids = manager.loaded_plugins();
    ids.sort();
    ids.iter()
        .filter_map(|id| manager.get_plugin(id))
        .map(|instance| {
            let manifest = &instance.manifest;
            format!(
                "{}\t{}\t{}\t({} contributions)",
                manifest.id,
                manifest.version,
                state_label(manager.plugin_state(&manifest.id)),
                manifest.contributes.len()
            )
        })
        .collect()
}

pub fn render_findings(findings: &[Finding]) -> Vec<String> {
    findings.iter().map(|f| format!("{:?} at {}", f.kind, f)).collect()
}
