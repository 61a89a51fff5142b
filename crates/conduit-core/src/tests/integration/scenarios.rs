#![cfg(test)]

use std::sync::Arc;

use tempfile::tempdir;

use crate::kernel::bootstrap::Application;
use crate::plugin_system::contribution::{Contribution, WidgetKind};
use crate::plugin_system::extension_point::ExtensionPoint;
use crate::plugin_system::manager::{PluginManager, PluginState};
use crate::plugin_system::module::{ModuleExports, PluginModule};
use crate::plugin_system::tests::common::{manifest, write_plugin, MockBehavior, MockCounters, MockModule};
use crate::storage::HostConfig;
use crate::ui_bridge::RecordingNotificationSink;

fn mock_factory(exports: ModuleExports) -> impl Fn() -> Arc<dyn PluginModule> + Send + Sync + 'static {
    let counters = Arc::new(MockCounters::default());
    move || Arc::new(MockModule::new(exports.clone(), MockBehavior::Succeed, counters.clone())) as Arc<dyn PluginModule>
}

#[tokio::test]
async fn test_driver_without_module_export_is_not_loaded() {
    let root = tempdir().expect("Failed to create temp dir");
    let plugin = manifest("serial-plugin")
        .activation_event("onStartupFinished")
        .contribute(Contribution::driver("serial-driver", "Serial", "serial"))
        .build();
    let dir = write_plugin(root.path(), &plugin, "serial");

    let app = Application::builder()
        .static_module("serial", mock_factory(ModuleExports::new().with_activate()))
        .without_native_modules()
        .build()
        .expect("Application should build");
    let manager = app.plugin_manager();

    assert!(!manager.load_plugin(&dir).await);
    assert!(manager.get_plugin("serial-plugin").is_none());
    assert_eq!(manager.plugin_state("serial-plugin"), PluginState::Unloaded);
    assert!(!app.registry().has_contribution("serial-driver"));
}

#[tokio::test]
async fn test_second_plugin_cannot_claim_registered_widget() {
    let root = tempdir().expect("Failed to create temp dir");
    let notifier = Arc::new(RecordingNotificationSink::new());
    let exports = ModuleExports::new()
        .with_collection(ExtensionPoint::VisualizationWidgets, ["chart-widget"])
        .with_activate();
    for id in ["plugin-a", "plugin-b"] {
        let plugin = manifest(id)
            .activation_event("onStartupFinished")
            .contribute(Contribution::widget("chart-widget", "Chart", WidgetKind::Dataset))
            .build();
        write_plugin(root.path(), &plugin, "charts");
    }

    let app = Application::builder()
        .config(HostConfig {
            plugin_dirs: vec![root.path().to_path_buf()],
            auto_activate: false,
            ..HostConfig::default()
        })
        .notifier(notifier.clone())
        .static_module("charts", mock_factory(exports))
        .without_native_modules()
        .build()
        .expect("Application should build");
    app.run().await.expect("Application should run");
    let manager = app.plugin_manager();
    assert_eq!(manager.loaded_plugins(), vec!["plugin-a".to_string(), "plugin-b".to_string()]);

    assert!(manager.activate_plugin("plugin-a").await.success);
    let result = manager.activate_plugin("plugin-b").await;
    assert!(!result.success);
    let message = result.error.expect("Failure carries a message");
    assert!(message.contains("plugin-a"), "Message should name the owner: {}", message);

    assert_eq!(manager.plugin_state("plugin-b"), PluginState::Loaded);
    assert_eq!(app.registry().get_contribution_owner("chart-widget").as_deref(), Some("plugin-a"));
    assert_eq!(notifier.notifications().len(), 1);
}

#[tokio::test]
async fn test_empty_registry_statistics() {
    let app = Application::new().expect("Application::new failed");
    let stats = app.registry().statistics();
    assert_eq!(stats.total_contributions, 0);
    assert_eq!(stats.total_plugins, 0);
    assert_eq!(stats.per_extension_point.len(), 15);
    for point in ExtensionPoint::ALL {
        assert_eq!(stats.per_extension_point.get(&point), Some(&0), "{} should be listed", point);
    }

    let manager_stats = app.plugin_manager().statistics();
    assert_eq!(manager_stats.total_plugins, 0);
    assert_eq!(manager_stats.registry, stats);
}
