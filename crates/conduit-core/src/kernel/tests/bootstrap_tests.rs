#![cfg(test)]

use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;

use crate::kernel::bootstrap::Application;
use crate::kernel::component::KernelComponent;
use crate::kernel::error::{Error, KernelLifecyclePhase};
use crate::plugin_system::contribution::{Contribution, WidgetKind};
use crate::plugin_system::extension_point::ExtensionPoint;
use crate::plugin_system::manager::PluginManager;
use crate::plugin_system::module::{ModuleExports, PluginModule};
use crate::plugin_system::tests::common::{manifest, write_plugin, MockBehavior, MockCounters, MockModule};
use crate::storage::{FileStore, HostConfig, KeyValueStore, MemoryStore};
use crate::ui_bridge::{MessageSeverity, RecordingNotificationSink};

fn widget_exports() -> ModuleExports {
    ModuleExports::new()
        .with_collection(ExtensionPoint::VisualizationWidgets, ["chart-widget"])
        .with_activate()
        .with_deactivate()
}

fn phase_of(err: &Error) -> Option<KernelLifecyclePhase> {
    match err {
        Error::KernelLifecycleError { phase, .. } => Some(*phase),
        _ => None,
    }
}

#[tokio::test]
async fn test_application_new_defaults() {
    let app = Application::new().expect("Application::new failed");
    assert!(!app.is_initialized());
    assert!(!app.is_started());
    assert!(app.plugin_manager().roots().is_empty());
    assert_eq!(app.registry().statistics().total_contributions, 0);
    assert_eq!(app.config(), &HostConfig::default());
    assert_eq!(app.services().store.name(), "memory");
}

#[tokio::test]
async fn test_application_run_discovers_and_activates() {
    let root = tempdir().expect("Failed to create temp dir");
    let plugin = manifest("charts")
        .activation_event("onStartupFinished")
        .contribute(Contribution::widget("chart-widget", "Chart", WidgetKind::Dataset))
        .build();
    write_plugin(root.path(), &plugin, "charts");

    let counters = Arc::new(MockCounters::default());
    let shared = counters.clone();
    let config = HostConfig {
        plugin_dirs: vec![root.path().to_path_buf()],
        ..HostConfig::default()
    };
    let app = Application::builder()
        .config(config)
        .static_module("charts", move || {
            Arc::new(MockModule::new(widget_exports(), MockBehavior::Succeed, shared.clone())) as Arc<dyn PluginModule>
        })
        .without_native_modules()
        .build()
        .expect("Application should build");

    app.run().await.expect("Application should run");
    assert!(app.is_initialized());
    assert!(app.is_started());
    assert_eq!(counters.activations(), 1);
    assert_eq!(app.plugin_manager().activated_plugins(), vec!["charts".to_string()]);
    assert_eq!(app.registry().get_contribution_owner("chart-widget").as_deref(), Some("charts"));

    // Starting twice is harmless
    app.start().await.expect("Second start is a no-op");
    assert_eq!(counters.activations(), 1);

    app.stop().await.expect("Application should stop");
    assert!(!app.is_initialized());
    assert!(!app.is_started());
    assert_eq!(counters.deactivations(), 1);
    assert!(app.plugin_manager().activated_plugins().is_empty());
    assert!(!app.registry().has_contribution("chart-widget"));
}

#[tokio::test]
async fn test_auto_activate_can_be_disabled() {
    let root = tempdir().expect("Failed to create temp dir");
    write_plugin(root.path(), &manifest("charts").activation_event("*").build(), "charts");
    let counters = Arc::new(MockCounters::default());
    let shared = counters.clone();

    let app = Application::builder()
        .config(HostConfig {
            plugin_dirs: vec![root.path().to_path_buf()],
            auto_activate: false,
            ..HostConfig::default()
        })
        .static_module("charts", move || {
            Arc::new(MockModule::new(widget_exports(), MockBehavior::Succeed, shared.clone())) as Arc<dyn PluginModule>
        })
        .build()
        .expect("Application should build");

    app.run().await.expect("Application should run");
    assert_eq!(app.plugin_manager().loaded_plugins(), vec!["charts".to_string()]);
    assert!(app.plugin_manager().activated_plugins().is_empty());
    assert_eq!(counters.activations(), 0);
}

#[tokio::test]
async fn test_start_requires_initialize() {
    let app = Application::new().expect("Application::new failed");
    let err = app.start().await.expect_err("Start before initialize");
    assert_eq!(phase_of(&err), Some(KernelLifecyclePhase::Start));
    assert!(!app.is_started());
}

#[tokio::test]
async fn test_initialize_twice_fails() {
    let app = Application::new().expect("Application::new failed");
    app.initialize().await.expect("First initialize");
    let err = app.initialize().await.expect_err("Second initialize");
    assert_eq!(phase_of(&err), Some(KernelLifecyclePhase::Initialize));
    assert!(err.to_string().contains("already initialized"));
}

#[tokio::test]
async fn test_invalid_host_version_fails_build() {
    let config = HostConfig {
        host_engine_version: "one".to_string(),
        ..HostConfig::default()
    };
    let err = Application::builder().config(config).build().expect_err("Bad version");
    assert_eq!(phase_of(&err), Some(KernelLifecyclePhase::Bootstrap));
}

#[tokio::test]
async fn test_storage_selection() {
    let dir = tempdir().expect("Failed to create temp dir");
    let store_path = dir.path().join("store.json");
    let app = Application::builder()
        .config(HostConfig {
            storage_file: Some(store_path.clone()),
            ..HostConfig::default()
        })
        .build()
        .expect("Application should build");
    assert_eq!(app.services().store.name(), "file");
    app.services()
        .store
        .set("plugin.charts.theme", json!("dark"))
        .expect("File store write");
    let reopened = FileStore::open(&store_path).expect("Store should reopen");
    assert_eq!(reopened.get("plugin.charts.theme"), Some(json!("dark")));

    let explicit = Arc::new(MemoryStore::new());
    let app = Application::builder()
        .config(HostConfig {
            storage_file: Some(store_path),
            ..HostConfig::default()
        })
        .store(explicit.clone())
        .build()
        .expect("Application should build");
    app.services().store.set("k", json!(1)).expect("Memory store write");
    assert_eq!(explicit.get("k"), Some(json!(1)), "An explicit store wins over the config");
}

#[tokio::test]
async fn test_plugin_errors_reach_the_notifier() {
    let root = tempdir().expect("Failed to create temp dir");
    write_plugin(root.path(), &manifest("orphan").build(), "never-registered");
    let notifier = Arc::new(RecordingNotificationSink::new());

    let app = Application::builder()
        .config(HostConfig {
            plugin_dirs: vec![root.path().to_path_buf()],
            ..HostConfig::default()
        })
        .notifier(notifier.clone())
        .without_native_modules()
        .build()
        .expect("Application should build");

    app.run().await.expect("Load failures do not fail startup");
    assert!(app.plugin_manager().loaded_plugins().is_empty());
    let errors = notifier.notifications();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].severity, MessageSeverity::Error);
    assert_eq!(errors[0].source, "Plugin: orphan");
    assert!(errors[0].message.contains("no static module named 'never-registered'"));
}
