#![cfg(test)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tempfile::tempdir;

use crate::kernel::component::KernelComponent;
use crate::kernel::constants::STARTUP_FINISHED_EVENT;
use crate::plugin_system::contribution::{Contribution, WidgetKind};
use crate::plugin_system::events::PluginEvent;
use crate::plugin_system::extension_point::ExtensionPoint;
use crate::plugin_system::manager::{PluginManager, PluginState};
use crate::plugin_system::module::ModuleExports;
use crate::plugin_system::tests::common::{manifest, write_plugin, MockBehavior, TestHost};
use crate::ui_bridge::MessageSeverity;

fn full_exports() -> ModuleExports {
    ModuleExports::new()
        .with_collection(ExtensionPoint::CommunicationDrivers, ["serial"])
        .with_collection(ExtensionPoint::DataParsers, ["csv"])
        .with_collection(ExtensionPoint::VisualizationWidgets, ["chart-widget"])
        .with_activate()
        .with_deactivate()
}

fn error_messages(host: &TestHost) -> Vec<(String, String)> {
    host.notifier
        .notifications()
        .into_iter()
        .filter(|n| n.severity == MessageSeverity::Error)
        .map(|n| (n.source, n.message))
        .collect()
}

#[tokio::test]
async fn test_full_lifecycle() {
    let root = tempdir().expect("Failed to create temp dir");
    let host = TestHost::new();
    let counters = host.register_mock("serial", full_exports(), MockBehavior::Succeed);
    let manifest = manifest("serial-tools")
        .activation_event(STARTUP_FINISHED_EVENT)
        .contribute(Contribution::driver("serial", "Serial", "serial"))
        .contribute(Contribution::parser("csv", "CSV"))
        .build();
    let dir = write_plugin(root.path(), &manifest, "serial");
    let mut events = host.registry.subscribe();

    assert_eq!(host.manager.plugin_state("serial-tools"), PluginState::Unloaded);
    assert!(host.manager.load_plugin(&dir).await);
    assert_eq!(host.manager.plugin_state("serial-tools"), PluginState::Loaded);
    assert!(host.registry.get_plugin_contributions("serial-tools").is_empty());

    let result = host.manager.activate_plugin("serial-tools").await;
    assert!(result.success, "Activation failed: {:?}", result.error);
    assert_eq!(result.exports, Some(full_exports()));
    assert_eq!(host.manager.plugin_state("serial-tools"), PluginState::Activated);
    assert_eq!(counters.activations(), 1);
    assert_eq!(host.registry.get_plugin_contributions("serial-tools").len(), 2);
    assert_eq!(host.registry.get_contribution_owner("csv").as_deref(), Some("serial-tools"));

    let channel = host
        .output
        .channel("Plugin: serial-tools")
        .expect("Plugin output channel");
    assert_eq!(channel.lines(), vec!["[INFO] activated".to_string()]);

    assert!(host.manager.deactivate_plugin("serial-tools").await);
    assert_eq!(host.manager.plugin_state("serial-tools"), PluginState::Loaded);
    assert_eq!(counters.deactivations(), 1);
    assert_eq!(counters.disposed(), 1);
    assert_eq!(host.registry.statistics().total_contributions, 0);

    assert!(host.manager.unload_plugin("serial-tools").await);
    assert_eq!(host.manager.plugin_state("serial-tools"), PluginState::Unloaded);
    assert!(host.manager.get_plugin("serial-tools").is_none());
    assert!(host.manager.contexts().get_context(&manifest).is_none());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let kinds: Vec<PluginEvent> = seen.iter().map(|e| e.event).collect();
    assert_eq!(
        kinds,
        vec![PluginEvent::Loaded, PluginEvent::Activated, PluginEvent::Deactivated, PluginEvent::Unloaded]
    );
    assert_eq!(seen[0].data.as_ref().map(|d| d["version"].clone()), Some(json!("1.0.0")));
    assert_eq!(seen[1].data, Some(json!({ "contributions": ["serial", "csv"] })));
    assert_eq!(seen[2].data, Some(json!({ "removedContributions": 2, "clean": true })));
    assert!(error_messages(&host).is_empty());
}

#[tokio::test]
async fn test_missing_module_export_fails_load() {
    let root = tempdir().expect("Failed to create temp dir");
    let host = TestHost::new();
    host.register_mock("no-drivers", ModuleExports::new().with_activate(), MockBehavior::Succeed);
    let manifest = manifest("serial-driver")
        .activation_event(STARTUP_FINISHED_EVENT)
        .contribute(Contribution::driver("serial", "Serial", "serial"))
        .build();
    let dir = write_plugin(root.path(), &manifest, "no-drivers");

    assert!(!host.manager.load_plugin(&dir).await);
    assert!(!host.manager.is_plugin_loaded("serial-driver"));
    assert!(host.manager.get_plugin("serial-driver").is_none());

    let errors = error_messages(&host);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "Plugin: serial-driver");
    assert!(errors[0].1.contains("Plugin declares driver contributions but does not export \"drivers\""));
}

#[tokio::test]
async fn test_contribution_conflict_between_plugins() {
    let root = tempdir().expect("Failed to create temp dir");
    let host = TestHost::new();
    let exports = ModuleExports::new()
        .with_collection(ExtensionPoint::VisualizationWidgets, ["chart-widget", "gauge"])
        .with_activate()
        .with_deactivate();
    let a_counters = host.register_mock("widgets-a", exports.clone(), MockBehavior::Succeed);
    let b_counters = host.register_mock("widgets-b", exports, MockBehavior::Succeed);

    let plugin_a = manifest("plugin-a")
        .activation_event("*")
        .contribute(Contribution::widget("chart-widget", "Chart", WidgetKind::Dataset))
        .build();
    let plugin_b = manifest("plugin-b")
        .activation_event("*")
        .contribute(Contribution::widget("gauge", "Gauge", WidgetKind::Group))
        .contribute(Contribution::widget("chart-widget", "Chart", WidgetKind::Dataset))
        .build();
    assert!(host.manager.load_plugin(&write_plugin(root.path(), &plugin_a, "widgets-a")).await);
    assert!(host.manager.load_plugin(&write_plugin(root.path(), &plugin_b, "widgets-b")).await);

    assert!(host.manager.activate_plugin("plugin-a").await.success);
    let result = host.manager.activate_plugin("plugin-b").await;
    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Contribution 'chart-widget' is already registered by plugin 'plugin-a'")
    );
    assert!(result.exports.is_none());

    assert_eq!(host.manager.plugin_state("plugin-b"), PluginState::Loaded);
    assert_eq!(host.registry.get_contribution_owner("chart-widget").as_deref(), Some("plugin-a"));
    assert!(!host.registry.has_contribution("gauge"), "Partial registrations are rolled back");
    assert_eq!(host.registry.statistics().total_contributions, 1);
    assert_eq!(a_counters.activations(), 1);
    assert_eq!(b_counters.activations(), 1);
    assert_eq!(b_counters.disposed(), 1, "Subscriptions of the failed activation are released");

    let errors = error_messages(&host);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "Plugin: plugin-b");
    assert!(errors[0].1.contains("already registered by plugin 'plugin-a'"));

    // Once plugin-a steps aside, plugin-b can take the id
    assert!(host.manager.deactivate_plugin("plugin-a").await);
    assert!(host.manager.activate_plugin("plugin-b").await.success);
    assert_eq!(host.registry.get_contribution_owner("chart-widget").as_deref(), Some("plugin-b"));
}

#[tokio::test]
async fn test_activation_is_idempotent() {
    let root = tempdir().expect("Failed to create temp dir");
    let host = TestHost::new();
    let counters = host.register_mock("mock", full_exports(), MockBehavior::Succeed);
    let manifest = manifest("plugin-a")
        .activation_event("*")
        .contribute(Contribution::widget("chart-widget", "Chart", WidgetKind::Dataset))
        .build();
    assert!(host.manager.load_plugin(&write_plugin(root.path(), &manifest, "mock")).await);

    for _ in 0..3 {
        assert!(host.manager.activate_plugin("plugin-a").await.success);
    }
    assert_eq!(counters.activations(), 1);
    assert_eq!(host.registry.get_plugin_contributions("plugin-a").len(), 1);
}

#[tokio::test]
async fn test_concurrent_activation_runs_module_once() {
    let root = tempdir().expect("Failed to create temp dir");
    let host = TestHost::new();
    let counters = host.register_mock(
        "slow",
        full_exports(),
        MockBehavior::SlowActivate(Duration::from_millis(50)),
    );
    let manifest = manifest("plugin-a").activation_event("*").build();
    assert!(host.manager.load_plugin(&write_plugin(root.path(), &manifest, "slow")).await);

    let results = join_all((0..8).map(|_| host.manager.activate_plugin("plugin-a"))).await;
    assert!(results.iter().all(|r| r.success));
    assert_eq!(counters.activations(), 1);
    assert_eq!(host.manager.activated_plugins(), vec!["plugin-a".to_string()]);
}

#[tokio::test]
async fn test_activation_failures_are_reported() {
    let root = tempdir().expect("Failed to create temp dir");
    let host = TestHost::new();
    host.register_mock("failing", full_exports(), MockBehavior::FailActivate("port busy".to_string()));
    host.register_mock("panicking", full_exports(), MockBehavior::PanicActivate);
    let failing = manifest("failing")
        .activation_event("*")
        .contribute(Contribution::parser("csv", "CSV"))
        .build();
    let panicking = manifest("panicking").activation_event("*").build();
    assert!(host.manager.load_plugin(&write_plugin(root.path(), &failing, "failing")).await);
    assert!(host.manager.load_plugin(&write_plugin(root.path(), &panicking, "panicking")).await);

    let result = host.manager.activate_plugin("failing").await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("port busy"));
    assert_eq!(host.manager.plugin_state("failing"), PluginState::Loaded);
    assert!(!host.registry.has_contribution("csv"));

    let result = host.manager.activate_plugin("panicking").await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("panic: mock activation panic"));
    assert_eq!(host.manager.plugin_state("panicking"), PluginState::Loaded);

    let errors = error_messages(&host);
    assert_eq!(
        errors,
        vec![
            ("Plugin: failing".to_string(), "Activation failed: port busy".to_string()),
            ("Plugin: panicking".to_string(), "Activation failed: panic: mock activation panic".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_activating_unknown_plugin() {
    let host = TestHost::new();
    let result = host.manager.activate_plugin("ghost").await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Plugin 'ghost' is not loaded"));
    assert!(host.notifier.notifications().is_empty());

    assert!(!host.manager.deactivate_plugin("ghost").await);
    assert!(!host.manager.unload_plugin("ghost").await);
}

#[tokio::test]
async fn test_failed_deactivation_still_cleans_up() {
    let root = tempdir().expect("Failed to create temp dir");
    let host = TestHost::new();
    let counters = host.register_mock(
        "stubborn",
        full_exports(),
        MockBehavior::FailDeactivate("device did not close".to_string()),
    );
    let manifest = manifest("stubborn")
        .activation_event("*")
        .contribute(Contribution::driver("serial", "Serial", "serial"))
        .build();
    assert!(host.manager.load_plugin(&write_plugin(root.path(), &manifest, "stubborn")).await);
    assert!(host.manager.activate_plugin("stubborn").await.success);

    assert!(!host.manager.deactivate_plugin("stubborn").await);
    assert_eq!(host.manager.plugin_state("stubborn"), PluginState::Loaded);
    assert!(!host.registry.has_contribution("serial"));
    assert_eq!(counters.deactivations(), 1);
    assert_eq!(counters.disposed(), 1);

    let errors = error_messages(&host);
    assert_eq!(
        errors,
        vec![("Plugin: stubborn".to_string(), "Deactivation failed: device did not close".to_string())]
    );
    assert!(!host.manager.deactivate_plugin("stubborn").await, "Already deactivated");
}

#[tokio::test]
async fn test_deactivate_hook_is_optional() {
    let root = tempdir().expect("Failed to create temp dir");
    let host = TestHost::new();
    let counters = host.register_mock(
        "no-hook",
        ModuleExports::new().with_activate(),
        MockBehavior::FailDeactivate("never called".to_string()),
    );
    let manifest = manifest("no-hook").activation_event("*").build();
    assert!(host.manager.load_plugin(&write_plugin(root.path(), &manifest, "no-hook")).await);
    assert!(host.manager.activate_plugin("no-hook").await.success);

    assert!(host.manager.deactivate_plugin("no-hook").await);
    assert_eq!(counters.deactivations(), 0);
    assert_eq!(counters.disposed(), 1);
}

#[tokio::test]
async fn test_load_rejects_duplicates_and_bad_input() {
    let root = tempdir().expect("Failed to create temp dir");
    let host = TestHost::new();
    host.register_mock("mock", ModuleExports::new(), MockBehavior::Succeed);
    let dir = write_plugin(root.path(), &manifest("plugin-a").build(), "mock");

    assert!(host.manager.load_plugin(&dir).await);
    assert!(!host.manager.load_plugin(&dir).await, "Already loaded");
    assert!(host.manager.is_plugin_loaded("plugin-a"));

    assert!(!host.manager.load_plugin(Path::new("")).await);
    assert!(!host.manager.load_plugin(&root.path().join("missing")).await);
    let errors = error_messages(&host);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "Plugin: unknown");
}

#[tokio::test]
async fn test_incompatible_engine_is_rejected() {
    let root = tempdir().expect("Failed to create temp dir");
    let host = TestHost::new();
    host.register_mock("mock", ModuleExports::new(), MockBehavior::Succeed);
    let manifest = manifest("future-plugin").engines("^3.0.0", "^1.0.0").build();
    let dir = write_plugin(root.path(), &manifest, "mock");

    assert!(!host.manager.load_plugin(&dir).await);
    let errors = error_messages(&host);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].1.contains("requires host ^3.0.0"));
}

#[tokio::test]
async fn test_unload_deactivates_first() {
    let root = tempdir().expect("Failed to create temp dir");
    let host = TestHost::new();
    let counters = host.register_mock("mock", full_exports(), MockBehavior::Succeed);
    let manifest = manifest("plugin-a")
        .activation_event("*")
        .contribute(Contribution::widget("chart-widget", "Chart", WidgetKind::Dataset))
        .build();
    let dir = write_plugin(root.path(), &manifest, "mock");
    assert!(host.manager.load_plugin(&dir).await);
    assert!(host.manager.activate_plugin("plugin-a").await.success);

    assert!(host.manager.unload_plugin("plugin-a").await);
    assert_eq!(counters.deactivations(), 1);
    assert!(!host.registry.has_contribution("chart-widget"));
    assert!(host.manager.loader().cached_module(&manifest.identity()).is_none());

    // A fresh load goes through the loader again
    assert!(host.manager.load_plugin(&dir).await);
}

#[tokio::test]
async fn test_lifecycle_locks_are_released_after_unload() {
    let root = tempdir().expect("Failed to create temp dir");
    let host = TestHost::new();
    host.register_mock("mock", full_exports(), MockBehavior::Succeed);
    let manifest = manifest("plugin-a")
        .activation_event("*")
        .contribute(Contribution::widget("chart-widget", "Chart", WidgetKind::Dataset))
        .build();
    let dir = write_plugin(root.path(), &manifest, "mock");

    assert!(host.manager.load_plugin(&dir).await);
    assert!(host.manager.activate_plugin("plugin-a").await.success);
    assert_eq!(host.manager.tracked_locks(), 1);

    assert!(host.manager.reload_plugin("plugin-a").await);
    assert_eq!(host.manager.tracked_locks(), 1);

    assert!(host.manager.unload_plugin("plugin-a").await);
    assert_eq!(host.manager.tracked_locks(), 0);

    // Operations on ids that were never loaded leave nothing behind
    assert!(!host.manager.activate_plugin("ghost").await.success);
    assert!(!host.manager.deactivate_plugin("ghost").await);
    assert!(!host.manager.unload_plugin("ghost").await);
    assert!(!host.manager.reload_plugin("ghost").await);
    assert_eq!(host.manager.tracked_locks(), 0);
}

#[tokio::test]
async fn test_reload_replaces_module() {
    let root = tempdir().expect("Failed to create temp dir");
    let host = TestHost::new();
    let counters = host.register_mock("mock", full_exports(), MockBehavior::Succeed);
    let manifest = manifest("plugin-a")
        .activation_event("*")
        .contribute(Contribution::widget("chart-widget", "Chart", WidgetKind::Dataset))
        .build();
    assert!(host.manager.load_plugin(&write_plugin(root.path(), &manifest, "mock")).await);
    assert!(host.manager.activate_plugin("plugin-a").await.success);
    let before = host.manager.get_plugin("plugin-a").expect("Loaded");

    assert!(host.manager.reload_plugin("plugin-a").await);
    let after = host.manager.get_plugin("plugin-a").expect("Reloaded");
    assert!(!Arc::ptr_eq(&before.module, &after.module));
    assert!(!Arc::ptr_eq(&before.context, &after.context));
    assert_eq!(host.manager.plugin_state("plugin-a"), PluginState::Loaded);
    assert_eq!(counters.deactivations(), 1);
    assert!(!host.registry.has_contribution("chart-widget"));

    assert!(!host.manager.reload_plugin("ghost").await);
    let errors = error_messages(&host);
    assert_eq!(errors, vec![("Plugin: ghost".to_string(), "Plugin 'ghost' is not loaded".to_string())]);
}

#[tokio::test]
async fn test_activate_by_event() {
    let root = tempdir().expect("Failed to create temp dir");
    let host = TestHost::new();
    host.register_mock("mock", full_exports(), MockBehavior::Succeed);
    for (id, event) in [
        ("startup", STARTUP_FINISHED_EVENT),
        ("anything", "*"),
        ("command", "onCommand:serial.open"),
    ] {
        let manifest = manifest(id).activation_event(event).build();
        assert!(host.manager.load_plugin(&write_plugin(root.path(), &manifest, "mock")).await);
    }
    let lazy = manifest("lazy").build();
    assert!(host.manager.load_plugin(&write_plugin(root.path(), &lazy, "mock")).await);

    let activated = host.manager.activate_by_event(STARTUP_FINISHED_EVENT).await;
    assert_eq!(activated, vec!["anything".to_string(), "startup".to_string()]);
    assert!(host.manager.activate_by_event(STARTUP_FINISHED_EVENT).await.is_empty());

    let activated = host.manager.activate_by_event("onCommand:serial.open").await;
    assert_eq!(activated, vec!["command".to_string()]);
    assert_eq!(host.manager.plugin_state("lazy"), PluginState::Loaded);
}

#[tokio::test]
async fn test_discover_plugins_across_roots() {
    let first = tempdir().expect("Failed to create temp dir");
    let second = tempdir().expect("Failed to create temp dir");
    let host = TestHost::new();
    host.register_mock("mock", ModuleExports::new(), MockBehavior::Succeed);
    write_plugin(first.path(), &manifest("alpha").build(), "mock");
    write_plugin(first.path(), &manifest("beta").build(), "mock");
    write_plugin(second.path(), &manifest("gamma").build(), "mock");
    let broken = second.path().join("broken");
    std::fs::create_dir_all(&broken).expect("mkdir");
    std::fs::write(broken.join("plugin.json"), r#"{"id": "broken"}"#).expect("write");

    let roots = vec![
        first.path().to_path_buf(),
        second.path().to_path_buf(),
        first.path().join("no-such-root"),
    ];
    assert_eq!(host.manager.discover_plugins(&roots).await, 3);
    assert_eq!(
        host.manager.loaded_plugins(),
        vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()]
    );
    assert_eq!(error_messages(&host).len(), 1, "The broken manifest is reported");

    assert_eq!(host.manager.discover_plugins(&roots).await, 0, "Nothing new to load");
}

#[tokio::test]
async fn test_deactivate_all_and_statistics() {
    let root = tempdir().expect("Failed to create temp dir");
    let host = TestHost::new();
    host.register_mock("mock", full_exports(), MockBehavior::Succeed);
    host.register_mock(
        "stubborn",
        full_exports(),
        MockBehavior::FailDeactivate("stuck".to_string()),
    );
    for (id, module) in [("a", "mock"), ("b", "mock"), ("c", "stubborn")] {
        let manifest = manifest(id)
            .activation_event("*")
            .contribute(Contribution::parser(&format!("{}-parser", id), "Parser"))
            .build();
        assert!(host.manager.load_plugin(&write_plugin(root.path(), &manifest, module)).await);
        assert!(host.manager.activate_plugin(id).await.success);
    }

    let stats = host.manager.statistics();
    assert_eq!(stats.total_plugins, 3);
    assert_eq!(stats.activated_plugins, 3);
    assert_eq!(stats.registry.total_contributions, 3);
    assert_eq!(stats.registry.per_extension_point[&ExtensionPoint::DataParsers], 3);

    assert_eq!(host.manager.deactivate_all_plugins().await, 2);
    assert!(host.manager.activated_plugins().is_empty());
    let stats = host.manager.statistics();
    assert_eq!(stats.total_plugins, 3);
    assert_eq!(stats.activated_plugins, 0);
    assert_eq!(stats.registry.total_contributions, 0);
}

#[tokio::test]
async fn test_kernel_component_lifecycle() {
    let root = tempdir().expect("Failed to create temp dir");
    let host = TestHost::new();
    let counters = host.register_mock("mock", full_exports(), MockBehavior::Succeed);
    write_plugin(root.path(), &manifest("eager").activation_event(STARTUP_FINISHED_EVENT).build(), "mock");
    write_plugin(root.path(), &manifest("lazy").activation_event("onCommand:x").build(), "mock");

    let TestHost { manager, registry, .. } = host;
    let manager = manager
        .with_roots(vec![root.path().to_path_buf()])
        .with_auto_activate(true);
    assert_eq!(manager.name(), "DefaultPluginManager");

    manager.initialize().await.expect("initialize");
    assert_eq!(manager.loaded_plugins(), vec!["eager".to_string(), "lazy".to_string()]);
    assert!(manager.activated_plugins().is_empty());

    manager.start().await.expect("start");
    assert_eq!(manager.activated_plugins(), vec!["eager".to_string()]);
    assert_eq!(counters.activations(), 1);

    manager.stop().await.expect("stop");
    assert!(manager.activated_plugins().is_empty());
    assert_eq!(counters.deactivations(), 1);

    drop(manager);
    assert_eq!(registry.statistics().total_contributions, 0);
}

#[tokio::test]
async fn test_error_listener_is_removed_on_drop() {
    let host = TestHost::new();
    let TestHost { manager, registry, notifier, .. } = host;
    drop(manager);

    registry.emit_event(
        PluginEvent::Error,
        crate::plugin_system::events::PluginEventData::new(PluginEvent::Error, "orphan").with_error("late"),
    );
    assert!(notifier.notifications().is_empty());
}
