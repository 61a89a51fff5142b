mod common;

use std::env::consts::DLL_EXTENSION;

use conduit_core::plugin_system::PluginState;
use conduit_core::{Application, ExtensionPoint, HostConfig, KernelComponent, PluginManager};
use tempfile::tempdir;

const PLUGIN_ID: &str = "serial-driver";

#[tokio::test]
async fn test_serial_driver_lifecycle() {
    let root = tempdir().expect("Failed to create temp dir");
    common::install_serial_driver(root.path());

    let app = Application::builder()
        .config(HostConfig {
            plugin_dirs: vec![root.path().to_path_buf()],
            auto_activate: false,
            ..Default::default()
        })
        .build()
        .expect("Failed to build application");
    app.run().await.expect("Failed to start application");

    let manager = app.plugin_manager();
    let registry = app.registry();
    assert!(manager.is_plugin_loaded(PLUGIN_ID));
    assert_eq!(manager.plugin_state(PLUGIN_ID), PluginState::Loaded);
    let instance = manager.get_plugin(PLUGIN_ID).unwrap();
    assert_eq!(
        instance.entry.file_name().and_then(|name| name.to_str()),
        Some(format!("plugin.{}", DLL_EXTENSION).as_str())
    );
    assert!(instance.exports.exports_collection(ExtensionPoint::CommunicationDrivers));
    drop(instance);

    let result = manager.activate_plugin(PLUGIN_ID).await;
    assert!(result.success, "activation failed: {:?}", result.error);
    assert_eq!(registry.get_contribution_owner("serial").as_deref(), Some(PLUGIN_ID));
    assert_eq!(registry.get_contributions(ExtensionPoint::CommunicationDrivers).len(), 1);

    // The library refuses a deactivate it did not see an activate for,
    // so a clean result proves the call crossed the ABI
    assert!(manager.deactivate_plugin(PLUGIN_ID).await);
    assert!(!registry.has_contribution("serial"));
    assert_eq!(manager.plugin_state(PLUGIN_ID), PluginState::Loaded);

    manager.activate_plugin(PLUGIN_ID).await;
    assert!(manager.reload_plugin(PLUGIN_ID).await);
    assert_eq!(manager.plugin_state(PLUGIN_ID), PluginState::Loaded);
    assert!(!registry.has_contribution("serial"));

    // A fresh module instance accepts activation again
    assert!(manager.activate_plugin(PLUGIN_ID).await.success);
    assert!(registry.has_contribution("serial"));

    assert!(manager.unload_plugin(PLUGIN_ID).await);
    assert_eq!(manager.plugin_state(PLUGIN_ID), PluginState::Unloaded);
    assert!(!registry.has_contribution("serial"));

    app.stop().await.expect("Failed to stop application");
}

#[tokio::test]
async fn test_serial_driver_activates_on_startup() {
    let root = tempdir().expect("Failed to create temp dir");
    common::install_serial_driver(root.path());

    let app = Application::builder()
        .config(HostConfig {
            plugin_dirs: vec![root.path().to_path_buf()],
            ..Default::default()
        })
        .build()
        .expect("Failed to build application");
    app.run().await.expect("Failed to start application");

    let manager = app.plugin_manager();
    assert!(manager.is_plugin_activated(PLUGIN_ID));
    assert!(app.registry().has_contribution("serial"));

    app.stop().await.expect("Failed to stop application");
    assert!(!manager.is_plugin_activated(PLUGIN_ID));
}
