#![cfg(test)]

use std::fs;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tempfile::tempdir;

use crate::kernel::bootstrap::Application;
use crate::kernel::component::KernelComponent;
use crate::plugin_system::context::PluginContext;
use crate::plugin_system::manager::PluginManager;
use crate::plugin_system::module::{ModuleExports, ModuleResult, PluginModule};
use crate::plugin_system::tests::common::{manifest, write_plugin};
use crate::storage::HostConfig;

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Session {
    opened: u32,
}

/// Counts its activations in plugin storage.
#[derive(Debug)]
struct SessionCounter;

#[async_trait::async_trait]
impl PluginModule for SessionCounter {
    fn exports(&self) -> ModuleExports {
        ModuleExports::new().with_activate()
    }

    async fn activate(&self, context: Arc<PluginContext>) -> ModuleResult {
        let storage = context.storage();
        let mut session: Session = storage.get_or("session", Session::default());
        session.opened += 1;
        storage.set("session", &session)?;
        context.logger().info(&format!("session {}", session.opened));
        Ok(())
    }
}

#[cfg(feature = "yaml-config")]
#[tokio::test]
async fn test_yaml_config_drives_discovery() {
    let workspace = tempdir().expect("Failed to create temp dir");
    let builtin = workspace.path().join("builtin");
    let user = workspace.path().join("user");
    write_plugin(&builtin, &manifest("core-charts").activation_event("*").build(), "counter");
    write_plugin(&user, &manifest("user-theme").activation_event("*").build(), "counter");
    fs::create_dir_all(user.join("empty-dir")).expect("mkdir");

    let config_path = workspace.path().join("conduit.yaml");
    fs::write(
        &config_path,
        format!(
            "builtin_plugins_dir: {}\nuser_plugins_dir: {}\nplugin_dirs:\n  - {}\n",
            builtin.display(),
            user.display(),
            workspace.path().join("missing").display()
        ),
    )
    .expect("write config");
    let config = HostConfig::load(&config_path).expect("Config should load");
    assert_eq!(config.discovery_roots().len(), 3);

    let app = Application::builder()
        .config(config)
        .static_module("counter", || Arc::new(SessionCounter) as Arc<dyn PluginModule>)
        .without_native_modules()
        .build()
        .expect("Application should build");
    app.run().await.expect("Application should run");

    let manager = app.plugin_manager();
    assert_eq!(manager.loaded_plugins(), vec!["core-charts".to_string(), "user-theme".to_string()]);
    assert_eq!(manager.activated_plugins(), manager.loaded_plugins());
    app.stop().await.expect("Application should stop");
}

#[cfg(feature = "toml-config")]
#[tokio::test]
async fn test_toml_config_with_custom_manifest_name() {
    let workspace = tempdir().expect("Failed to create temp dir");
    let root = workspace.path().join("plugins");
    let dir = write_plugin(&root, &manifest("renamed").build(), "counter");
    fs::rename(dir.join("plugin.json"), dir.join("conduit-plugin.json")).expect("rename");
    write_plugin(&root, &manifest("ignored").build(), "counter");

    let config_path = workspace.path().join("conduit.toml");
    fs::write(
        &config_path,
        format!(
            "plugin_dirs = [{:?}]\nmanifest_file_name = \"conduit-plugin.json\"\nauto_activate = false\n",
            root.display().to_string()
        ),
    )
    .expect("write config");
    let config = HostConfig::load(&config_path).expect("Config should load");

    let app = Application::builder()
        .config(config)
        .static_module("counter", || Arc::new(SessionCounter) as Arc<dyn PluginModule>)
        .without_native_modules()
        .build()
        .expect("Application should build");
    app.run().await.expect("Application should run");
    assert_eq!(app.plugin_manager().loaded_plugins(), vec!["renamed".to_string()]);
}

#[tokio::test]
async fn test_plugin_storage_survives_reload_and_restart() {
    let workspace = tempdir().expect("Failed to create temp dir");
    let root = workspace.path().join("plugins");
    write_plugin(&root, &manifest("sessions").activation_event("onStartupFinished").build(), "counter");
    let config = HostConfig {
        plugin_dirs: vec![root.clone()],
        storage_file: Some(workspace.path().join("state.json")),
        ..HostConfig::default()
    };

    let build = || {
        Application::builder()
            .config(config.clone())
            .static_module("counter", || Arc::new(SessionCounter) as Arc<dyn PluginModule>)
            .without_native_modules()
            .build()
            .expect("Application should build")
    };

    let app = build();
    app.run().await.expect("Application should run");
    let manager = app.plugin_manager();
    assert!(manager.reload_plugin("sessions").await);
    assert!(manager.activate_plugin("sessions").await.success);
    assert_eq!(
        app.services().store.get("plugin.sessions.session"),
        Some(serde_json::json!({ "opened": 2 }))
    );
    app.stop().await.expect("Application should stop");
    drop(app);

    let restarted = build();
    restarted.run().await.expect("Application should run");
    assert_eq!(
        restarted.services().store.get("plugin.sessions.session"),
        Some(serde_json::json!({ "opened": 3 }))
    );
}

#[tokio::test]
async fn test_blocking_security_findings_from_config() {
    let workspace = tempdir().expect("Failed to create temp dir");
    let root = workspace.path().join("plugins");
    let dir = write_plugin(&root, &manifest("sneaky").build(), "counter");
    fs::write(dir.join("index.module"), "# fetch('http://example.invalid')\ncounter\n").expect("write");

    let mut config = HostConfig {
        plugin_dirs: vec![root.clone()],
        ..HostConfig::default()
    };
    config.security.block_on_findings = true;
    let app = Application::builder()
        .config(config)
        .static_module("counter", || Arc::new(SessionCounter) as Arc<dyn PluginModule>)
        .without_native_modules()
        .build()
        .expect("Application should build");
    app.run().await.expect("Application should run");
    assert!(app.plugin_manager().loaded_plugins().is_empty());
}
