#![cfg(test)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::plugin_system::context::{ContextFactory, HostServices, PluginContext, Subscription};
use crate::plugin_system::loader::{LoaderOptions, ModuleLoader};
use crate::plugin_system::manager::DefaultPluginManager;
use crate::plugin_system::manifest::{ManifestBuilder, PluginManifest};
use crate::plugin_system::module::{ModuleExports, ModuleResult, PluginModule};
use crate::plugin_system::registry::ContributionRegistry;
use crate::plugin_system::resolver::StaticModuleResolver;
use crate::plugin_system::version::HostVersions;
use crate::storage::MemoryStore;
use crate::ui_bridge::{MemoryOutputProvider, RecordingNotificationSink};

/// How a [`MockModule`] behaves when the host calls into it
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Succeed,
    FailActivate(String),
    PanicActivate,
    FailDeactivate(String),
    SlowActivate(Duration),
}

/// Call counters shared between a mock module and the test
#[derive(Debug, Default)]
pub struct MockCounters {
    pub activations: AtomicUsize,
    pub deactivations: AtomicUsize,
    pub disposed: AtomicUsize,
}

impl MockCounters {
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct MockModule {
    exports: ModuleExports,
    behavior: MockBehavior,
    counters: Arc<MockCounters>,
}

impl MockModule {
    pub fn new(exports: ModuleExports, behavior: MockBehavior, counters: Arc<MockCounters>) -> Self {
        Self {
            exports,
            behavior,
            counters,
        }
    }
}

#[async_trait]
impl PluginModule for MockModule {
    fn exports(&self) -> ModuleExports {
        self.exports.clone()
    }

    async fn activate(&self, context: Arc<PluginContext>) -> ModuleResult {
        self.counters.activations.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::FailActivate(message) => return Err(message.clone().into()),
            MockBehavior::PanicActivate => panic!("mock activation panic"),
            MockBehavior::SlowActivate(delay) => tokio::time::sleep(*delay).await,
            _ => {}
        }
        let counters = self.counters.clone();
        context.subscribe(Subscription::new("mock-listener", move || {
            counters.disposed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        context.logger().info("activated");
        Ok(())
    }

    async fn deactivate(&self) -> ModuleResult {
        self.counters.deactivations.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::FailDeactivate(message) => Err(message.clone().into()),
            _ => Ok(()),
        }
    }
}

/// Manifest builder with every required field filled in
pub fn manifest(id: &str) -> ManifestBuilder {
    ManifestBuilder::new(id, &format!("{} plugin", id), "1.0.0")
        .description("Test plugin")
        .author("Conduit Tests")
        .engines("^1.0.0", "^1.0.0")
}

/// Writes `<root>/<id>/plugin.json` plus an `index.module` descriptor naming
/// `module_name`. Returns the plugin directory.
pub fn write_plugin(root: &Path, manifest: &PluginManifest, module_name: &str) -> PathBuf {
    let dir = root.join(&manifest.id);
    fs::create_dir_all(&dir).expect("Failed to create plugin directory");
    let json = serde_json::to_string_pretty(manifest).expect("Failed to serialize manifest");
    fs::write(dir.join("plugin.json"), json).expect("Failed to write manifest");
    fs::write(dir.join("index.module"), format!("# test module\n{}\n", module_name))
        .expect("Failed to write module descriptor");
    dir
}

/// A fully wired plugin host backed by in-memory collaborators
pub struct TestHost {
    pub registry: Arc<ContributionRegistry>,
    pub statics: Arc<StaticModuleResolver>,
    pub notifier: Arc<RecordingNotificationSink>,
    pub output: Arc<MemoryOutputProvider>,
    pub store: Arc<MemoryStore>,
    pub manager: DefaultPluginManager,
}

impl TestHost {
    pub fn new() -> Self {
        Self::with_options(LoaderOptions::default())
    }

    pub fn with_options(options: LoaderOptions) -> Self {
        let notifier = Arc::new(RecordingNotificationSink::new());
        let output = Arc::new(MemoryOutputProvider::new());
        let store = Arc::new(MemoryStore::new());
        let services = HostServices::in_memory()
            .with_store(store.clone())
            .with_notifier(notifier.clone())
            .with_output(output.clone());

        let registry = Arc::new(ContributionRegistry::new());
        let statics = Arc::new(StaticModuleResolver::new());
        let loader = ModuleLoader::new(services.policy.clone(), options).with_resolver(statics.clone());
        let versions = HostVersions::parse("1.0.0", "1.0.0").expect("Valid host versions");
        let manager = DefaultPluginManager::new(
            registry.clone(),
            Arc::new(ContextFactory::new(services)),
            Arc::new(loader),
            versions,
        );

        Self {
            registry,
            statics,
            notifier,
            output,
            store,
            manager,
        }
    }

    /// Registers a mock under `name` and returns its counters.
    pub fn register_mock(&self, name: &str, exports: ModuleExports, behavior: MockBehavior) -> Arc<MockCounters> {
        let counters = Arc::new(MockCounters::default());
        let shared = counters.clone();
        self.statics.register(name, move || {
            Arc::new(MockModule::new(exports.clone(), behavior.clone(), shared.clone())) as Arc<dyn PluginModule>
        });
        counters
    }
}
