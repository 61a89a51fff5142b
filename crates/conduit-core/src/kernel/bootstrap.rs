use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::kernel::component::KernelComponent;
use crate::kernel::constants;
use crate::kernel::error::{Error, KernelLifecyclePhase, Result};
use crate::plugin_system::context::{ContextFactory, HostServices};
use crate::plugin_system::ffi::NativeModuleResolver;
use crate::plugin_system::loader::{LoaderOptions, ModuleLoader};
use crate::plugin_system::manager::DefaultPluginManager;
use crate::plugin_system::module::PluginModule;
use crate::plugin_system::registry::ContributionRegistry;
use crate::plugin_system::resolver::StaticModuleResolver;
use crate::plugin_system::security::SecurityPolicy;
use crate::plugin_system::version::HostVersions;
use crate::storage::{FileStore, HostConfig, KeyValueStore, MemoryStore};
use crate::ui_bridge::{LogNotificationSink, LogOutputProvider, NotificationSink, OutputChannelProvider};

/// Composition root: one registry, context factory, loader and plugin
/// manager built from a [`HostConfig`].
pub struct Application {
    config: HostConfig,
    services: HostServices,
    registry: Arc<ContributionRegistry>,
    static_modules: Arc<StaticModuleResolver>,
    plugin_manager: Arc<DefaultPluginManager>,
    // Lifecycle order; stopped in reverse
    components: Vec<Arc<dyn KernelComponent>>,
    initialized: AtomicBool,
    started: AtomicBool,
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let components: Vec<&str> = self.components.iter().map(|c| c.name()).collect();
        f.debug_struct("Application")
            .field("components", &components)
            .field("initialized", &self.is_initialized())
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

impl Application {
    /// Application with default configuration and in-memory storage
    pub fn new() -> Result<Self> {
        ApplicationBuilder::new().build()
    }

    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn services(&self) -> &HostServices {
        &self.services
    }

    pub fn registry(&self) -> Arc<ContributionRegistry> {
        self.registry.clone()
    }

    pub fn plugin_manager(&self) -> Arc<DefaultPluginManager> {
        self.plugin_manager.clone()
    }

    /// Resolver for `.module` descriptors; register factories here.
    pub fn static_modules(&self) -> Arc<StaticModuleResolver> {
        self.static_modules.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Initialize, then start.
    pub async fn run(&self) -> Result<()> {
        self.initialize().await?;
        self.start().await
    }
}

#[async_trait]
impl KernelComponent for Application {
    fn name(&self) -> &'static str {
        "Application"
    }

    async fn initialize(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(Error::lifecycle(
                KernelLifecyclePhase::Initialize,
                None,
                "Application already initialized",
                None,
            ));
        }
        log::info!("Initializing {} v{}", constants::APP_NAME, constants::APP_VERSION);
        for component in &self.components {
            log::info!("Initializing component: {}", component.name());
            if let Err(e) = component.initialize().await {
                self.initialized.store(false, Ordering::SeqCst);
                return Err(Error::lifecycle(
                    KernelLifecyclePhase::Initialize,
                    Some(component.name()),
                    "Component failed to initialize",
                    Some(e),
                ));
            }
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::lifecycle(
                KernelLifecyclePhase::Start,
                None,
                "Application must be initialized before it starts",
                None,
            ));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            log::debug!("Application already started");
            return Ok(());
        }
        for component in &self.components {
            log::info!("Starting component: {}", component.name());
            component.start().await.map_err(|e| {
                Error::lifecycle(
                    KernelLifecyclePhase::Start,
                    Some(component.name()),
                    "Component failed to start",
                    Some(e),
                )
            })?;
        }
        Ok(())
    }

    /// Stops every component in reverse order and reports the first failure.
    async fn stop(&self) -> Result<()> {
        let mut first_error = None;
        for component in self.components.iter().rev() {
            log::info!("Stopping component: {}", component.name());
            if let Err(e) = component.stop().await {
                log::error!("Error stopping component {}: {}", component.name(), e);
                if first_error.is_none() {
                    first_error = Some(Error::lifecycle(
                        KernelLifecyclePhase::Shutdown,
                        Some(component.name()),
                        "Component failed to stop",
                        Some(e),
                    ));
                }
            }
        }
        self.started.store(false, Ordering::SeqCst);
        self.initialized.store(false, Ordering::SeqCst);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Builder for [`Application`]; host collaborators not supplied fall back
/// to log-backed defaults.
#[derive(Default)]
pub struct ApplicationBuilder {
    config: HostConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    output: Option<Arc<dyn OutputChannelProvider>>,
    static_modules: Arc<StaticModuleResolver>,
    without_native: bool,
}

impl ApplicationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn output(mut self, output: Arc<dyn OutputChannelProvider>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn static_module<F>(self, name: &str, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn PluginModule> + Send + Sync + 'static,
    {
        self.static_modules.register(name, factory);
        self
    }

    /// Skip the shared-library resolver
    pub fn without_native_modules(mut self) -> Self {
        self.without_native = true;
        self
    }

    pub fn build(self) -> Result<Application> {
        let config = self.config;
        let host_versions = HostVersions::parse(&config.host_engine_version, &config.framework_version)
            .map_err(|e| {
                Error::lifecycle(
                    KernelLifecyclePhase::Bootstrap,
                    None,
                    format!("Invalid host version configuration: {}", e),
                    None,
                )
            })?;

        let store: Arc<dyn KeyValueStore> = match (self.store, &config.storage_file) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileStore::open(path.clone())?),
            (None, None) => Arc::new(MemoryStore::new()),
        };
        let policy = SecurityPolicy::from_settings(&config.security);
        let services = HostServices {
            store,
            notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotificationSink)),
            output: self.output.unwrap_or_else(|| Arc::new(LogOutputProvider)),
            policy: Arc::new(policy),
        };

        let registry = Arc::new(ContributionRegistry::new());
        let contexts = Arc::new(ContextFactory::new(services.clone()));
        let mut loader = ModuleLoader::new(services.policy.clone(), LoaderOptions::from(&config))
            .with_resolver(self.static_modules.clone());
        if !self.without_native {
            loader = loader.with_resolver(Arc::new(NativeModuleResolver::new()));
        }

        let plugin_manager = Arc::new(
            DefaultPluginManager::new(registry.clone(), contexts, Arc::new(loader), host_versions)
                .with_roots(config.discovery_roots())
                .with_auto_activate(config.auto_activate),
        );
        log::debug!("Plugin roots: {:?}", plugin_manager.roots());

        let components: Vec<Arc<dyn KernelComponent>> = vec![plugin_manager.clone()];
        Ok(Application {
            config,
            services,
            registry,
            static_modules: self.static_modules,
            plugin_manager,
            components,
            initialized: AtomicBool::new(false),
            started: AtomicBool::new(false),
        })
    }
}
