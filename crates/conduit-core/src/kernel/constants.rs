/// Application name
pub const APP_NAME: &str = "Conduit";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the extension-point framework plugins declare compatibility with
pub const FRAMEWORK_API_VERSION: &str = "1.0.0";

/// Default version reported for the host engine
pub const HOST_ENGINE_VERSION: &str = "1.0.0";

/// Manifest file expected inside every plugin directory
pub const MANIFEST_FILE_NAME: &str = "plugin.json";

/// Configuration directory name
pub const CONFIG_DIR_NAME: &str = ".conduit";

/// Plugins shipped with the host
pub const BUILTIN_PLUGINS_DIR: &str = "plugins/builtin";

/// Plugins installed by the user
pub const USER_PLUGINS_DIR: &str = "plugins/user";

/// Entry file stems tried, in order, when a manifest has no `main`
pub const DEFAULT_ENTRY_STEMS: [&str; 3] = ["index", "main", "plugin"];

/// Root segment of every plugin storage key (`plugin.<id>.<key>`)
pub const STORAGE_NAMESPACE: &str = "plugin";

/// Plugin id reported on error events raised before a manifest could be read
pub const UNKNOWN_PLUGIN_ID: &str = "unknown";

/// Activation event that matches every plugin
pub const ACTIVATE_ON_ANY: &str = "*";

/// Activation event fired once the host finished starting
pub const STARTUP_FINISHED_EVENT: &str = "onStartupFinished";

/// Symbol exported by native plugin libraries
pub const NATIVE_INIT_SYMBOL: &[u8] = b"_conduit_module_init\0";

/// File extension of static module descriptors
pub const STATIC_MODULE_EXTENSION: &str = "module";

/// Maximum length of a plugin id
pub const MAX_PLUGIN_ID_LEN: usize = 100;
