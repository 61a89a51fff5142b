//! Native plugin modules loaded from shared libraries.
//!
//! A native plugin exports `_conduit_module_init`, which returns a heap
//! allocated [`ModuleVTable`]. The host owns that vtable until it calls
//! `destroy`, after which the library is unloaded. Every call across the
//! boundary runs under `catch_unwind`.
use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libloading::{Library, Symbol};
use log::{debug, warn};

use crate::kernel::constants;
use crate::plugin_system::context::PluginContext;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::module::{panic_message, ModuleExports, ModuleResult, PluginModule};
use crate::plugin_system::resolver::{ModuleRequest, ModuleResolver};

/// Version of the vtable layout below
pub const ABI_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiResult {
    Ok = 0,
    Err = 1,
    NullPointer = 2,
    Utf8Error = 3,
}

/// Signature of `_conduit_module_init`
pub type ModuleInitFn = unsafe extern "C-unwind" fn() -> *mut ModuleVTable;

#[repr(C)]
pub struct ModuleVTable {
    /// Opaque plugin state passed back into every call
    pub instance: *mut c_void,
    pub abi_version: u32,
    /// JSON encoded [`ModuleExports`]; released with `free_string`
    pub exports_json: extern "C-unwind" fn(instance: *const c_void) -> *mut c_char,
    pub free_string: extern "C-unwind" fn(ptr: *mut c_char),
    pub activate: Option<extern "C-unwind" fn(instance: *mut c_void, plugin_id: *const c_char) -> FfiResult>,
    pub deactivate: Option<extern "C-unwind" fn(instance: *mut c_void) -> FfiResult>,
    /// Frees `instance` and the vtable itself
    pub destroy: extern "C-unwind" fn(vtable: *mut ModuleVTable),
}

/// Safely converts an FFI C string pointer to a Rust String.
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for the duration of the call.
unsafe fn ffi_string_from_ptr(ptr: *const c_char) -> Result<String, FfiResult> {
    if ptr.is_null() {
        return Err(FfiResult::NullPointer);
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(|s| s.to_owned())
        .map_err(|_| FfiResult::Utf8Error)
}

fn ffi_error(plugin_id: &str, operation: &str, message: impl Into<String>) -> PluginSystemError {
    PluginSystemError::FfiError {
        plugin_id: plugin_id.to_string(),
        operation: operation.to_string(),
        message: message.into(),
    }
}

#[derive(Debug, Clone, Copy)]
struct UnsafeVTablePtr(*mut ModuleVTable);
// The vtable is only reached through `&NativeModule`, and plugins promise
// their entry points are thread safe.
unsafe impl Send for UnsafeVTablePtr {}
unsafe impl Sync for UnsafeVTablePtr {}

/// A module backed by a loaded shared library
#[derive(Debug)]
pub struct NativeModule {
    plugin_id: String,
    vtable: UnsafeVTablePtr,
    exports: ModuleExports,
    library: Option<Library>,
}

impl NativeModule {
    /// # Safety
    /// `vtable_ptr` must come from the init symbol of `library`.
    unsafe fn new(
        plugin_id: &str,
        vtable_ptr: *mut ModuleVTable,
        library: Library,
    ) -> Result<Self, PluginSystemError> {
        let vtable = unsafe { &*vtable_ptr };
        if vtable.abi_version != ABI_VERSION {
            let found = vtable.abi_version;
            (vtable.destroy)(vtable_ptr);
            drop(library);
            return Err(ffi_error(
                plugin_id,
                "init",
                format!("unsupported module ABI version {} (expected {})", found, ABI_VERSION),
            ));
        }

        let instance = vtable.instance as *const c_void;
        let exports_fn = vtable.exports_json;
        let free_fn = vtable.free_string;
        let raw = panic::catch_unwind(move || {
            let ptr = exports_fn(instance);
            let decoded = unsafe { ffi_string_from_ptr(ptr) };
            if !ptr.is_null() {
                free_fn(ptr);
            }
            decoded
        });

        let decoded = match raw {
            Ok(Ok(json)) => serde_json::from_str::<ModuleExports>(&json)
                .map_err(|e| ffi_error(plugin_id, "exports", format!("invalid exports JSON: {}", e))),
            Ok(Err(code)) => Err(ffi_error(plugin_id, "exports", format!("{:?}", code))),
            Err(payload) => Err(ffi_error(
                plugin_id,
                "exports",
                format!("panic: {}", panic_message(payload.as_ref())),
            )),
        };

        let mut module = Self {
            plugin_id: plugin_id.to_string(),
            vtable: UnsafeVTablePtr(vtable_ptr),
            exports: ModuleExports::default(),
            library: Some(library),
        };
        // On error `module` drops here, which destroys the vtable.
        let mut exports = decoded?;
        // Flags must agree with the entry points actually present.
        exports.activate = exports.activate && vtable.activate.is_some();
        exports.deactivate = exports.deactivate && vtable.deactivate.is_some();
        module.exports = exports;
        Ok(module)
    }

    fn call(&self, operation: &str, f: impl FnOnce(&ModuleVTable) -> FfiResult) -> ModuleResult {
        let vtable_ptr = self.vtable.0;
        let result = panic::catch_unwind(AssertUnwindSafe(move || {
            let vtable = unsafe { &*vtable_ptr };
            f(vtable)
        }));
        match result {
            Ok(FfiResult::Ok) => Ok(()),
            Ok(code) => Err(ffi_error(&self.plugin_id, operation, format!("{:?}", code)).into()),
            Err(payload) => Err(ffi_error(
                &self.plugin_id,
                operation,
                format!("panic: {}", panic_message(payload.as_ref())),
            )
            .into()),
        }
    }
}

#[async_trait]
impl PluginModule for NativeModule {
    fn exports(&self) -> ModuleExports {
        self.exports.clone()
    }

    async fn activate(&self, context: Arc<PluginContext>) -> ModuleResult {
        let plugin_id = CString::new(context.plugin_id())?;
        self.call("activate", |vtable| match vtable.activate {
            Some(activate) => activate(vtable.instance, plugin_id.as_ptr()),
            None => FfiResult::Ok,
        })
    }

    async fn deactivate(&self) -> ModuleResult {
        self.call("deactivate", |vtable| match vtable.deactivate {
            Some(deactivate) => deactivate(vtable.instance),
            None => FfiResult::Ok,
        })
    }
}

impl Drop for NativeModule {
    fn drop(&mut self) {
        let vtable_ptr = self.vtable.0;
        if !vtable_ptr.is_null() {
            let destroyed = panic::catch_unwind(move || {
                let destroy = unsafe { (*vtable_ptr).destroy };
                destroy(vtable_ptr);
            });
            if destroyed.is_err() {
                warn!("Native module of '{}' panicked while being destroyed", self.plugin_id);
            }
        }
        // The library must outlive every call into it.
        if let Some(library) = self.library.take() {
            drop(library);
        }
    }
}

/// Resolves shared libraries (`.so`, `.dylib`, `.dll`) through `libloading`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeModuleResolver;

impl NativeModuleResolver {
    pub fn new() -> Self {
        Self
    }

    fn load_sync(plugin_id: &str, path: &Path) -> Result<NativeModule, PluginSystemError> {
        let library = unsafe { Library::new(path) }
            .map_err(|e| PluginSystemError::module_load(plugin_id, path, e))?;

        let init: ModuleInitFn = {
            let symbol: Symbol<ModuleInitFn> = unsafe { library.get(constants::NATIVE_INIT_SYMBOL) }
                .map_err(|e| PluginSystemError::module_load(plugin_id, path, e))?;
            *symbol
        };

        let vtable_ptr = match panic::catch_unwind(|| unsafe { init() }) {
            Ok(ptr) if ptr.is_null() => {
                return Err(PluginSystemError::module_load(
                    plugin_id,
                    path,
                    "module init returned a null vtable".to_string(),
                ));
            }
            Ok(ptr) => ptr,
            Err(payload) => {
                return Err(ffi_error(
                    plugin_id,
                    "init",
                    format!("panic: {}", panic_message(payload.as_ref())),
                ));
            }
        };

        debug!("Loaded native module for '{}' from {}", plugin_id, path.display());
        unsafe { NativeModule::new(plugin_id, vtable_ptr, library) }
    }
}

#[async_trait]
impl ModuleResolver for NativeModuleResolver {
    fn name(&self) -> &'static str {
        "native"
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec![std::env::consts::DLL_EXTENSION]
    }

    async fn resolve(&self, request: &ModuleRequest) -> Result<Arc<dyn PluginModule>, PluginSystemError> {
        let plugin_id = request.plugin_id.clone();
        let entry = request.entry.clone();
        let module = tokio::task::spawn_blocking(move || Self::load_sync(&plugin_id, &entry))
            .await
            .map_err(|e| ffi_error(&request.plugin_id, "init", e.to_string()))??;
        Ok(Arc::new(module))
    }
}
