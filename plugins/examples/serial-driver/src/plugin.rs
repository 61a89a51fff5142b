//! Example native plugin contributing a `serial` driver.
//!
//! `plugin.json` declares no `main`: install the built library next to it
//! as `plugin.<ext>` (`plugin.so`, `plugin.dylib` or `plugin.dll`) and the
//! host's default entry lookup finds it on every platform.
use std::ffi::{c_char, c_void, CStr, CString};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use conduit_core::plugin_system::extension_point::ExtensionPoint;
use conduit_core::plugin_system::ffi::{FfiResult, ModuleVTable, ABI_VERSION};
use conduit_core::plugin_system::module::ModuleExports;

/// Example native plugin exporting a `serial` driver.
#[derive(Debug, Default)]
struct SerialDriverPlugin {
    active: AtomicBool,
    // Plugin id the host activated us under
    owner: Mutex<Option<String>>,
}

impl SerialDriverPlugin {
    fn exports(&self) -> ModuleExports {
        ModuleExports::new()
            .with_collection(ExtensionPoint::CommunicationDrivers, ["serial"])
            .with_activate()
            .with_deactivate()
    }

    fn activate(&self, plugin_id: String) -> FfiResult {
        if self.active.swap(true, Ordering::SeqCst) {
            return FfiResult::Err;
        }
        log::info!("serial driver activated for '{}'", plugin_id);
        *self.owner.lock().unwrap_or_else(|p| p.into_inner()) = Some(plugin_id);
        FfiResult::Ok
    }

    fn deactivate(&self) -> FfiResult {
        if !self.active.swap(false, Ordering::SeqCst) {
            return FfiResult::Err;
        }
        if let Some(id) = self.owner.lock().unwrap_or_else(|p| p.into_inner()).take() {
            log::info!("serial driver released by '{}'", id);
        }
        FfiResult::Ok
    }
}

// --- VTable functions ---

extern "C-unwind" fn ffi_exports_json(instance: *const c_void) -> *mut c_char {
    if instance.is_null() {
        return ptr::null_mut();
    }
    let plugin = unsafe { &*(instance as *const SerialDriverPlugin) };
    serde_json::to_string(&plugin.exports())
        .ok()
        .and_then(|json| CString::new(json).ok())
        .map_or(ptr::null_mut(), CString::into_raw)
}

extern "C-unwind" fn ffi_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        // Retake ownership of a string produced by `ffi_exports_json`
        let _ = unsafe { CString::from_raw(ptr) };
    }
}

extern "C-unwind" fn ffi_activate(instance: *mut c_void, plugin_id: *const c_char) -> FfiResult {
    if instance.is_null() || plugin_id.is_null() {
        return FfiResult::NullPointer;
    }
    let plugin = unsafe { &*(instance as *const SerialDriverPlugin) };
    match unsafe { CStr::from_ptr(plugin_id) }.to_str() {
        Ok(id) => plugin.activate(id.to_owned()),
        Err(_) => FfiResult::Utf8Error,
    }
}

extern "C-unwind" fn ffi_deactivate(instance: *mut c_void) -> FfiResult {
    if instance.is_null() {
        return FfiResult::NullPointer;
    }
    let plugin = unsafe { &*(instance as *const SerialDriverPlugin) };
    plugin.deactivate()
}

extern "C-unwind" fn ffi_destroy(vtable: *mut ModuleVTable) {
    if vtable.is_null() {
        return;
    }
    let vtable = unsafe { Box::from_raw(vtable) };
    if !vtable.instance.is_null() {
        let _ = unsafe { Box::from_raw(vtable.instance as *mut SerialDriverPlugin) };
    }
}

/// Entry point looked up by the host's native module resolver.
#[no_mangle]
pub extern "C-unwind" fn _conduit_module_init() -> *mut ModuleVTable {
    let instance = Box::into_raw(Box::new(SerialDriverPlugin::default())) as *mut c_void;
    Box::into_raw(Box::new(ModuleVTable {
        instance,
        abi_version: ABI_VERSION,
        exports_json: ffi_exports_json,
        free_string: ffi_free_string,
        activate: Some(ffi_activate),
        deactivate: Some(ffi_deactivate),
        destroy: ffi_destroy,
    }))
}

#[cfg(test)]
mod tests;
