//! Metamod plugin exported functions.
//!
//! These are the C functions that Metamod expects to find in the plugin DLL.
//! The `#[no_mangle]` symbols are emitted into the plugin crate by
//! [`metamod_plugin!`](crate::metamod_plugin); the bodies live here.

use std::any::Any;
use std::ffi::{c_char, c_int, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use parking_lot::Mutex;

use super::tables::{EngineFuncs, GameDllFuncs, GlobalVars};
use super::types::*;
use crate::config::{self, PluginConfig};
use crate::error::PluginError;
use crate::hooks::{self, HOOKS};
use crate::host::{self, HOST};
use crate::logging;
use crate::plugin::MetaPlugin;
use crate::result;

const OK: c_int = MetaStatus::Ok as c_int;
const FAILED: c_int = MetaStatus::Failed as c_int;

// =============================================================================
// Panic guard
// =============================================================================

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Run a plugin callback without letting a panic unwind into the engine.
fn guarded<T>(what: &str, fallback: T, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            tracing::error!("Panic in {what}: {}", panic_message(payload.as_ref()));
            fallback
        }
    }
}

// =============================================================================
// Entry points
// =============================================================================

/// Body of `GiveFnptrsToDll`.
///
/// # Safety
/// Called by the engine with valid pointers.
pub unsafe fn give_fnptrs_to_dll(engine_funcs: *const EngineFuncs, global_vars: *mut GlobalVars) {
    if engine_funcs.is_null() {
        tracing::error!("GiveFnptrsToDll: engine functions are null");
    }

    HOST.write().set_engine_funcs(engine_funcs, global_vars);
    tracing::debug!("Engine functions received");
}

/// Body of `Meta_Init`.
pub fn meta_init<P: MetaPlugin>(plugin: &Mutex<P>, logtag: &str) {
    logging::init(logtag);
    guarded("Meta_Init", (), || plugin.lock().on_init());
}

/// Body of `Meta_Query`.
///
/// # Safety
/// Called by Metamod with valid or null pointers.
pub unsafe fn meta_query<P: MetaPlugin>(
    plugin: &Mutex<P>,
    info: &'static PluginInfo,
    interface_version: *const c_char,
    plugin_info: *mut *const PluginInfo,
    meta_util_funcs: *const MetaUtilFuncs,
) -> c_int {
    let requested = (!interface_version.is_null()).then(|| CStr::from_ptr(interface_version).to_string_lossy());

    if requested.as_deref() != Some(META_INTERFACE_VERSION) {
        tracing::error!(
            "Meta_Query: interface version mismatch; requested = {}; ours = {META_INTERFACE_VERSION}",
            requested.as_deref().unwrap_or("<null>")
        );
        HOOKS.lock().release_all();
        return FAILED;
    }

    if plugin_info.is_null() {
        tracing::error!("Meta_Query: plugin_info is null");
        return FAILED;
    }

    // Return our plugin info
    *plugin_info = info;

    // Store utility functions for logging
    HOST.write().set_meta_util_funcs(meta_util_funcs, info);

    guarded("Meta_Query", (), || plugin.lock().on_query());
    OK
}

/// Fill the exporter table Metamod calls after a successful attach.
fn install_exporters(functions: &mut MetaFunctions) {
    functions.pfn_get_entity_api = None;
    functions.pfn_get_entity_api_post = None;
    functions.pfn_get_entity_api2 = Some(hooks::export_dll_hooks);
    functions.pfn_get_entity_api2_post = Some(hooks::export_dll_post_hooks);
    functions.pfn_get_new_dll_functions = Some(hooks::export_dll_new_hooks);
    functions.pfn_get_new_dll_functions_post = Some(hooks::export_dll_new_post_hooks);
    functions.pfn_get_engine_functions = Some(hooks::export_engine_hooks);
    functions.pfn_get_engine_functions_post = Some(hooks::export_engine_post_hooks);
}

/// Config next to the plugin library, or the defaults.
fn load_config(logtag: &str) -> PluginConfig {
    match host::plugin_path() {
        Some(path) => PluginConfig::load_or_default(&config::config_path(&path, logtag)),
        None => PluginConfig::default(),
    }
}

/// Body of `Meta_Attach`.
///
/// # Safety
/// Called by Metamod with valid or null pointers.
pub unsafe fn meta_attach<P: MetaPlugin>(
    plugin: &Mutex<P>,
    logtag: &str,
    now: PluginLoadTime,
    function_table: *mut MetaFunctions,
    meta_globals: *mut MetaGlobals,
    gamedll_funcs: *const GameDllFuncs,
) -> c_int {
    let Some(functions) = function_table.as_mut() else {
        tracing::error!("Meta_Attach: function table is null");
        return FAILED;
    };

    result::set_globals(meta_globals);
    HOOKS.lock().allocate_all();
    install_exporters(functions);
    HOST.write().set_gamedll_funcs(gamedll_funcs);

    let config = load_config(logtag);
    logging::apply(&config);

    let attached: Result<(), PluginError> = guarded("Meta_Attach", Err("plugin panicked".into()), || {
        plugin.lock().on_attach(now)
    });

    match attached {
        Ok(()) => {
            tracing::info!("Attached ({now:?})");
            OK
        }
        Err(e) => {
            tracing::error!("Attach refused: {e}");
            HOOKS.lock().release_all();
            functions.clear();
            FAILED
        }
    }
}

/// Body of `Meta_Detach`.
pub fn meta_detach<P: MetaPlugin>(plugin: &Mutex<P>, now: PluginLoadTime, reason: PluginUnloadReason) -> c_int {
    guarded("Meta_Detach", (), || plugin.lock().on_detach(now, reason));

    HOOKS.lock().clear_all();
    HOST.write().detach();
    result::set_globals(ptr::null_mut());

    tracing::info!("Detached ({reason:?})");
    OK
}

// =============================================================================
// Export macro
// =============================================================================

/// Export a [`MetaPlugin`] type as a Metamod plugin.
///
/// Emits the static `PLUGIN_INFO` and the `GiveFnptrsToDll`, `Meta_Init`,
/// `Meta_Query`, `Meta_Attach` and `Meta_Detach` symbols. Use it once, in a
/// `cdylib` crate.
///
/// ```ignore
/// metamod_hooks::metamod_plugin! {
///     plugin: Counter,
///     name: "Connect Counter",
///     version: "1.0.0",
///     date: "2026",
///     author: "someone",
///     url: "https://example.invalid",
///     logtag: "COUNTER",
///     loadable: AnyTime,
///     unloadable: AnyPause,
/// }
/// ```
#[macro_export]
macro_rules! metamod_plugin {
    (
        plugin: $plugin:ty,
        name: $name:literal,
        version: $version:literal,
        date: $date:literal,
        author: $author:literal,
        url: $url:literal,
        logtag: $logtag:literal,
        loadable: $loadable:ident,
        unloadable: $unloadable:ident $(,)?
    ) => {
        static __METAMOD_PLUGIN: $crate::__private::Lazy<$crate::__private::Mutex<$plugin>> =
            $crate::__private::Lazy::new(|| $crate::__private::Mutex::new(<$plugin as ::std::default::Default>::default()));

        /// Static plugin information - must remain valid for the plugin's lifetime
        #[no_mangle]
        pub static PLUGIN_INFO: $crate::metamod::types::PluginInfo = $crate::metamod::types::PluginInfo {
            ifvers: b"5:13\0".as_ptr().cast(),
            name: concat!($name, "\0").as_ptr().cast(),
            version: concat!($version, "\0").as_ptr().cast(),
            date: concat!($date, "\0").as_ptr().cast(),
            author: concat!($author, "\0").as_ptr().cast(),
            url: concat!($url, "\0").as_ptr().cast(),
            logtag: concat!($logtag, "\0").as_ptr().cast(),
            loadable: $crate::metamod::types::PluginLoadTime::$loadable,
            unloadable: $crate::metamod::types::PluginLoadTime::$unloadable,
        };

        /// Provide engine function pointers to the plugin.
        ///
        /// # Safety
        /// Called by the engine with valid pointers.
        #[no_mangle]
        pub unsafe extern "system" fn GiveFnptrsToDll(
            engine_funcs: *const $crate::metamod::tables::EngineFuncs,
            global_vars: *mut $crate::metamod::tables::GlobalVars,
        ) {
            $crate::metamod::exports::give_fnptrs_to_dll(engine_funcs, global_vars);
        }

        /// Called before GiveFnptrsToDll to identify this as a Metamod plugin.
        #[no_mangle]
        pub extern "C" fn Meta_Init() {
            $crate::metamod::exports::meta_init(&__METAMOD_PLUGIN, $logtag);
        }

        /// Query plugin information.
        ///
        /// # Safety
        /// Called by Metamod with valid pointers.
        #[no_mangle]
        pub unsafe extern "C" fn Meta_Query(
            interface_version: *const ::std::ffi::c_char,
            plugin_info: *mut *const $crate::metamod::types::PluginInfo,
            meta_util_funcs: *const $crate::metamod::types::MetaUtilFuncs,
        ) -> ::std::ffi::c_int {
            $crate::metamod::exports::meta_query(
                &__METAMOD_PLUGIN,
                &PLUGIN_INFO,
                interface_version,
                plugin_info,
                meta_util_funcs,
            )
        }

        /// Attach plugin to Metamod.
        ///
        /// # Safety
        /// Called by Metamod with valid pointers.
        #[no_mangle]
        pub unsafe extern "C" fn Meta_Attach(
            now: $crate::metamod::types::PluginLoadTime,
            function_table: *mut $crate::metamod::types::MetaFunctions,
            meta_globals: *mut $crate::metamod::types::MetaGlobals,
            gamedll_funcs: *const $crate::metamod::tables::GameDllFuncs,
        ) -> ::std::ffi::c_int {
            $crate::metamod::exports::meta_attach(
                &__METAMOD_PLUGIN,
                $logtag,
                now,
                function_table,
                meta_globals,
                gamedll_funcs,
            )
        }

        /// Detach plugin from Metamod.
        #[no_mangle]
        pub extern "C" fn Meta_Detach(
            now: $crate::metamod::types::PluginLoadTime,
            reason: $crate::metamod::types::PluginUnloadReason,
        ) -> ::std::ffi::c_int {
            $crate::metamod::exports::meta_detach(&__METAMOD_PLUGIN, now, reason)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::PROCESS_STATE;

    #[derive(Default)]
    struct Refusing;

    impl MetaPlugin for Refusing {
        fn on_attach(&mut self, _now: PluginLoadTime) -> Result<(), PluginError> {
            Err("not today".into())
        }
    }

    #[derive(Default)]
    struct Panicking;

    impl MetaPlugin for Panicking {
        fn on_query(&mut self) {
            panic!("boom");
        }
    }

    static INFO: PluginInfo = PluginInfo {
        ifvers: b"5:13\0".as_ptr().cast(),
        name: b"Test\0".as_ptr().cast(),
        version: b"0\0".as_ptr().cast(),
        date: b"2026\0".as_ptr().cast(),
        author: b"test\0".as_ptr().cast(),
        url: b"\0".as_ptr().cast(),
        logtag: b"TEST\0".as_ptr().cast(),
        loadable: PluginLoadTime::AnyTime,
        unloadable: PluginLoadTime::AnyPause,
    };

    fn empty_functions() -> MetaFunctions {
        MetaFunctions {
            pfn_get_entity_api: None,
            pfn_get_entity_api_post: None,
            pfn_get_entity_api2: None,
            pfn_get_entity_api2_post: None,
            pfn_get_new_dll_functions: None,
            pfn_get_new_dll_functions_post: None,
            pfn_get_engine_functions: None,
            pfn_get_engine_functions_post: None,
        }
    }

    #[test]
    fn test_query_rejects_other_interface() {
        // entry points write HOOKS, HOST and the meta globals
        let _state = PROCESS_STATE.lock();

        let plugin = Mutex::new(Refusing);
        let mut out: *const PluginInfo = ptr::null();

        let status = unsafe { meta_query(&plugin, &INFO, c"5:12".as_ptr(), &raw mut out, ptr::null()) };
        assert_eq!(status, FAILED);
        assert!(out.is_null());

        let status = unsafe { meta_query(&plugin, &INFO, ptr::null(), &raw mut out, ptr::null()) };
        assert_eq!(status, FAILED);
    }

    #[test]
    fn test_query_survives_plugin_panic() {
        let _state = PROCESS_STATE.lock();

        let plugin = Mutex::new(Panicking);
        let mut out: *const PluginInfo = ptr::null();

        let status = unsafe { meta_query(&plugin, &INFO, c"5:13".as_ptr(), &raw mut out, ptr::null()) };
        assert_eq!(status, OK);
        assert!(ptr::eq(out, &INFO));
    }

    #[test]
    fn test_install_exporters() {
        let mut functions = empty_functions();
        install_exporters(&mut functions);

        assert!(functions.pfn_get_entity_api.is_none());
        assert!(functions.pfn_get_entity_api_post.is_none());
        assert!(functions.pfn_get_entity_api2.is_some());
        assert!(functions.pfn_get_engine_functions_post.is_some());

        functions.clear();
        assert!(functions.pfn_get_entity_api2.is_none());
        assert!(functions.pfn_get_new_dll_functions.is_none());
    }

    #[test]
    fn test_attach_refused_clears_exporters() {
        let _state = PROCESS_STATE.lock();

        let plugin = Mutex::new(Refusing);
        let mut functions = empty_functions();

        let status = unsafe {
            meta_attach(
                &plugin,
                "TEST",
                PluginLoadTime::AnyTime,
                &raw mut functions,
                ptr::null_mut(),
                ptr::null(),
            )
        };

        assert_eq!(status, FAILED);
        assert!(functions.pfn_get_entity_api2.is_none());
        assert!(functions.pfn_get_engine_functions.is_none());
    }

    #[test]
    fn test_attach_null_table() {
        let plugin = Mutex::new(Refusing);
        let status = unsafe {
            meta_attach(
                &plugin,
                "TEST",
                PluginLoadTime::AnyTime,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null(),
            )
        };
        assert_eq!(status, FAILED);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("bad"));
        assert_eq!(panic_message(payload.as_ref()), "bad");

        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
