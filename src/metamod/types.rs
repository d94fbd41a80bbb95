//! Metamod SDK FFI type definitions.
//!
//! These types are based on the Metamod-P SDK headers:
//! - meta_api.h
//! - plinfo.h
//! - mutil.h

use std::ffi::{c_char, c_int, c_void};

use super::tables::{DllFunctions, Edict, EngineFuncs, EntityVars, NewDllFunctions};

/// Metamod interface version, compared verbatim in `Meta_Query`.
pub const META_INTERFACE_VERSION: &str = "5:13";

// =============================================================================
// Metamod Plugin Info
// =============================================================================

/// When the plugin can be loaded or unloaded.
///
/// Order matters: Metamod compares these with `<` and `>`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PluginLoadTime {
    Never = 0,
    /// Only at initial HLDS execution
    Startup = 1,
    /// Between maps
    ChangeLevel = 2,
    /// At any time
    AnyTime = 3,
    /// At any time, and can be paused during a map
    AnyPause = 4,
}

/// Reasons for unloading the plugin
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginUnloadReason {
    Null = 0,
    IniDeleted = 1,
    FileNewer = 2,
    Command = 3,
    CommandForced = 4,
    Delayed = 5,
    Plugin = 6,
    PluginForced = 7,
    Reload = 8,
}

/// Plugin information structure returned by Meta_Query
#[repr(C)]
pub struct PluginInfo {
    /// Interface version string (e.g., "5:13")
    pub ifvers: *const c_char,
    /// Plugin name
    pub name: *const c_char,
    /// Plugin version
    pub version: *const c_char,
    /// Build date
    pub date: *const c_char,
    /// Author name
    pub author: *const c_char,
    /// URL
    pub url: *const c_char,
    /// Log tag for messages
    pub logtag: *const c_char,
    /// When plugin can be loaded
    pub loadable: PluginLoadTime,
    /// When plugin can be unloaded
    pub unloadable: PluginLoadTime,
}

// SAFETY: PluginInfo contains only static string pointers
unsafe impl Sync for PluginInfo {}
unsafe impl Send for PluginInfo {}

// =============================================================================
// Meta Result Codes
// =============================================================================

/// Result codes for hook functions.
///
/// The ordering is part of the protocol: a higher code dominates a lower one.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetaResult {
    #[default]
    Unset = 0,
    /// Plugin didn't take any action
    Ignored = 1,
    /// Plugin did something, but the real function should still be called
    Handled = 2,
    /// Call the real function, but use my return value
    Override = 3,
    /// Skip the real function; use my return value
    Supercede = 4,
}

/// Status returned from the plugin entry points
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaStatus {
    Failed = 0,
    Ok = 1,
}

impl From<bool> for MetaStatus {
    fn from(ok: bool) -> Self {
        if ok {
            Self::Ok
        } else {
            Self::Failed
        }
    }
}

// =============================================================================
// Meta Globals
// =============================================================================

/// Global variables passed to plugin by Metamod
#[repr(C)]
pub struct MetaGlobals {
    /// Writable; result of the running hook
    pub mres: MetaResult,
    /// Result of the previous plugin called
    pub prev_mres: MetaResult,
    /// Highest result so far
    pub status: MetaResult,
    /// Return value of the real function
    pub orig_ret: *mut c_void,
    /// Return value of the overriding/superceding plugin
    pub override_ret: *mut c_void,
}

// =============================================================================
// Meta Functions Table
// =============================================================================

/// Function pointer types for Meta functions table
pub type GetEntityApiFn = unsafe extern "C" fn(*mut DllFunctions, c_int) -> c_int;
pub type GetEntityApi2Fn = unsafe extern "C" fn(*mut DllFunctions, *mut c_int) -> c_int;
pub type GetNewDllFunctionsFn = unsafe extern "C" fn(*mut NewDllFunctions, *mut c_int) -> c_int;
pub type GetEngineFunctionsFn = unsafe extern "C" fn(*mut EngineFuncs, *mut c_int) -> c_int;

/// Table of hook exporters the plugin fills in at attach
#[repr(C)]
pub struct MetaFunctions {
    pub pfn_get_entity_api: Option<GetEntityApiFn>,
    pub pfn_get_entity_api_post: Option<GetEntityApiFn>,
    pub pfn_get_entity_api2: Option<GetEntityApi2Fn>,
    pub pfn_get_entity_api2_post: Option<GetEntityApi2Fn>,
    pub pfn_get_new_dll_functions: Option<GetNewDllFunctionsFn>,
    pub pfn_get_new_dll_functions_post: Option<GetNewDllFunctionsFn>,
    pub pfn_get_engine_functions: Option<GetEngineFunctionsFn>,
    pub pfn_get_engine_functions_post: Option<GetEngineFunctionsFn>,
}

impl MetaFunctions {
    /// Clear every exporter slot.
    pub fn clear(&mut self) {
        self.pfn_get_entity_api = None;
        self.pfn_get_entity_api_post = None;
        self.pfn_get_entity_api2 = None;
        self.pfn_get_entity_api2_post = None;
        self.pfn_get_new_dll_functions = None;
        self.pfn_get_new_dll_functions_post = None;
        self.pfn_get_engine_functions = None;
        self.pfn_get_engine_functions_post = None;
    }
}

// =============================================================================
// Meta Utility Functions
// =============================================================================

/// Tags for `pfn_get_game_info`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameInfo {
    Name = 0,
    Description = 1,
    Directory = 2,
    DllFullPath = 3,
    DllFileName = 4,
    RealDllFullPath = 5,
}

/// Alert levels for the engine `pfn_alert_message`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertType {
    Notice = 0,
    Console = 1,
    AiConsole = 2,
    Warning = 3,
    Error = 4,
    Logged = 5,
}

/// Text parameters for a HUD center message (`hudtextparms_t`)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HudTextParams {
    pub x: f32,
    pub y: f32,
    pub effect: c_int,
    pub r1: u8,
    pub g1: u8,
    pub b1: u8,
    pub a1: u8,
    pub r2: u8,
    pub g2: u8,
    pub b2: u8,
    pub a2: u8,
    pub fade_in_time: f32,
    pub fade_out_time: f32,
    pub hold_time: f32,
    pub fx_time: f32,
    pub channel: c_int,
}

/// Utility functions provided by Metamod
#[repr(C)]
#[derive(Default)]
pub struct MetaUtilFuncs {
    pub pfn_log_console: Option<unsafe extern "C" fn(*const PluginInfo, *const c_char, ...)>,
    pub pfn_log_message: Option<unsafe extern "C" fn(*const PluginInfo, *const c_char, ...)>,
    pub pfn_log_error: Option<unsafe extern "C" fn(*const PluginInfo, *const c_char, ...)>,
    pub pfn_log_developer: Option<unsafe extern "C" fn(*const PluginInfo, *const c_char, ...)>,
    pub pfn_center_say: Option<unsafe extern "C" fn(*const PluginInfo, *const c_char, ...)>,
    pub pfn_center_say_parms: Option<unsafe extern "C" fn(*const PluginInfo, HudTextParams, *const c_char, ...)>,
    /// The last argument is the platform `va_list`, left untyped
    pub pfn_center_say_varargs: Option<unsafe extern "C" fn(*const PluginInfo, HudTextParams, *const c_char, *mut c_void)>,
    pub pfn_call_game_entity: Option<unsafe extern "C" fn(*const PluginInfo, *const c_char, *mut EntityVars) -> c_int>,
    pub pfn_get_user_msg_id: Option<unsafe extern "C" fn(*const PluginInfo, *const c_char, *mut c_int) -> c_int>,
    pub pfn_get_user_msg_name: Option<unsafe extern "C" fn(*const PluginInfo, c_int, *mut c_int) -> *const c_char>,
    pub pfn_get_plugin_path: Option<unsafe extern "C" fn(*const PluginInfo) -> *const c_char>,
    pub pfn_get_game_info: Option<unsafe extern "C" fn(*const PluginInfo, GameInfo) -> *const c_char>,
    pub pfn_load_plugin: Option<unsafe extern "C" fn(*const PluginInfo, *const c_char, PluginLoadTime, *mut *mut c_void) -> c_int>,
    pub pfn_unload_plugin: Option<unsafe extern "C" fn(*const PluginInfo, *const c_char, PluginLoadTime, PluginUnloadReason) -> c_int>,
    pub pfn_unload_plugin_by_handle: Option<unsafe extern "C" fn(*const PluginInfo, *mut c_void, PluginLoadTime, PluginUnloadReason) -> c_int>,
    pub pfn_is_querying_client_cvar: Option<unsafe extern "C" fn(*const PluginInfo, *const Edict) -> *const c_char>,
    pub pfn_make_request_id: Option<unsafe extern "C" fn(*const PluginInfo) -> c_int>,
    pub pfn_get_hook_tables: Option<unsafe extern "C" fn(*const PluginInfo, *mut *mut EngineFuncs, *mut *mut DllFunctions, *mut *mut NewDllFunctions)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_hud_text_params_layout() {
        assert_eq!(size_of::<HudTextParams>(), 40);
    }

    #[test]
    fn test_util_funcs_layout() {
        assert_eq!(size_of::<MetaUtilFuncs>(), 18 * size_of::<usize>());
        assert!(MetaUtilFuncs::default().pfn_get_hook_tables.is_none());
    }

    #[test]
    fn test_status_from_bool() {
        assert_eq!(MetaStatus::from(true) as c_int, 1);
        assert_eq!(MetaStatus::from(false) as c_int, 0);
    }
}
