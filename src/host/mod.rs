//! Host state.
//!
//! Keeps what the engine and Metamod hand over during loading: a copy of
//! the engine function table, the global variables, Metamod's utility
//! functions and the game DLL tables (the real functions behind every hook).

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::PathBuf;
use std::ptr;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::UtilError;
use crate::metamod::tables::{
    DllFunctions, Edict, EngineFuncs, EntityVars, GameDllFuncs, GlobalVars, NewDllFunctions,
};
use crate::metamod::types::{
    AlertType, GameInfo, HudTextParams, MetaUtilFuncs, PluginInfo, PluginLoadTime, PluginUnloadReason,
};

/// Global host state
pub static HOST: Lazy<RwLock<Host>> = Lazy::new(|| RwLock::new(Host::new()));

/// Pointers and tables received from the engine and Metamod
pub struct Host {
    /// Engine functions, copied in GiveFnptrsToDll
    engine: Option<EngineFuncs>,
    /// Engine global variables
    global_vars: *mut GlobalVars,
    /// Metamod utility functions
    util_funcs: *const MetaUtilFuncs,
    /// Our plugin info, as published to Metamod
    plugin_info: *const PluginInfo,
    /// Game DLL functions, copied at attach
    dll: Option<DllFunctions>,
    /// New game DLL functions, copied at attach
    dll_new: Option<NewDllFunctions>,
}

// SAFETY: Host is only accessed through a RwLock, and the pointers it holds
// are owned by the engine for the lifetime of the plugin.
unsafe impl Send for Host {}
unsafe impl Sync for Host {}

impl Host {
    /// Create an empty host state.
    pub const fn new() -> Self {
        Self {
            engine: None,
            global_vars: ptr::null_mut(),
            util_funcs: ptr::null(),
            plugin_info: ptr::null(),
            dll: None,
            dll_new: None,
        }
    }

    /// Copy the engine table and keep the globals.
    ///
    /// # Safety
    /// `engine_funcs` must be null or point to a valid engine table.
    pub unsafe fn set_engine_funcs(&mut self, engine_funcs: *const EngineFuncs, global_vars: *mut GlobalVars) {
        self.engine = engine_funcs.as_ref().copied();
        self.global_vars = global_vars;
    }

    /// Keep Metamod's utility functions and our published plugin info.
    pub fn set_meta_util_funcs(&mut self, funcs: *const MetaUtilFuncs, info: *const PluginInfo) {
        self.util_funcs = funcs;
        self.plugin_info = info;
    }

    /// Copy the game DLL tables.
    ///
    /// # Safety
    /// `funcs` must be null or point to valid table pointers, each of which
    /// may be null.
    pub unsafe fn set_gamedll_funcs(&mut self, funcs: *const GameDllFuncs) {
        let Some(funcs) = funcs.as_ref() else {
            self.dll = None;
            self.dll_new = None;
            return;
        };

        self.dll = funcs.dllapi_table.as_ref().copied();
        self.dll_new = funcs.newapi_table.as_ref().copied();
    }

    /// Forget everything Metamod handed over at query and attach.
    pub fn detach(&mut self) {
        self.dll = None;
        self.dll_new = None;
        self.util_funcs = ptr::null();
    }

    /// Metamod's utility table, once `Meta_Query` supplied it.
    pub fn util(&self) -> Option<MetaUtil> {
        (!self.util_funcs.is_null()).then_some(MetaUtil {
            funcs: self.util_funcs,
            info: self.plugin_info,
        })
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a message to a C string, dropping interior NULs.
fn to_cstring(msg: &str) -> CString {
    CString::new(msg.replace('\0', "")).unwrap_or_default()
}

/// Copy a host string.
///
/// # Safety
/// `ptr` must be null or a valid NUL-terminated string.
unsafe fn from_host(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

// =============================================================================
// Tables
// =============================================================================

/// Run `f` with the engine functions.
pub fn with_engine<T>(f: impl FnOnce(&EngineFuncs) -> T) -> Option<T> {
    HOST.read().engine.as_ref().map(f)
}

/// Run `f` with the real game DLL functions.
pub fn with_dll<T>(f: impl FnOnce(&DllFunctions) -> T) -> Option<T> {
    HOST.read().dll.as_ref().map(f)
}

/// Run `f` with the real new game DLL functions.
pub fn with_dll_new<T>(f: impl FnOnce(&NewDllFunctions) -> T) -> Option<T> {
    HOST.read().dll_new.as_ref().map(f)
}

/// Engine global variables; null before GiveFnptrsToDll.
pub fn global_vars() -> *mut GlobalVars {
    HOST.read().global_vars
}

// =============================================================================
// Engine output
// =============================================================================

/// Print to the server console. Returns false if the engine is not there yet.
pub fn server_print(msg: &str) -> bool {
    let print = with_engine(|e| e.pfn_server_print).flatten();
    let Some(print) = print else {
        return false;
    };

    let c_msg = to_cstring(msg);
    // SAFETY: engine function with a valid C string
    unsafe { print(c_msg.as_ptr()) };
    true
}

/// Send a message through the engine's alert channel.
pub fn alert_message(level: AlertType, msg: &str) -> bool {
    let alert = with_engine(|e| e.pfn_alert_message).flatten();
    let Some(alert) = alert else {
        return false;
    };

    let c_msg = to_cstring(msg);
    // SAFETY: engine function; the message goes through "%s" so it is never
    // interpreted as a format string
    unsafe { alert(level as c_int, c"%s".as_ptr(), c_msg.as_ptr()) };
    true
}

// =============================================================================
// Metamod utilities
// =============================================================================

type LogFn = unsafe extern "C" fn(*const PluginInfo, *const c_char, ...);

/// Handle of a plugin loaded through [`MetaUtil::load_plugin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginHandle(*mut c_void);

impl PluginHandle {
    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }
}

/// Metamod's view of this plugin's exported hook tables.
#[derive(Debug, Clone, Copy)]
pub struct HookTablePtrs {
    pub engine: *mut EngineFuncs,
    pub dll: *mut DllFunctions,
    pub dll_new: *mut NewDllFunctions,
}

/// Metamod's utility table bound to our plugin info.
///
/// Taken out of [`HOST`] before calling, so a utility that re-enters the
/// plugin (unloading ourselves ends in `Meta_Detach`) never runs under the
/// host lock.
#[derive(Debug, Clone, Copy)]
pub struct MetaUtil {
    funcs: *const MetaUtilFuncs,
    info: *const PluginInfo,
}

fn check(func: &'static str, code: c_int) -> Result<(), UtilError> {
    match code {
        0 => Ok(()),
        code => Err(UtilError::Failed { func, code }),
    }
}

impl MetaUtil {
    fn funcs(&self) -> &MetaUtilFuncs {
        // SAFETY: only built from a non-null table in Host::util; Metamod
        // keeps it alive while we are loaded
        unsafe { &*self.funcs }
    }

    fn get<F>(&self, func: &'static str, pick: impl FnOnce(&MetaUtilFuncs) -> Option<F>) -> Result<F, UtilError> {
        pick(self.funcs()).ok_or(UtilError::Unavailable { func })
    }

    fn log_with(&self, pick: impl FnOnce(&MetaUtilFuncs) -> Option<LogFn>, msg: &str) -> bool {
        let Some(log) = pick(self.funcs()) else {
            return false;
        };

        let c_msg = to_cstring(msg);
        // SAFETY: Metamod utility with a valid C string passed through "%s"
        unsafe { log(self.info, c"%s".as_ptr(), c_msg.as_ptr()) };
        true
    }

    pub fn log_console(&self, msg: &str) -> bool {
        self.log_with(|f| f.pfn_log_console, msg)
    }

    pub fn log_message(&self, msg: &str) -> bool {
        self.log_with(|f| f.pfn_log_message, msg)
    }

    pub fn log_error(&self, msg: &str) -> bool {
        self.log_with(|f| f.pfn_log_error, msg)
    }

    pub fn log_developer(&self, msg: &str) -> bool {
        self.log_with(|f| f.pfn_log_developer, msg)
    }

    pub fn center_say(&self, msg: &str) -> bool {
        self.log_with(|f| f.pfn_center_say, msg)
    }

    /// Center message with explicit HUD text parameters.
    pub fn center_say_params(&self, params: &HudTextParams, msg: &str) -> bool {
        let Some(say) = self.funcs().pfn_center_say_parms else {
            return false;
        };

        let c_msg = to_cstring(msg);
        // SAFETY: Metamod utility with a valid C string passed through "%s"
        unsafe { say(self.info, *params, c"%s".as_ptr(), c_msg.as_ptr()) };
        true
    }

    /// Run a game DLL entity function such as `player`. `Ok(false)` when
    /// the game DLL does not export it.
    ///
    /// # Safety
    /// `vars` must be the entity variables of a valid edict.
    pub unsafe fn call_game_entity(&self, entity: &str, vars: *mut EntityVars) -> Result<bool, UtilError> {
        let call = self.get("CallGameEntity", |f| f.pfn_call_game_entity)?;
        let c_entity = to_cstring(entity);
        Ok(call(self.info, c_entity.as_ptr(), vars) != 0)
    }

    /// Look up a user message registered by the game DLL; returns id and size.
    pub fn user_msg_id(&self, name: &str) -> Option<(c_int, c_int)> {
        let get = self.funcs().pfn_get_user_msg_id?;

        let c_name = to_cstring(name);
        let mut size: c_int = 0;
        // SAFETY: Metamod utility with valid pointers
        let id = unsafe { get(self.info, c_name.as_ptr(), &raw mut size) };
        (id > 0).then_some((id, size))
    }

    /// Name of a user message registered by the game DLL.
    pub fn user_msg_name(&self, id: c_int) -> Option<String> {
        let get = self.funcs().pfn_get_user_msg_name?;

        // SAFETY: Metamod utility; the returned string is owned by Metamod
        unsafe { from_host(get(self.info, id, ptr::null_mut())) }
    }

    /// Full path of the loaded plugin library.
    pub fn plugin_path(&self) -> Option<PathBuf> {
        let get = self.funcs().pfn_get_plugin_path?;

        // SAFETY: Metamod utility; the returned string is owned by Metamod
        unsafe { from_host(get(self.info)) }.map(PathBuf::from)
    }

    /// String info about the game, mod or game DLL.
    pub fn game_info(&self, tag: GameInfo) -> Option<String> {
        let get = self.funcs().pfn_get_game_info?;

        // SAFETY: Metamod utility; the returned string is owned by Metamod
        unsafe { from_host(get(self.info, tag)) }
    }

    /// Load another plugin from a `meta load` style command line.
    pub fn load_plugin(&self, cmdline: &str, now: PluginLoadTime) -> Result<PluginHandle, UtilError> {
        let load = self.get("LoadPlugin", |f| f.pfn_load_plugin)?;

        let c_cmdline = to_cstring(cmdline);
        let mut handle: *mut c_void = ptr::null_mut();
        // SAFETY: Metamod utility with valid pointers
        check("LoadPlugin", unsafe { load(self.info, c_cmdline.as_ptr(), now, &raw mut handle) })?;
        Ok(PluginHandle(handle))
    }

    /// Unload a plugin by name or path.
    pub fn unload_plugin(
        &self,
        cmdline: &str,
        now: PluginLoadTime,
        reason: PluginUnloadReason,
    ) -> Result<(), UtilError> {
        let unload = self.get("UnloadPlugin", |f| f.pfn_unload_plugin)?;

        let c_cmdline = to_cstring(cmdline);
        // SAFETY: Metamod utility with a valid C string
        check("UnloadPlugin", unsafe { unload(self.info, c_cmdline.as_ptr(), now, reason) })
    }

    /// Unload a plugin loaded with [`MetaUtil::load_plugin`].
    pub fn unload_plugin_by_handle(
        &self,
        handle: PluginHandle,
        now: PluginLoadTime,
        reason: PluginUnloadReason,
    ) -> Result<(), UtilError> {
        let unload = self.get("UnloadPluginByHandle", |f| f.pfn_unload_plugin_by_handle)?;

        // SAFETY: Metamod utility; the handle came from Metamod
        check("UnloadPluginByHandle", unsafe { unload(self.info, handle.0, now, reason) })
    }

    /// Request id for a client cvar query.
    pub fn make_request_id(&self) -> Option<c_int> {
        let make = self.funcs().pfn_make_request_id?;

        // SAFETY: Metamod utility
        Some(unsafe { make(self.info) })
    }

    /// Cvar being queried from the client, if any.
    ///
    /// # Safety
    /// `client` must be a valid edict.
    pub unsafe fn is_querying_client_cvar(&self, client: *const Edict) -> Option<String> {
        let query = self.funcs().pfn_is_querying_client_cvar?;
        from_host(query(self.info, client))
    }

    /// Tables Metamod holds for this plugin's hooks.
    pub fn hook_tables(&self) -> Result<HookTablePtrs, UtilError> {
        let get = self.get("GetHookTables", |f| f.pfn_get_hook_tables)?;

        let mut tables = HookTablePtrs {
            engine: ptr::null_mut(),
            dll: ptr::null_mut(),
            dll_new: ptr::null_mut(),
        };
        // SAFETY: Metamod utility writing three table pointers
        unsafe { get(self.info, &raw mut tables.engine, &raw mut tables.dll, &raw mut tables.dll_new) };
        Ok(tables)
    }
}

/// Metamod's utility table, released from the host lock.
pub fn util() -> Option<MetaUtil> {
    HOST.read().util()
}

fn util_for(func: &'static str) -> Result<MetaUtil, UtilError> {
    util().ok_or(UtilError::Unavailable { func })
}

/// Log to console; Metamod adds the newline.
pub fn log_console(msg: &str) -> bool {
    util().is_some_and(|u| u.log_console(msg))
}

/// Log a regular message to the server logs.
pub fn log_message(msg: &str) -> bool {
    util().is_some_and(|u| u.log_message(msg))
}

/// Log an error message to the server logs.
pub fn log_error(msg: &str) -> bool {
    util().is_some_and(|u| u.log_error(msg))
}

/// Log a message only shown with `developer` set.
pub fn log_developer(msg: &str) -> bool {
    util().is_some_and(|u| u.log_developer(msg))
}

/// Print a message in the center of every player's screen.
pub fn center_say(msg: &str) -> bool {
    util().is_some_and(|u| u.center_say(msg))
}

pub fn center_say_params(params: &HudTextParams, msg: &str) -> bool {
    util().is_some_and(|u| u.center_say_params(params, msg))
}

/// # Safety
/// `vars` must be the entity variables of a valid edict.
pub unsafe fn call_game_entity(entity: &str, vars: *mut EntityVars) -> Result<bool, UtilError> {
    util_for("CallGameEntity")?.call_game_entity(entity, vars)
}

pub fn user_msg_id(name: &str) -> Option<(c_int, c_int)> {
    util()?.user_msg_id(name)
}

pub fn user_msg_name(id: c_int) -> Option<String> {
    util()?.user_msg_name(id)
}

pub fn plugin_path() -> Option<PathBuf> {
    util()?.plugin_path()
}

pub fn game_info(tag: GameInfo) -> Option<String> {
    util()?.game_info(tag)
}

pub fn load_plugin(cmdline: &str, now: PluginLoadTime) -> Result<PluginHandle, UtilError> {
    util_for("LoadPlugin")?.load_plugin(cmdline, now)
}

pub fn unload_plugin(cmdline: &str, now: PluginLoadTime, reason: PluginUnloadReason) -> Result<(), UtilError> {
    util_for("UnloadPlugin")?.unload_plugin(cmdline, now, reason)
}

pub fn unload_plugin_by_handle(
    handle: PluginHandle,
    now: PluginLoadTime,
    reason: PluginUnloadReason,
) -> Result<(), UtilError> {
    util_for("UnloadPluginByHandle")?.unload_plugin_by_handle(handle, now, reason)
}

pub fn make_request_id() -> Option<c_int> {
    util()?.make_request_id()
}

/// # Safety
/// `client` must be a valid edict.
pub unsafe fn is_querying_client_cvar(client: *const Edict) -> Option<String> {
    util()?.is_querying_client_cvar(client)
}

pub fn hook_tables() -> Result<HookTablePtrs, UtilError> {
    util_for("GetHookTables")?.hook_tables()
}
