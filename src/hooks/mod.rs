//! Plugin hook tables.
//!
//! Each interface (engine, game DLL, new game DLL) has a pre table and a post
//! table. A table slot holds at most one callback; binding a slot again
//! replaces the previous callback and binding `None` clears it.
//!
//! Lifecycle:
//! - attach: every table is allocated zero-initialized
//! - export: Metamod hands over its own table; ours is copied into it and
//!   from then on registrations write straight into Metamod's copy
//! - detach: every table is zeroed and released

use std::ffi::c_int;
use std::ptr::NonNull;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::HookError;
use crate::metamod::tables::{
    DllFunctions, EngineFuncs, NewDllFunctions, DLL_INTERFACE_VERSION, ENGINE_INTERFACE_VERSION,
    NEW_DLL_FUNCTIONS_VERSION,
};
use crate::metamod::types::MetaStatus;

/// Whether a hook runs before or after the real function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Pre,
    Post,
}

impl Phase {
    /// Build from the `post` flag used by the C API.
    pub fn from_post(post: bool) -> Self {
        if post {
            Self::Post
        } else {
            Self::Pre
        }
    }
}

/// A function table Metamod can request from the plugin.
pub trait FunctionTable: Copy + Default + 'static {
    /// Interface version the table layout corresponds to
    const INTERFACE_VERSION: c_int;
    /// Name used in logs
    const NAME: &'static str;
}

impl FunctionTable for EngineFuncs {
    const INTERFACE_VERSION: c_int = ENGINE_INTERFACE_VERSION;
    const NAME: &'static str = "engine";
}

impl FunctionTable for DllFunctions {
    const INTERFACE_VERSION: c_int = DLL_INTERFACE_VERSION;
    const NAME: &'static str = "gamedll";
}

impl FunctionTable for NewDllFunctions {
    const INTERFACE_VERSION: c_int = NEW_DLL_FUNCTIONS_VERSION;
    const NAME: &'static str = "gamedll new";
}

// =============================================================================
// Single table
// =============================================================================

enum Storage<T> {
    Released,
    Owned(Box<T>),
    /// Table owned by Metamod after a successful export
    Exported(NonNull<T>),
}

/// One pre or post table for one interface.
pub struct HookTable<T: FunctionTable> {
    storage: Storage<T>,
    phase: Phase,
}

impl<T: FunctionTable> HookTable<T> {
    /// A table with no storage behind it.
    pub const fn released(phase: Phase) -> Self {
        Self {
            storage: Storage::Released,
            phase,
        }
    }

    fn label(&self) -> String {
        match self.phase {
            Phase::Pre => format!("{} hooks", T::NAME),
            Phase::Post => format!("{} post hooks", T::NAME),
        }
    }

    /// Allocate a fresh zeroed table, dropping any previous binding.
    pub fn allocate(&mut self) {
        self.storage = Storage::Owned(Box::default());
    }

    pub fn is_released(&self) -> bool {
        matches!(self.storage, Storage::Released)
    }

    pub fn is_exported(&self) -> bool {
        matches!(self.storage, Storage::Exported(_))
    }

    fn get_mut(&mut self) -> Option<&mut T> {
        match &mut self.storage {
            Storage::Released => None,
            Storage::Owned(table) => Some(table.as_mut()),
            // SAFETY: Metamod keeps the exported table alive until the
            // plugin is detached, at which point the table is released.
            Storage::Exported(table) => Some(unsafe { table.as_mut() }),
        }
    }

    /// Copy of the live table.
    pub fn snapshot(&self) -> Option<T> {
        match &self.storage {
            Storage::Released => None,
            Storage::Owned(table) => Some(**table),
            // SAFETY: see `get_mut`
            Storage::Exported(table) => Some(unsafe { *table.as_ptr() }),
        }
    }

    /// Bind slots of the live table.
    pub fn bind(&mut self, bind: impl FnOnce(&mut T)) -> Result<(), HookError> {
        match self.get_mut() {
            Some(table) => {
                bind(table);
                Ok(())
            }
            None => Err(HookError::TableReleased { table: T::NAME }),
        }
    }

    /// Zero every slot, keeping the storage.
    pub fn clear(&mut self) {
        if let Some(table) = self.get_mut() {
            *table = T::default();
        }
    }

    /// Drop the storage; an exported table is only forgotten.
    pub fn release(&mut self) {
        self.storage = Storage::Released;
    }

    /// Hand the table over to Metamod.
    ///
    /// On success `dest` receives the current bindings and becomes the live
    /// table. On failure the table is released and never exposed; on a
    /// version mismatch our version is written back into `interface_version`.
    ///
    /// # Safety
    /// `dest` must be null or valid for writes of `T`, and `interface_version`
    /// must be null or valid for reads and writes.
    pub unsafe fn export(&mut self, dest: *mut T, interface_version: *mut c_int) -> Result<(), HookError> {
        let result = self.try_export(dest, interface_version);
        if let Err(e) = &result {
            tracing::error!("Export {}: {e}", self.label());
            self.release();
        }
        result
    }

    unsafe fn try_export(&mut self, dest: *mut T, interface_version: *mut c_int) -> Result<(), HookError> {
        let Some(dest) = NonNull::new(dest) else {
            return Err(HookError::NullTable { table: T::NAME });
        };

        if interface_version.is_null() {
            return Err(HookError::NullVersion { table: T::NAME });
        }

        let requested = *interface_version;
        if requested != T::INTERFACE_VERSION {
            // Tell Metamod what we have, so it can tell who is out of date
            *interface_version = T::INTERFACE_VERSION;
            return Err(HookError::VersionMismatch {
                table: T::NAME,
                requested,
                ours: T::INTERFACE_VERSION,
            });
        }

        let Some(table) = self.snapshot() else {
            return Err(HookError::TableReleased { table: T::NAME });
        };

        dest.as_ptr().write(table);
        self.storage = Storage::Exported(dest);
        tracing::debug!("Exported {}", self.label());

        Ok(())
    }
}

/// Pre and post tables of one interface.
pub struct HookPair<T: FunctionTable> {
    pub pre: HookTable<T>,
    pub post: HookTable<T>,
}

impl<T: FunctionTable> HookPair<T> {
    const fn released() -> Self {
        Self {
            pre: HookTable::released(Phase::Pre),
            post: HookTable::released(Phase::Post),
        }
    }

    /// Table for a phase.
    pub fn phase_mut(&mut self, phase: Phase) -> &mut HookTable<T> {
        match phase {
            Phase::Pre => &mut self.pre,
            Phase::Post => &mut self.post,
        }
    }

    fn allocate(&mut self) {
        self.pre.allocate();
        self.post.allocate();
    }

    fn clear(&mut self) {
        self.pre.clear();
        self.post.clear();
    }

    fn release(&mut self) {
        self.pre.release();
        self.post.release();
    }
}

// =============================================================================
// All tables
// =============================================================================

/// Every hook table of the plugin.
pub struct HookTables {
    pub engine: HookPair<EngineFuncs>,
    pub dll: HookPair<DllFunctions>,
    pub dll_new: HookPair<NewDllFunctions>,
}

// SAFETY: exported table pointers are only touched through the HOOKS mutex,
// and Metamod only calls the plugin from the engine thread.
unsafe impl Send for HookTables {}

impl HookTables {
    /// Tables with no storage.
    pub const fn released() -> Self {
        Self {
            engine: HookPair::released(),
            dll: HookPair::released(),
            dll_new: HookPair::released(),
        }
    }

    /// Allocate every table zero-initialized.
    pub fn allocate_all(&mut self) {
        self.engine.allocate();
        self.dll.allocate();
        self.dll_new.allocate();
    }

    /// Zero every table and release the storage.
    pub fn clear_all(&mut self) {
        self.engine.clear();
        self.dll.clear();
        self.dll_new.clear();
        self.release_all();
    }

    /// Release every table without zeroing it.
    pub fn release_all(&mut self) {
        self.engine.release();
        self.dll.release();
        self.dll_new.release();
    }
}

impl Default for HookTables {
    fn default() -> Self {
        Self::released()
    }
}

/// Global hook tables
pub static HOOKS: Lazy<Mutex<HookTables>> = Lazy::new(|| Mutex::new(HookTables::released()));

// =============================================================================
// Registration
// =============================================================================

/// Bind an engine hook.
///
/// ```ignore
/// hook_engine(Phase::Pre, |t| t.pfn_precache_model = Some(precache_model))?;
/// ```
pub fn hook_engine(phase: Phase, bind: impl FnOnce(&mut EngineFuncs)) -> Result<(), HookError> {
    HOOKS.lock().engine.phase_mut(phase).bind(bind)
}

/// Bind a game DLL hook.
pub fn hook_dll(phase: Phase, bind: impl FnOnce(&mut DllFunctions)) -> Result<(), HookError> {
    HOOKS.lock().dll.phase_mut(phase).bind(bind)
}

/// Bind a new game DLL hook.
pub fn hook_dll_new(phase: Phase, bind: impl FnOnce(&mut NewDllFunctions)) -> Result<(), HookError> {
    HOOKS.lock().dll_new.phase_mut(phase).bind(bind)
}

// =============================================================================
// Export callbacks handed to Metamod
// =============================================================================

fn status(result: Result<(), HookError>) -> c_int {
    MetaStatus::from(result.is_ok()) as c_int
}

pub(crate) unsafe extern "C" fn export_engine_hooks(table: *mut EngineFuncs, version: *mut c_int) -> c_int {
    status(HOOKS.lock().engine.pre.export(table, version))
}

pub(crate) unsafe extern "C" fn export_engine_post_hooks(table: *mut EngineFuncs, version: *mut c_int) -> c_int {
    status(HOOKS.lock().engine.post.export(table, version))
}

pub(crate) unsafe extern "C" fn export_dll_hooks(table: *mut DllFunctions, version: *mut c_int) -> c_int {
    status(HOOKS.lock().dll.pre.export(table, version))
}

pub(crate) unsafe extern "C" fn export_dll_post_hooks(table: *mut DllFunctions, version: *mut c_int) -> c_int {
    status(HOOKS.lock().dll.post.export(table, version))
}

pub(crate) unsafe extern "C" fn export_dll_new_hooks(table: *mut NewDllFunctions, version: *mut c_int) -> c_int {
    status(HOOKS.lock().dll_new.pre.export(table, version))
}

pub(crate) unsafe extern "C" fn export_dll_new_post_hooks(
    table: *mut NewDllFunctions,
    version: *mut c_int,
) -> c_int {
    status(HOOKS.lock().dll_new.post.export(table, version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_char;

    unsafe extern "C" fn precache_a(_name: *const c_char) -> c_int {
        1
    }

    unsafe extern "C" fn precache_b(_name: *const c_char) -> c_int {
        2
    }

    unsafe extern "C" fn game_init() {}

    fn attached() -> HookTables {
        let mut tables = HookTables::released();
        tables.allocate_all();
        tables
    }

    fn bound_precache(table: &HookTable<EngineFuncs>) -> Option<c_int> {
        let name = c"models/player.mdl";
        let snapshot = table.snapshot()?;
        snapshot.pfn_precache_model.map(|f| unsafe { f(name.as_ptr()) })
    }

    #[test]
    fn test_attach_allocates_empty_tables() {
        let tables = attached();

        let engine = tables.engine.pre.snapshot().unwrap();
        assert!(engine.pfn_precache_model.is_none());
        assert!(engine.pfn_server_print.is_none());

        let dll = tables.dll.post.snapshot().unwrap();
        assert!(dll.pfn_game_init.is_none());

        let dll_new = tables.dll_new.pre.snapshot().unwrap();
        assert!(dll_new.pfn_game_shutdown.is_none());
    }

    #[test]
    fn test_bind_last_write_wins() {
        let mut tables = attached();

        tables.engine.pre.bind(|t| t.pfn_precache_model = Some(precache_a)).unwrap();
        tables.engine.pre.bind(|t| t.pfn_precache_model = Some(precache_b)).unwrap();
        assert_eq!(bound_precache(&tables.engine.pre), Some(2));

        // post table is independent
        assert_eq!(bound_precache(&tables.engine.post), None);

        tables.engine.pre.bind(|t| t.pfn_precache_model = None).unwrap();
        assert_eq!(bound_precache(&tables.engine.pre), None);
    }

    #[test]
    fn test_detach_clears_and_releases() {
        let mut tables = attached();
        tables.dll.pre.bind(|t| t.pfn_game_init = Some(game_init)).unwrap();

        tables.clear_all();

        assert!(tables.dll.pre.is_released());
        assert!(tables.engine.post.snapshot().is_none());
        assert_eq!(
            tables.dll.pre.bind(|t| t.pfn_game_init = Some(game_init)),
            Err(HookError::TableReleased { table: "gamedll" })
        );
    }

    #[test]
    fn test_reattach_starts_empty() {
        let mut tables = attached();
        tables.dll.pre.bind(|t| t.pfn_game_init = Some(game_init)).unwrap();
        tables.clear_all();
        tables.allocate_all();

        assert!(tables.dll.pre.snapshot().unwrap().pfn_game_init.is_none());
    }

    #[test]
    fn test_export_adopts_host_table() {
        let mut tables = attached();
        tables.engine.pre.bind(|t| t.pfn_precache_model = Some(precache_a)).unwrap();

        let mut host = EngineFuncs::default();
        let mut version = ENGINE_INTERFACE_VERSION;
        let result = unsafe { tables.engine.pre.export(&raw mut host, &raw mut version) };

        assert_eq!(result, Ok(()));
        assert!(tables.engine.pre.is_exported());
        assert!(host.pfn_precache_model.is_some());

        // later registrations land in the host's table
        tables.engine.pre.bind(|t| t.pfn_precache_model = Some(precache_b)).unwrap();
        let name = c"sprites/smoke.spr";
        let bound = host.pfn_precache_model.map(|f| unsafe { f(name.as_ptr()) });
        assert_eq!(bound, Some(2));

        // detach zeroes the host's table too
        tables.clear_all();
        assert!(host.pfn_precache_model.is_none());
    }

    #[test]
    fn test_export_version_mismatch() {
        let mut tables = attached();
        tables.dll.post.bind(|t| t.pfn_game_init = Some(game_init)).unwrap();

        let mut host = DllFunctions::default();
        let mut version = 139;
        let result = unsafe { tables.dll.post.export(&raw mut host, &raw mut version) };

        assert_eq!(
            result,
            Err(HookError::VersionMismatch {
                table: "gamedll",
                requested: 139,
                ours: DLL_INTERFACE_VERSION,
            })
        );
        assert_eq!(version, DLL_INTERFACE_VERSION);
        assert!(host.pfn_game_init.is_none());
        assert!(tables.dll.post.is_released());
    }

    #[test]
    fn test_export_null_table() {
        let mut tables = attached();
        let mut version = NEW_DLL_FUNCTIONS_VERSION;

        let result = unsafe { tables.dll_new.pre.export(std::ptr::null_mut(), &raw mut version) };

        assert_eq!(result, Err(HookError::NullTable { table: "gamedll new" }));
        assert_eq!(version, NEW_DLL_FUNCTIONS_VERSION);
        assert!(tables.dll_new.pre.is_released());
        // the other phase is untouched
        assert!(!tables.dll_new.post.is_released());
    }

    #[test]
    fn test_export_null_version() {
        let mut tables = attached();
        let mut host = NewDllFunctions::default();

        let result = unsafe { tables.dll_new.post.export(&raw mut host, std::ptr::null_mut()) };

        assert_eq!(result, Err(HookError::NullVersion { table: "gamedll new" }));
        assert!(tables.dll_new.post.is_released());
    }

    #[test]
    fn test_export_after_release_fails() {
        let mut tables = HookTables::released();
        let mut host = EngineFuncs::default();
        let mut version = ENGINE_INTERFACE_VERSION;

        let result = unsafe { tables.engine.post.export(&raw mut host, &raw mut version) };
        assert_eq!(result, Err(HookError::TableReleased { table: "engine" }));
    }

    #[test]
    fn test_phase_from_post() {
        assert_eq!(Phase::from_post(true), Phase::Post);
        assert_eq!(Phase::from_post(false), Phase::Pre);
    }
}
