//! Metamod Hooks
//!
//! Building blocks for Metamod plugins written in Rust: the FFI layout of
//! the engine and game DLL function tables, per-interface pre and post hook
//! tables with their attach/detach lifecycle, the meta result protocol that
//! lets hooks override or supercede the real call, and the exported entry
//! points Metamod looks for.
//!
//! A plugin implements [`MetaPlugin`], registers hooks in
//! [`MetaPlugin::on_attach`] and exports itself with [`metamod_plugin!`].

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_safety_doc)]

pub mod chain;
pub mod config;
pub mod error;
pub mod hooks;
pub mod host;
pub mod logging;
pub mod metamod;
pub mod plugin;
pub mod result;

pub use chain::{CallContext, CallOutcome, Chain, ChainTable, Outcome};
pub use error::{ConfigError, HookError, PluginError, UtilError};
pub use hooks::{hook_dll, hook_dll_new, hook_engine, Phase};
pub use metamod::types::{MetaResult, PluginLoadTime, PluginUnloadReason};
pub use plugin::MetaPlugin;

#[doc(hidden)]
pub mod __private {
    pub use once_cell::sync::Lazy;
    pub use parking_lot::Mutex;
}

#[cfg(test)]
pub(crate) mod test_support {
    use parking_lot::Mutex;

    /// Held by tests that touch the process-wide `HOOKS`, `HOST` or meta
    /// globals.
    pub static PROCESS_STATE: Mutex<()> = parking_lot::const_mutex(());
}
