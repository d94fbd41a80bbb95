//! Plugin callbacks.
//!
//! A plugin implements [`MetaPlugin`] and exports it with
//! [`metamod_plugin!`](crate::metamod_plugin). The instance lives in a global
//! mutex created by the macro; every entry point locks it for the duration of
//! the callback.

use crate::error::PluginError;
use crate::metamod::types::{PluginLoadTime, PluginUnloadReason};

/// Lifecycle callbacks of a Metamod plugin.
///
/// Hooks are usually registered in [`MetaPlugin::on_attach`]; the hook tables
/// are allocated right before it runs and released right after
/// [`MetaPlugin::on_detach`].
pub trait MetaPlugin: Default + Send + 'static {
    /// Called from `Meta_Init`, before the engine functions are known.
    fn on_init(&mut self) {}

    /// Called from `Meta_Query` once the interface version matched.
    fn on_query(&mut self) {}

    /// Called from `Meta_Attach`. An error refuses the attach.
    fn on_attach(&mut self, _now: PluginLoadTime) -> Result<(), PluginError> {
        Ok(())
    }

    /// Called from `Meta_Detach`, before the hook tables are cleared.
    fn on_detach(&mut self, _now: PluginLoadTime, _reason: PluginUnloadReason) {}
}
