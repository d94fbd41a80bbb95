//! Error types for hook tables and plugin setup

use std::ffi::c_int;

/// Errors raised while registering or exporting hooks
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HookError {
    /// Metamod handed us a null table to fill
    #[error("{table}: hooks_table is null")]
    NullTable { table: &'static str },

    /// Metamod handed us a null version pointer
    #[error("{table}: interface_version is null")]
    NullVersion { table: &'static str },

    /// Requested table version differs from the one we were built against
    #[error("{table}: interface version mismatch; requested = {requested}; ours = {ours}")]
    VersionMismatch {
        table: &'static str,
        requested: c_int,
        ours: c_int,
    },

    /// An operation was bound with a signature other than its first binding
    #[error("{table}: {op} is already bound with a different signature")]
    SignatureMismatch { table: &'static str, op: &'static str },

    /// The table was released (detach, failed export) and cannot take hooks
    #[error("{table}: hook table has been released")]
    TableReleased { table: &'static str },
}

/// Errors returned by Metamod utility calls
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UtilError {
    /// Metamod has not handed over its utility table, or the slot is empty
    #[error("{func}: Metamod utility is not available")]
    Unavailable { func: &'static str },

    /// Metamod reported an error code
    #[error("{func} failed with code {code}")]
    Failed { func: &'static str, code: c_int },
}

/// Errors raised while loading the plugin configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse JSON content
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Error returned by plugin attach callbacks
pub type PluginError = Box<dyn std::error::Error + Send + Sync>;
