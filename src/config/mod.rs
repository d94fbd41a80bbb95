//! Plugin configuration.
//!
//! Read at attach from `<plugin dir>/<logtag>.json`, next to the plugin
//! library. Every field is optional.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Plugin configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// `tracing` filter directive, overridden by `RUST_LOG`
    pub log_filter: String,
    /// Route log lines to the server console (stderr otherwise)
    pub log_to_console: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            log_to_console: true,
        }
    }
}

impl PluginConfig {
    /// Parse a config from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the config next to the plugin library, falling back to the
    /// defaults when the file is unreadable or malformed.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Ignoring config {}: {e}", path.display());
            Self::default()
        })
    }
}

/// Config file path for a plugin library and log tag.
pub fn config_path(plugin_path: &Path, logtag: &str) -> PathBuf {
    let dir = plugin_path.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!("{}.json", logtag.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PluginConfig::from_json(r#"{ "log_filter": "debug" }"#).unwrap();
        assert_eq!(config.log_filter, "debug");
        assert!(config.log_to_console);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(matches!(
            PluginConfig::from_json("{ log_filter"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_is_default() {
        let path = std::env::temp_dir().join("metamod-hooks-does-not-exist.json");
        assert_eq!(PluginConfig::load(&path).unwrap(), PluginConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("metamod-hooks-{}.json", std::process::id()));
        fs::write(&path, r#"{ "log_to_console": false }"#).unwrap();

        let config = PluginConfig::load(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert!(!config.log_to_console);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_config_path() {
        let path = config_path(Path::new("cstrike/addons/counter/counter_mm.so"), "COUNTER");
        assert_eq!(path, Path::new("cstrike/addons/counter/counter.json"));
    }
}
