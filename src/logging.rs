//! Logging.
//!
//! `tracing` events are formatted by `tracing-subscriber` and written to the
//! server console once the engine functions are known, to stderr before
//! that. Every line carries the plugin log tag.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::config::PluginConfig;
use crate::host;

static LOG_TAG: OnceCell<String> = OnceCell::new();
static TO_CONSOLE: AtomicBool = AtomicBool::new(true);
static FILTER: OnceCell<reload::Handle<EnvFilter, Registry>> = OnceCell::new();

/// Writer for one formatted event; flushed to the host on drop.
pub struct HostWriter {
    buf: Vec<u8>,
}

impl Write for HostWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for HostWriter {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }

        let text = String::from_utf8_lossy(&self.buf);
        let line = match LOG_TAG.get() {
            Some(tag) => format!("[{tag}] {text}"),
            None => text.into_owned(),
        };

        if TO_CONSOLE.load(Ordering::Relaxed) && host::server_print(&line) {
            return;
        }
        eprint!("{line}");
    }
}

/// Hands out a [`HostWriter`] per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostMakeWriter;

impl<'a> MakeWriter<'a> for HostMakeWriter {
    type Writer = HostWriter;

    fn make_writer(&'a self) -> Self::Writer {
        HostWriter { buf: Vec::new() }
    }
}

fn filter_for(directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the subscriber. Later calls only update the log tag if it was
/// not set yet.
pub fn init(logtag: &str) {
    let _ = LOG_TAG.set(logtag.to_string());

    if FILTER.get().is_some() {
        return;
    }

    let defaults = PluginConfig::default();
    let (filter, handle) = reload::Layer::new(filter_for(&defaults.log_filter));
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(HostMakeWriter)
        .with_ansi(false)
        .with_target(false)
        .without_time();

    // Another subscriber (e.g. the host test harness) may already be set
    if tracing_subscriber::registry().with(filter).with(fmt).try_init().is_ok() {
        let _ = FILTER.set(handle);
    }
}

/// Apply the logging part of a loaded config.
pub fn apply(config: &PluginConfig) {
    TO_CONSOLE.store(config.log_to_console, Ordering::Relaxed);

    if let Some(handle) = FILTER.get() {
        if let Err(e) = handle.reload(filter_for(&config.log_filter)) {
            tracing::warn!("Failed to apply log filter {:?}: {e}", config.log_filter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_buffers_until_drop() {
        let mut writer = HostMakeWriter.make_writer();
        writer.write_all(b"INFO hello").unwrap();
        writer.write_all(b" world\n").unwrap();
        assert_eq!(writer.buf, b"INFO hello world\n");
    }

    #[test]
    fn test_invalid_filter_falls_back() {
        // must not panic on a broken directive
        let _ = filter_for("=[not a filter");
    }
}
