//! Structured logging for the bridge
//!
//! Events go through `tracing`; `init` installs a `tracing-subscriber` stack
//! (env filter, fmt or JSON layer, optional file appender). Every helper below
//! tags its event with a stable `event = "..."` field so logs can be filtered
//! by lifecycle stage. Per-record traffic logs at `trace`.

use once_cell::sync::OnceCell;
use std::io;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

pub use tracing::{debug, error, info, trace, warn};

static SUBSCRIBER: OnceCell<()> = OnceCell::new();

/// Where and how bridge events are written
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Level for the `pybridge` target when `RUST_LOG` is unset
    pub level: Level,
    /// Append to this file instead of stdout
    pub file: Option<PathBuf>,
    pub json: bool,
    /// Emit span enter/close events
    pub spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: Level::WARN, file: None, json: false, spans: false }
    }
}

impl LogConfig {
    /// `PYBRIDGE_LOG_LEVEL`, `PYBRIDGE_LOG_FILE`, `PYBRIDGE_LOG_JSON`, `PYBRIDGE_LOG_SPANS`
    pub fn from_env() -> Self {
        let level = std::env::var("PYBRIDGE_LOG_LEVEL")
            .ok()
            .and_then(|name| parse_level(&name))
            .unwrap_or(Level::WARN);
        Self {
            level,
            file: std::env::var_os("PYBRIDGE_LOG_FILE").map(PathBuf::from),
            json: env_flag("PYBRIDGE_LOG_JSON"),
            spans: env_flag("PYBRIDGE_LOG_SPANS"),
        }
    }

    /// Everything down to per-record trace events, with spans
    pub fn debug() -> Self {
        Self { level: Level::TRACE, spans: true, ..Self::default() }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("pybridge={}", self.level.as_str().to_lowercase())))
    }

    fn writer(&self) -> BoxMakeWriter {
        match &self.file {
            Some(path) => file_writer(path),
            None => BoxMakeWriter::new(io::stdout),
        }
    }
}

fn env_flag(var: &str) -> bool {
    std::env::var_os(var).is_some()
}

fn parse_level(name: &str) -> Option<Level> {
    name.trim().parse().ok()
}

/// Install the subscriber described by the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Install a subscriber; only the first call in a process has an effect
pub fn init_with_config(config: LogConfig) {
    SUBSCRIBER.get_or_init(|| {
        let span_events = if config.spans { FmtSpan::ENTER | FmtSpan::CLOSE } else { FmtSpan::NONE };
        let layer = fmt::layer()
            .with_writer(config.writer())
            .with_span_events(span_events)
            .with_target(true)
            .with_line_number(cfg!(debug_assertions));

        // The embedding program may already own the global subscriber.
        let registry = tracing_subscriber::registry().with(config.filter());
        let _ = if config.json {
            registry.with(layer.json()).try_init()
        } else {
            registry.with(layer).try_init()
        };
    });
}

fn file_writer(path: &Path) -> BoxMakeWriter {
    let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let file_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "pybridge.log".into());
    BoxMakeWriter::new(tracing_appender::rolling::never(directory, file_name))
}

pub fn is_initialized() -> bool {
    SUBSCRIBER.get().is_some()
}

#[inline]
pub fn log_allocation(size: usize, ptr: *const u8) {
    trace!(event = "allocation", size_bytes = size, address = ?ptr, "record allocated");
}

#[inline]
pub fn log_deallocation(ptr: *const u8) {
    trace!(event = "deallocation", address = ?ptr, "record released");
}

/// `action` is one of `push`, `pop`, `drain`
#[inline]
pub fn log_freelist(type_name: &str, action: &'static str, pooled: usize) {
    trace!(event = "freelist", type_name, action, pooled, "freelist updated");
}

pub fn log_gc_start(tracked: usize) {
    debug!(event = "gc_start", tracked, "starting cycle collection");
}

pub fn log_gc_complete(duration_us: u64, collected: usize, tracked: usize) {
    info!(
        event = "gc_complete",
        objects_collected = collected,
        tracked_objects = tracked,
        duration_us,
        "cycle collection complete"
    );
}

pub fn log_type_registered(name: &str, size: usize, base: &str) {
    info!(event = "type_registered", type_name = name, record_size = size, base, "type registered");
}

/// A hook failure on its way to becoming a host exception
pub fn log_hook_failure(hook: &str, error: &str) {
    debug!(event = "hook_failure", hook, error, "hook signaled failure");
}

/// An invariant violation reported instead of acted on
pub fn log_invariant_violation(what: &str, detail: &str) {
    warn!(event = "invariant_violation", what, detail, "invariant violation reported as error");
}

pub fn log_runtime_init() {
    debug!(event = "runtime_init", "pybridge runtime initialized");
}

pub fn log_runtime_shutdown() {
    debug!(event = "runtime_shutdown", "pybridge runtime shut down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_config_traces_with_spans() {
        let config = LogConfig::debug();
        assert_eq!(config.level, Level::TRACE);
        assert!(config.spans);
        assert_eq!(config.file, LogConfig::default().file);
    }

    #[test]
    fn level_names_parse_case_insensitively() {
        assert_eq!(parse_level("TRACE"), Some(Level::TRACE));
        assert_eq!(parse_level(" warn "), Some(Level::WARN));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn init_idempotent() {
        init();
        init();
        assert!(is_initialized());
    }
}
