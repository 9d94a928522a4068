//! Logging infrastructure - structured tracing across the bridge
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels (`LUAR_LOG_*` environment variables)
//! - Zero-cost when disabled
//! - Span-based performance tracking
//! - Console (plain or JSON) and file output

use std::ffi::OsStr;
use std::io;
use std::path::Path;

use once_cell::sync::OnceCell;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
    /// Enable performance tracking
    pub track_performance: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
            track_performance: cfg!(debug_assertions),
        }
    }
}

/// Parse a level name; unknown names fall back to INFO
pub fn parse_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // LUAR_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level) = std::env::var("LUAR_LOG_LEVEL") {
            config.level = parse_level(&level);
        }

        // LUAR_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("LUAR_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("LUAR_LOG_JSON").is_ok();
        config.show_spans = std::env::var("LUAR_LOG_SPANS").is_ok();

        // LUAR_LOG_PERF: enable performance tracking
        if let Ok(val) = std::env::var("LUAR_LOG_PERF") {
            config.track_performance = val == "1" || val.to_lowercase() == "true";
        }

        config
    }

    /// Minimal logging for hot marshaling paths
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
            track_performance: false,
        }
    }

    /// Verbose logging, every conversion traced to `luar.log`
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            file_output: true,
            log_path: Some("luar.log".to_string()),
            json_format: false,
            show_spans: true,
            track_performance: true,
        }
    }
}

/// Initialize logging with default configuration
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("luar={}", config.level.as_str().to_lowercase()))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let console = (!config.json_format).then(|| {
            fmt::layer()
                .with_writer(io::stderr)
                .with_span_events(span_events.clone())
                .with_target(true)
                .with_thread_ids(cfg!(debug_assertions))
                .with_line_number(cfg!(debug_assertions))
        });

        let json = config.json_format.then(|| {
            fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_span_events(span_events.clone())
        });

        let file = config
            .log_path
            .as_deref()
            .filter(|_| config.file_output)
            .map(|path| {
                let path = Path::new(path);
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                let name = path.file_name().unwrap_or_else(|| OsStr::new("luar.log"));
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(tracing_appender::rolling::never(dir, name))
            });

        // A host application may already own the global subscriber
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(json)
            .with(file)
            .try_init();
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Bridge-specific logging functions
// ============================================================================

/// Log a value conversion between the host and Lua
#[inline]
pub fn log_conversion(from: &str, to: &str) {
    use tracing::trace;
    trace!(event = "conversion", from = from, to = to, "Value converted");
}

/// Log a proxy handle creation
#[inline]
pub fn log_proxy(ty: &str, cached: bool) {
    use tracing::trace;
    trace!(event = "proxy", ty = ty, cached = cached, "Proxy handle pushed");
}

/// Log a new anchor entry
#[inline]
pub fn log_anchor(ty: &str, total: usize) {
    use tracing::trace;
    trace!(event = "anchor", ty = ty, anchored = total, "Host value anchored");
}

/// Log a host function invoked from Lua
pub fn log_host_call(callee: &str, arg_count: usize) {
    use tracing::debug;
    debug!(
        event = "host_call",
        function = callee,
        args = arg_count,
        "Host function called"
    );
}

/// Log a host function failure raised into Lua
pub fn log_host_error(callee: &str, error: &str) {
    use tracing::warn;
    warn!(
        event = "host_error",
        function = callee,
        error = error,
        "Host function failed"
    );
}

/// Log a Lua function invoked from the host
pub fn log_lua_call(name: &str, arg_count: usize) {
    use tracing::debug;
    debug!(
        event = "lua_call",
        function = name,
        args = arg_count,
        "Lua function called"
    );
}

/// Log a script failure
pub fn log_script_error(error: &str) {
    use tracing::error;
    error!(event = "script_error", error = error, "Lua script failed");
}

/// Log a namespace registration
pub fn log_register(namespace: &str, count: usize) {
    use tracing::debug;
    debug!(
        event = "register",
        namespace = namespace,
        entries = count,
        "Host values registered"
    );
}

/// Log runtime instance creation
pub fn log_instance_init(library: &str) {
    use tracing::info;
    info!(
        event = "instance_init",
        library = library,
        "Lua instance created"
    );
}

/// Log runtime instance shutdown
pub fn log_instance_close(anchored: usize) {
    use tracing::info;
    info!(
        event = "instance_close",
        anchored = anchored,
        "Lua instance closed, anchors released"
    );
}

/// Log a failure while releasing instance resources
pub fn log_teardown_error(resource: &str, error: &str) {
    use tracing::warn;
    warn!(
        event = "teardown_error",
        resource = resource,
        error = error,
        "Failed to release instance resource"
    );
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            let elapsed = self.start.elapsed();
            debug!(
                operation = self.operation,
                duration_us = elapsed.as_micros() as u64,
                "operation completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.file_output);

        let perf_config = LogConfig::performance();
        assert_eq!(perf_config.level, Level::ERROR);

        let debug_config = LogConfig::debug();
        assert_eq!(debug_config.level, Level::TRACE);
        assert_eq!(debug_config.log_path.as_deref(), Some("luar.log"));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("bogus"), Level::INFO);
    }

    #[test]
    fn test_event_helpers() {
        log_instance_close(3);
        log_teardown_error("luar.handles", "registry unavailable");
    }

    #[test]
    fn test_init_idempotent() {
        init_with_config(LogConfig::performance());
        init(); // Should not panic
        assert!(is_initialized());
    }
}
