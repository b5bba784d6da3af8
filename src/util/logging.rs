//! Structured logging for the `cm` binary
//!
//! Logs go to stderr so generated output on stdout (plans, listings) stays
//! machine readable. Configuration comes from the command line or from
//! `CM_LOG_LEVEL` / `CM_LOG_JSON`; `RUST_LOG` still overrides per-module
//! filtering.
//!
//! ```no_run
//! use container_magic::util::logging::{self, LoggingConfig};
//! use tracing::Level;
//!
//! logging::init_logging(LoggingConfig::with_level(Level::DEBUG));
//! tracing::debug!(stage = "base", "Compiling stage");
//! ```

use std::env;
use std::io::IsTerminal;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_LEVEL_ENV: &str = "CM_LOG_LEVEL";
pub const LOG_JSON_ENV: &str = "CM_LOG_JSON";

static INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level for this crate's own events
    pub level: Level,

    /// One JSON object per event instead of human-readable lines
    pub use_json: bool,

    pub include_target: bool,

    /// File and line of the emitting call site
    pub include_location: bool,
}

impl Default for LoggingConfig {
    /// WARN level, plain text, no target: a CLI run only shows problems
    fn default() -> Self {
        Self {
            level: Level::WARN,
            use_json: false,
            include_target: false,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            include_target: level >= Level::DEBUG,
            ..Default::default()
        }
    }

    /// JSON events with full metadata, for CI logs
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
        }
    }

    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            use_json: false,
            include_target: true,
            include_location: false,
        }
    }
}

/// Parse a level name, case-insensitively; unknown names fall back to WARN
pub fn parse_level(level_str: &str) -> Level {
    try_parse_level(level_str).unwrap_or_else(|| {
        eprintln!(
            "Invalid log level '{}', defaulting to WARN. Valid levels: trace, debug, info, warn, error",
            level_str
        );
        Level::WARN
    })
}

pub fn try_parse_level(level_str: &str) -> Option<Level> {
    match level_str.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn build_filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("container_magic={}", level).parse() {
        filter = filter.add_directive(directive);
    }
    if let Ok(directive) = format!("cm={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    if env::var("RUST_LOG").is_err() {
        for noisy in ["h2=warn", "hyper=warn", "hyper_util=warn", "reqwest=warn"] {
            if let Ok(directive) = noisy.parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

/// Install the global subscriber; later calls are ignored
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level);

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(std::io::stderr().is_terminal())
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        }
    });
}

/// Configuration from `CM_LOG_LEVEL` and `CM_LOG_JSON`, defaults otherwise
pub fn config_from_env() -> LoggingConfig {
    let mut config = env::var(LOG_LEVEL_ENV)
        .ok()
        .map(|level| LoggingConfig::with_level(parse_level(&level)))
        .unwrap_or_default();

    if let Some(use_json) = env::var(LOG_JSON_ENV).ok().as_deref().and_then(parse_bool) {
        config.use_json = use_json;
    }
    config
}

pub fn init_from_env() {
    init_logging(config_from_env());
}
