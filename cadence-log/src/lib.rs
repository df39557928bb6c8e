//! Cadence logging setup.
//!
//! Every Cadence crate logs through the `tracing` macros re-exported here,
//! so call sites read `use cadence_log::{debug, info, warn};` and emit
//! structured fields:
//!
//! ```rust
//! use cadence_log::{debug, info};
//!
//! let campaign_id = "cmp_42";
//! info!(campaign_id, reassigned = 12, "Campaign re-slotted");
//! debug!("Cursor advanced to next admissible minute");
//! ```
//!
//! The subscriber is installed once with [`init`]. Its behaviour is read
//! from the environment:
//!
//! - `CADENCE_DEBUG=1` - Enable debug logging
//! - `CADENCE_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `CADENCE_LOG_FORMAT=json|pretty|compact` - Set output format (default json)
//! - `CADENCE_LOG_COLOR=1|0` - Enable/disable ANSI colors
//! - `CADENCE_LOG_TARGET=1|0` - Include the module path of each event
//!
//! A standard `RUST_LOG` directive, when present, overrides the level.

use once_cell::sync::Lazy;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

pub use tracing::{debug, error, info, instrument, trace, warn};

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum level of events that reach the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    /// Nothing is written.
    Off,
}

impl Level {
    /// Parse a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Directive understood by [`EnvFilter`].
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_directive().to_uppercase())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line human readable output
    Pretty,
    /// Single-line output
    Compact,
    /// One JSON object per line
    Json,
}

impl Format {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

static CONFIG: Lazy<LogConfig> = Lazy::new(LogConfig::from_env);

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether ANSI colors are enabled
    pub color: bool,
    /// Whether to include the event target
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false,
            target: true,
        }
    }
}

impl LogConfig {
    /// Read the configuration from `CADENCE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let debug = flag("CADENCE_DEBUG").unwrap_or(false);

        let level = lookup("CADENCE_LOG_LEVEL")
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("CADENCE_LOG_FORMAT")
            .and_then(|s| Format::parse(&s))
            .unwrap_or(Format::Json);

        let color = flag("CADENCE_LOG_COLOR")
            .unwrap_or_else(|| format != Format::Json && lookup("NO_COLOR").is_none());

        let target = flag("CADENCE_LOG_TARGET").unwrap_or(true);

        Self {
            debug,
            level,
            format,
            color,
            target,
        }
    }

    /// Filter directive derived from the level and debug flag.
    pub fn directive(&self) -> &'static str {
        if self.debug && self.level > Level::Debug {
            Level::Debug.as_directive()
        } else {
            self.level.as_directive()
        }
    }

    fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let base = fmt::layer()
            .with_target(self.target)
            .with_ansi(self.color)
            .with_writer(std::io::stderr);

        match self.format {
            Format::Json => base.json().boxed(),
            Format::Pretty => base.pretty().boxed(),
            Format::Compact => base.compact().boxed(),
        }
    }
}

/// Get the global configuration.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

/// Install the global subscriber from the environment configuration.
///
/// Safe to call more than once; only the first call has an effect.
pub fn init() {
    let _ = try_init();
}

/// Install the global subscriber, returning `true` if this call installed it.
pub fn try_init() -> bool {
    try_init_with(config())
}

/// Install the global subscriber with an explicit configuration.
pub fn try_init_with(config: &LogConfig) -> bool {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return false;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directive()));

    let installed = tracing_subscriber::registry()
        .with(config.layer())
        .with(filter)
        .try_init()
        .is_ok();

    if !installed {
        // Another subscriber was set by the host application.
        INSTALLED.store(false, Ordering::SeqCst);
    }
    installed
}

/// Whether a Cadence subscriber has been installed.
pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::SeqCst)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Off);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("debug"), Some(Level::Debug));
        assert_eq!(Level::parse("DEBUG"), Some(Level::Debug));
        assert_eq!(Level::parse("warning"), Some(Level::Warn));
        assert_eq!(Level::parse("none"), Some(Level::Off));
        assert_eq!(Level::parse("loud"), None);
        assert_eq!(Level::Warn.to_string(), "WARN");
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(Format::parse("pretty"), Some(Format::Pretty));
        assert_eq!(Format::parse(" Compact "), Some(Format::Compact));
        assert_eq!(Format::parse("json"), Some(Format::Json));
        assert_eq!(Format::parse("xml"), None);
    }

    #[test]
    fn test_defaults_without_env() {
        let config = LogConfig::from_lookup(lookup(&[]));
        assert_eq!(config.level, Level::Info);
        assert_eq!(config.format, Format::Json);
        assert!(!config.color);
        assert!(config.target);
        assert_eq!(config.directive(), "info");
    }

    #[test]
    fn test_debug_flag_lowers_level() {
        let config = LogConfig::from_lookup(lookup(&[("CADENCE_DEBUG", "true")]));
        assert!(config.debug);
        assert_eq!(config.level, Level::Debug);

        let config = LogConfig::from_lookup(lookup(&[
            ("CADENCE_DEBUG", "1"),
            ("CADENCE_LOG_LEVEL", "error"),
        ]));
        assert_eq!(config.level, Level::Error);
        assert_eq!(config.directive(), "debug");
    }

    #[test]
    fn test_pretty_format_colors_unless_disabled() {
        let config = LogConfig::from_lookup(lookup(&[("CADENCE_LOG_FORMAT", "pretty")]));
        assert!(config.color);

        let config = LogConfig::from_lookup(lookup(&[
            ("CADENCE_LOG_FORMAT", "pretty"),
            ("NO_COLOR", "1"),
        ]));
        assert!(!config.color);
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        assert!(!try_init());
        info!(check = "idempotent", "logging initialized");
    }
}
