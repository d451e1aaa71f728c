// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry initialization and configuration.
//!
//! Log output always goes to stderr. Stdout belongs to the stdio transport, and a stray log
//! line there would corrupt the JSON-RPC stream.

use std::io;
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Configuration for telemetry initialization.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Default log level if RUST_LOG is not set.
    pub default_level: Level,

    /// Whether to include span events (enter/exit).
    pub include_span_events: bool,

    /// Whether to include file/line information.
    pub include_file_line: bool,

    /// Whether to include target module path.
    pub include_target: bool,

    /// Whether to use ANSI colors in output.
    pub ansi_colors: bool,

    /// Whether to use compact log format.
    pub compact: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            include_span_events: false,
            include_file_line: false,
            include_target: true,
            ansi_colors: true,
            compact: true,
        }
    }
}

impl TelemetryConfig {
    /// Multi-line events with span enter/exit and source locations.
    pub fn development() -> Self {
        Self {
            default_level: Level::DEBUG,
            include_span_events: true,
            include_file_line: true,
            include_target: true,
            ansi_colors: true,
            compact: false,
        }
    }

    /// Uncolored single lines without module paths, for log collectors.
    pub fn production() -> Self {
        Self {
            default_level: Level::INFO,
            include_span_events: false,
            include_file_line: false,
            include_target: false,
            ansi_colors: false,
            compact: true,
        }
    }

    /// Build from the `logLevel` and `logFormat` config values.
    ///
    /// `full` selects [`development`](Self::development), `plain` selects
    /// [`production`](Self::production), anything else the compact default. Unknown levels
    /// fall back to info.
    pub fn from_settings(level: &str, format: &str) -> Self {
        let level = Level::from_str(level).unwrap_or(Level::INFO);
        let preset = match format {
            "full" => Self::development(),
            "plain" => Self::production(),
            _ => Self::default(),
        };
        preset.with_level(level)
    }

    /// Set the default log level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Enable or disable ANSI colors.
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi_colors = ansi;
        self
    }
}

/// Guard that keeps telemetry installed.
///
/// Keep this guard alive for the duration of your program.
pub struct TelemetryGuard {
    _private: (),
}

/// Initialize telemetry with the given configuration.
///
/// This should be called once at application startup.
///
/// # Example
///
/// ```rust,ignore
/// use dispatch::telemetry::{init_telemetry, TelemetryConfig};
///
/// let _guard = init_telemetry(&TelemetryConfig::from_settings("debug", "compact"))?;
/// ```
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    // RUST_LOG takes precedence over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.to_string()));

    let span_events = if config.include_span_events {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_span_events(span_events);

    if config.compact {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.compact())
            .try_init()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    }

    Ok(TelemetryGuard { _private: () })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.default_level, Level::INFO);
        assert!(config.ansi_colors);
        assert!(config.compact);
    }

    #[test]
    fn test_level_from_settings() {
        assert_eq!(TelemetryConfig::from_settings("debug", "compact").default_level, Level::DEBUG);
        assert_eq!(TelemetryConfig::from_settings("WARN", "compact").default_level, Level::WARN);
        assert_eq!(TelemetryConfig::from_settings("bogus", "compact").default_level, Level::INFO);
    }

    #[test]
    fn test_format_selects_preset() {
        let full = TelemetryConfig::from_settings("info", "full");
        assert!(!full.compact);
        assert!(full.include_span_events && full.include_file_line);
        // The configured level wins over the preset's own.
        assert_eq!(full.default_level, Level::INFO);

        let plain = TelemetryConfig::from_settings("warn", "plain");
        assert!(!plain.ansi_colors);
        assert!(!plain.include_target);
        assert_eq!(plain.default_level, Level::WARN);

        assert!(TelemetryConfig::from_settings("info", "compact").compact);
    }

    #[test]
    fn test_with_ansi() {
        assert!(!TelemetryConfig::default().with_ansi(false).ansi_colors);
    }
}
