// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging initialization.

use std::io;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Environment variable holding a filter directive for this crate's logs.
pub const LOG_ENV: &str = "HOOKWISE_LOG";

/// Configuration for logging initialization.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Level used when neither `HOOKWISE_LOG` nor `RUST_LOG` is set.
    pub default_level: Level,

    /// Whether to log span enter/close events.
    pub include_span_events: bool,

    pub include_file_line: bool,

    pub include_target: bool,

    pub ansi_colors: bool,

    pub compact: bool,

    /// Filter directive overriding the environment and `default_level`.
    pub filter_directive: Option<String>,
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
            filter_directive: None,
        }
    }
}

impl TelemetryConfig {
    /// Verbose output with span events and source locations.
    pub fn development() -> Self {
        Self {
            default_level: Level::DEBUG,
            include_span_events: true,
            include_file_line: true,
            compact: false,
            ..Self::default()
        }
    }

    /// Warnings and errors only, no colors, for log collectors.
    pub fn production() -> Self {
        Self {
            default_level: Level::WARN,
            include_target: false,
            ansi_colors: false,
            ..Self::default()
        }
    }

    pub fn testing() -> Self {
        Self {
            default_level: Level::TRACE,
            ansi_colors: false,
            filter_directive: Some("hookwise=trace".to_string()),
            ..Self::development()
        }
    }

    /// Pick a preset from CLI verbosity flags.
    pub fn from_flags(debug: bool, trace: bool) -> Self {
        if trace {
            Self::development().with_level(Level::TRACE)
        } else if debug {
            Self::development()
        } else {
            Self::default().with_level(Level::WARN)
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_directive = Some(filter.into());
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi_colors = ansi;
        self
    }
}

/// Guard returned by [`init_telemetry`]. Keep it alive for the program's duration.
pub struct TelemetryGuard {
    _private: (),
}

/// Install the global subscriber. Call once at startup.
///
/// Log output goes to stderr so command output on stdout stays clean.
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let fallback = || EnvFilter::new(config.default_level.to_string());
    let filter = match &config.filter_directive {
        Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| fallback()),
        None => EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| fallback()),
    };

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

    let result = if config.compact {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.compact())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
    };
    result.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    Ok(TelemetryGuard { _private: () })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(TelemetryConfig::default().default_level, Level::INFO);
        assert_eq!(TelemetryConfig::development().default_level, Level::DEBUG);
        assert_eq!(TelemetryConfig::production().default_level, Level::WARN);
        let testing = TelemetryConfig::testing();
        assert_eq!(testing.filter_directive.as_deref(), Some("hookwise=trace"));
        assert!(testing.include_span_events);
        assert!(!testing.ansi_colors);
        assert!(!TelemetryConfig::production().include_target);
    }

    #[test]
    fn test_from_flags() {
        assert_eq!(TelemetryConfig::from_flags(false, false).default_level, Level::WARN);
        assert_eq!(TelemetryConfig::from_flags(true, false).default_level, Level::DEBUG);
        assert_eq!(TelemetryConfig::from_flags(true, true).default_level, Level::TRACE);
    }

    #[test]
    fn test_builder() {
        let config = TelemetryConfig::default()
            .with_level(Level::DEBUG)
            .with_filter("hookwise::hook=trace")
            .with_ansi(false);

        assert_eq!(config.default_level, Level::DEBUG);
        assert_eq!(config.filter_directive.as_deref(), Some("hookwise::hook=trace"));
        assert!(!config.ansi_colors);
    }
}
