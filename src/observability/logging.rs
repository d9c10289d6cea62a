//! Logging setup and span macros
//!
//! Settings come from the environment:
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO (default), DEBUG or TRACE
//! - `LOG_FORMAT`: `compact` (default, one line per event, suits journald),
//!   `pretty` or `json`
//! - `LOG_SPANS`: `true` to also log span open/close
//! - `RUST_LOG`: replaces the computed filter entirely
//!
//! ```bash
//! LOG_LEVEL=DEBUG ./luxagent run
//! LOG_FORMAT=json ./luxagent run | jq .
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Newline-delimited JSON
    Json,
    /// Multi-line, colored
    Pretty,
    /// Single line, colored, no targets
    #[default]
    Compact,
}

impl LogFormat {
    /// Case-insensitive; anything unrecognized falls back to compact
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

/// Everything needed to install the global subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: Level,
    pub format: LogFormat,
    pub include_spans: bool,
    /// Raw `RUST_LOG` directive, used instead of `level` when set
    pub directive: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::default(),
            include_spans: false,
            directive: None,
        }
    }
}

impl LoggingSettings {
    /// Read settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read settings through `lookup`, which maps a variable name to its value
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            level: lookup("LOG_LEVEL")
                .map(|value| parse_level(&value))
                .unwrap_or(defaults.level),
            format: lookup("LOG_FORMAT")
                .map(|value| LogFormat::parse(&value))
                .unwrap_or(defaults.format),
            include_spans: lookup("LOG_SPANS")
                .is_some_and(|value| value.trim().eq_ignore_ascii_case("true")),
            directive: lookup("RUST_LOG").filter(|value| !value.trim().is_empty()),
        }
    }

    /// `-v` raises the level to DEBUG, `-vv` to TRACE; never lowers it
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        let requested = match verbose {
            0 => return self,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        // tracing orders levels by verbosity: TRACE > DEBUG > INFO
        if requested > self.level {
            self.level = requested;
        }
        self
    }

    /// Filter for the agent with rumqttc and tokio kept at WARN
    pub fn filter(&self) -> EnvFilter {
        match &self.directive {
            Some(directive) => EnvFilter::new(directive),
            None => EnvFilter::new(format!("{},rumqttc=warn,tokio=warn", self.level)),
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install the global subscriber. Call once, before the agent starts.
pub fn init_logging(settings: &LoggingSettings) {
    let registry = tracing_subscriber::registry().with(settings.filter());
    let span_events = settings.span_events();

    match settings.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_span_events(span_events))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_span_events(span_events))
            .init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_span_events(span_events),
            )
            .init(),
    }
}

/// Install the global subscriber from the environment
pub fn init_default_logging() {
    init_logging(&LoggingSettings::from_env());
}

/// Parse a `LOG_LEVEL` value, defaulting to INFO
pub fn parse_level(value: &str) -> Level {
    match value.trim().to_ascii_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Span around one wireless reconnect
#[macro_export]
macro_rules! link_span {
    ($($field:tt)*) => {
        tracing::info_span!("wireless_link", $($field)*)
    };
}

/// Span around one broker session attempt
#[macro_export]
macro_rules! session_span {
    ($($field:tt)*) => {
        tracing::info_span!("broker_session", $($field)*)
    };
}

/// Span around one control loop tick
#[macro_export]
macro_rules! tick_span {
    ($($field:tt)*) => {
        tracing::debug_span!("control_tick", $($field)*)
    };
}

pub use {link_span, session_span, tick_span};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> LoggingSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LoggingSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("Compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse(" json\n"), LogFormat::Json);
    }

    #[test]
    fn test_unknown_format_falls_back_to_compact() {
        assert_eq!(LogFormat::parse("xml"), LogFormat::Compact);
        assert_eq!(LogFormat::parse(""), LogFormat::Compact);
    }

    #[test]
    fn test_parse_level() {
        let cases = [
            ("ERROR", Level::ERROR),
            ("warn", Level::WARN),
            ("Debug", Level::DEBUG),
            ("TRACE", Level::TRACE),
            ("verbose", Level::INFO),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_level(input), expected, "input: {input}");
        }
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        assert_eq!(settings_from(&[]), LoggingSettings::default());
    }

    #[test]
    fn test_settings_from_environment() {
        let settings = settings_from(&[
            ("LOG_LEVEL", "warn"),
            ("LOG_FORMAT", "json"),
            ("LOG_SPANS", "TRUE"),
        ]);
        assert_eq!(settings.level, Level::WARN);
        assert_eq!(settings.format, LogFormat::Json);
        assert!(settings.include_spans);
        assert_eq!(settings.directive, None);
    }

    #[test]
    fn test_only_true_enables_spans() {
        for value in ["1", "yes", "", "false"] {
            assert!(!settings_from(&[("LOG_SPANS", value)]).include_spans);
        }
    }

    #[test]
    fn test_verbosity_only_raises_level() {
        let quiet = LoggingSettings::default();
        assert_eq!(quiet.clone().with_verbosity(0).level, Level::INFO);
        assert_eq!(quiet.clone().with_verbosity(1).level, Level::DEBUG);
        assert_eq!(quiet.with_verbosity(3).level, Level::TRACE);

        let tracing = settings_from(&[("LOG_LEVEL", "trace")]);
        assert_eq!(tracing.with_verbosity(1).level, Level::TRACE);
    }

    #[test]
    fn test_filter_quiets_dependencies() {
        let filter = LoggingSettings::default().filter().to_string();
        assert!(filter.contains("rumqttc=warn"));
        assert!(filter.contains("tokio=warn"));
    }

    #[test]
    fn test_rust_log_replaces_filter() {
        let settings = settings_from(&[("RUST_LOG", "luxagent=trace")]);
        let filter = settings.filter().to_string();
        assert!(filter.contains("luxagent=trace"));
        assert!(!filter.contains("rumqttc"));
    }
}
