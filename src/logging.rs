// Logging module - tracing subscriber setup with a reloadable level
//
// Logs go to stdout and can be captured by systemd. Under systemd (INVOCATION_ID set)
// records are emitted as JSON; on a terminal they are human-readable with colors.
// The level filter sits behind a reload layer so a configuration reload can
// change verbosity without restarting the process.

use serde::Deserialize;
use std::env;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, reload, EnvFilter, Registry};

/// Errors raised while installing or updating the subscriber
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("failed to install global subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),

    #[error("failed to update log level: {0}")]
    Reload(#[from] reload::Error),
}

/// Log level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing level filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!(
                "unknown log level '{}', expected one of: trace, debug, info, warn, error",
                other
            )),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    // `Self::Error` would be ambiguous with the `Error` level variant
    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

/// Handle for changing the active log level at runtime
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    /// Replaces the active filter with one for `level`
    pub fn set_level(&self, level: LogLevel) -> Result<(), LoggingError> {
        self.handle.reload(EnvFilter::new(level.as_str()))?;
        Ok(())
    }

    /// Returns the active filter directives, if the subscriber is still alive
    pub fn current(&self) -> Option<String> {
        self.handle.with_current(|filter| filter.to_string()).ok()
    }
}

impl fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogHandle")
            .field("current", &self.current())
            .finish()
    }
}

/// Builds the reloadable level filter layer and its handle
///
/// `RUST_LOG`, when set, takes precedence over `level` for the initial filter.
pub fn reloadable_filter(level: LogLevel) -> (reload::Layer<EnvFilter, Registry>, LogHandle) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let (layer, handle) = reload::Layer::new(env_filter);
    (layer, LogHandle { handle })
}

/// Initializes the global logging subsystem
///
/// # Log Levels
/// Starts at `level`, can be overridden with the RUST_LOG environment variable and
/// changed later through the returned [`LogHandle`].
///
/// # Examples
/// ```bash
/// RUST_LOG=debug metrics-runtime ...  # Enable debug logging
/// ```
pub fn init_logging(level: LogLevel) -> Result<LogHandle, LoggingError> {
    // Systemd sets INVOCATION_ID environment variable
    let is_systemd = env::var("INVOCATION_ID").is_ok();

    let (filter, handle) = reloadable_filter(level);

    if is_systemd {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .try_init()?;
    }

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        let cases = [
            ("debug", LogLevel::Debug),
            ("DEBUG", LogLevel::Debug),
            ("info", LogLevel::Info),
            ("Warn", LogLevel::Warn),
            ("warning", LogLevel::Warn),
            ("error", LogLevel::Error),
            ("trace", LogLevel::Trace),
        ];
        for (input, want) in cases {
            assert_eq!(input.parse::<LogLevel>(), Ok(want), "input {input:?}");
        }
        assert!("loud".parse::<LogLevel>().is_err());
        assert!("".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_level_try_from_string() {
        assert_eq!(LogLevel::try_from("WARNING".to_string()), Ok(LogLevel::Warn));
        assert_eq!(LogLevel::try_from("error".to_string()), Ok(LogLevel::Error));
        assert!(LogLevel::try_from("loud".to_string()).is_err());

        let level: LogLevel = serde_json::from_str("\"debug\"").unwrap();
        assert_eq!(level, LogLevel::Debug);
        assert!(serde_json::from_str::<LogLevel>("\"loud\"").is_err());
    }

    #[test]
    fn test_log_handle_updates_level() {
        let (layer, handle) = reloadable_filter(LogLevel::Info);
        let _subscriber = tracing_subscriber::registry().with(layer);

        handle.set_level(LogLevel::Debug).unwrap();
        assert_eq!(handle.current().as_deref(), Some("debug"));

        handle.set_level(LogLevel::Error).unwrap();
        assert_eq!(handle.current().as_deref(), Some("error"));
    }

    #[test]
    fn test_log_handle_without_subscriber() {
        let (layer, handle) = reloadable_filter(LogLevel::Info);
        drop(layer);
        assert!(handle.set_level(LogLevel::Debug).is_err());
        assert_eq!(handle.current(), None);
    }
}
