//! Tracing setup and marker-tagged loggers.

use std::fmt;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable consulted for the log filter before `RUST_LOG`.
pub const LOG_ENV_VAR: &str = "WARDEN_LOG";

/// Filter used when neither environment variable is set.
pub const DEFAULT_FILTER: &str = "warden=info";

/// Marker attached to log lines emitted on behalf of scripts.
pub const SCRIPT_MARKER: &str = "Script";

/// Raised when a global subscriber is already installed.
#[derive(Debug, Error)]
#[error("failed to install tracing subscriber: {message}")]
pub struct LoggingError {
    /// Reason reported by `tracing-subscriber`.
    pub message: String,
}

/// Installs the global `fmt` subscriber writing to stderr.
///
/// The filter comes from `WARDEN_LOG`, then `RUST_LOG`, then `default_filter`.
///
/// # Errors
///
/// Returns [`LoggingError`] when a subscriber is already installed.
pub fn init(default_filter: &str) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| LoggingError {
            message: err.to_string(),
        })
}

/// Named logger that tags every event with a fixed marker.
///
/// Events carry `marker` and `logger` fields so they can be filtered apart
/// from the crate's own output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MarkedLogger {
    name: String,
    marker: &'static str,
}

macro_rules! marked_event {
    ($level:expr, $logger:expr, $message:expr) => {
        tracing::event!(
            $level,
            marker = $logger.marker,
            logger = %$logger.name,
            "{}",
            $message
        )
    };
}

impl MarkedLogger {
    /// Creates a logger called `name` tagging events with `marker`.
    #[must_use]
    pub fn new(name: impl Into<String>, marker: &'static str) -> Self {
        Self {
            name: name.into(),
            marker,
        }
    }

    /// Logger name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Marker attached to every event.
    #[must_use]
    pub const fn marker(&self) -> &'static str {
        self.marker
    }

    /// Logs at trace level.
    pub fn trace(&self, message: impl fmt::Display) {
        marked_event!(Level::TRACE, self, message);
    }

    /// Logs at debug level.
    pub fn debug(&self, message: impl fmt::Display) {
        marked_event!(Level::DEBUG, self, message);
    }

    /// Logs at info level.
    pub fn info(&self, message: impl fmt::Display) {
        marked_event!(Level::INFO, self, message);
    }

    /// Logs at warn level.
    pub fn warn(&self, message: impl fmt::Display) {
        marked_event!(Level::WARN, self, message);
    }

    /// Logs at error level.
    pub fn error(&self, message: impl fmt::Display) {
        marked_event!(Level::ERROR, self, message);
    }

    /// Returns `true` when trace events would be recorded.
    #[must_use]
    pub fn is_trace_enabled(&self) -> bool {
        tracing::enabled!(Level::TRACE)
    }

    /// Returns `true` when debug events would be recorded.
    #[must_use]
    pub fn is_debug_enabled(&self) -> bool {
        tracing::enabled!(Level::DEBUG)
    }

    /// Returns `true` when info events would be recorded.
    #[must_use]
    pub fn is_info_enabled(&self) -> bool {
        tracing::enabled!(Level::INFO)
    }

    /// Returns `true` when warn events would be recorded.
    #[must_use]
    pub fn is_warn_enabled(&self) -> bool {
        tracing::enabled!(Level::WARN)
    }

    /// Returns `true` when error events would be recorded.
    #[must_use]
    pub fn is_error_enabled(&self) -> bool {
        tracing::enabled!(Level::ERROR)
    }
}
