// Error types shared by the pipeline and the runtime controller

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Error type returned by backends and collectors
///
/// Concrete backends wrap external client libraries, so any error type is accepted.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while delivering data points to backends
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("backend '{backend}' failed to initialize: {source}")]
    Initialize { backend: String, source: BoxError },

    #[error("backend '{backend}' write failed after {attempts} attempt(s): {source}")]
    Write {
        backend: String,
        attempts: u32,
        source: BoxError,
    },

    #[error("backend '{backend}' failed to close: {source}")]
    Close { backend: String, source: BoxError },

    #[error("backend '{backend}' did not close within {timeout:?}")]
    CloseTimedOut { backend: String, timeout: Duration },

    #[error("final flush did not complete within {0:?}")]
    DrainTimedOut(Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("pipeline already started")]
    AlreadyStarted,
}

/// Errors that abort a monitor run
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("no backends configured (register one with backend() or enable echo)")]
    NoBackends,

    #[error("failed to start pipeline: {0}")]
    Start(#[source] PipelineError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("monitor has already been run")]
    AlreadyRunning,
}
