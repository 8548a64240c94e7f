//! Error handling for the proof-of-work simulator
//!
//! Fatal error types only. A rejected candidate is not an error: the validator
//! reports it as a [`crate::validator::Rejection`] and keeps running.

use thiserror::Error;

/// Result type alias for simulator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the simulator
#[derive(Error, Debug)]
pub enum Error {
    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors, including failure to spawn a thread
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Worker errors
    #[error("Worker error: {worker_type}: {message}")]
    Worker { worker_type: String, message: String },

    /// A spawned task failed to complete
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A dedicated OS thread panicked
    #[error("Thread panicked: {thread}")]
    ThreadPanicked { thread: String },

    /// Invalid state errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a worker error
    pub fn worker(worker_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Worker {
            worker_type: worker_type.into(),
            message: message.into(),
        }
    }

    /// Create a thread panic error
    pub fn thread_panicked(thread: impl Into<String>) -> Self {
        Self::ThreadPanicked {
            thread: thread.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Whether the error can only happen before any mining starts
    pub fn is_startup(&self) -> bool {
        matches!(self, Error::Config { .. } | Error::Yaml(_) | Error::Json(_))
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Io(_) => "io",
            Error::Config { .. } => "config",
            Error::Worker { .. } => "worker",
            Error::Join(_) => "join",
            Error::ThreadPanicked { .. } => "thread_panicked",
            Error::InvalidState { .. } => "invalid_state",
        }
    }
}
