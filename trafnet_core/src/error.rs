//! Error types for the traffic engine.
//!
//! Only the edges of the engine fail hard: loading a network description or a
//! configuration. Everything that can go wrong while agents drive (missing
//! entries, dead ends, stuck vehicles) is a recycle request, not an error.

use thiserror::Error;

/// Errors raised while building the engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The road network description is unusable as a whole
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A configuration value is out of range or inconsistent
    #[error("Config error: {0}")]
    ConfigError(String),

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading a description file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
