//! Error types for the simulation harness.

use thiserror::Error;
use trafnet_core::CoreError;

#[derive(Debug, Error)]
pub enum SimError {
    /// Scenario name not recognised
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    /// Scenario could not be set up
    #[error("Scenario setup failed: {0}")]
    Setup(String),

    #[error("Engine error: {0}")]
    Core(#[from] CoreError),

    /// Map, config or export file I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }
}

pub type SimResult<T> = Result<T, SimError>;
