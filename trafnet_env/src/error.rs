//! Error types for the trafnet environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// A textual id or state could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl EnvError {
    /// Creates a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }
}
