//! error types shared by the chat assistant, config loading and dosing helpers.

use std::time::Duration;

use llm::error::LLMError;
use thiserror::Error;

/// failures of the completion path. none of these escape the chat pipeline:
/// they are turned into the apology entry in the transcript.
#[derive(Debug, Error)]
pub enum ChatError {
    /// the `llm` provider refused to build or failed a request.
    #[error("completion provider error: {0}")]
    Provider(#[from] LLMError),

    /// the response stream broke or yielded something unusable.
    #[error("completion stream error: {0}")]
    Stream(String),

    /// no terminal event arrived within the configured window.
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),

    /// settings could not be turned into a client.
    #[error("invalid chat configuration: {0}")]
    Config(String),
}

/// config file loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}

/// rejected dosing calculator input.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DosingError {
    #[error("concentration must be a positive percentage, got {0}")]
    InvalidConcentration(f64),

    /// bleach that is already at or below the shock target can't be diluted further.
    #[error("concentration {given}% is at or below the {target}% target")]
    BelowTarget { given: f64, target: f64 },

    #[error("volume must be a positive number of liters, got {0}")]
    InvalidVolume(f64),
}
