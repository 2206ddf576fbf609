//! Error types for the auris pipeline

use thiserror::Error;

/// Errors surfaced by public pipeline operations
#[derive(Error, Debug)]
pub enum AurisError {
    /// Out-of-range argument or an operation in an illegal lifecycle state
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// Configuration failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resource acquisition or thread spawn failed during init
    #[error("Initialisation failed: {0}")]
    Init(String),

    /// The capture source reported an error
    #[error("Capture error: {0}")]
    Capture(String),

    /// The playback sink reported an unrecoverable error
    #[error("Sink error: {0}")]
    Sink(String),
}

/// Result type for auris operations
pub type AurisResult<T> = Result<T, AurisError>;
