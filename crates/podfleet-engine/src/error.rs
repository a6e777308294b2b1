//! Error types for the engine client.

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine refused the submitted job.
    #[error("engine rejected job (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Request parameters could not be turned into a job payload.
    #[error("invalid workflow parameters: {0}")]
    InvalidParameters(String),

    /// Transport-level failure talking to the engine.
    #[error("engine request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The engine answered with a non-2xx status outside of submission.
    #[error("engine API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse engine response: {0}")]
    Parse(String),
}
