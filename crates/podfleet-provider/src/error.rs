//! Error types for the pod provisioning client.

use thiserror::Error;

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors returned by a [`PodProvider`](crate::PodProvider).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider API answered with a non-2xx status.
    #[error("provider API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The HTTP request itself failed (connect, TLS, timeout).
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to parse provider response: {0}")]
    Parse(String),

    #[error("pod not found: {0}")]
    NotFound(String),
}

impl ProviderError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::Api { status: 404, .. })
    }
}
