//! Relay error types.

use thiserror::Error;

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Error type for relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The message envelope could not be decoded or failed validation.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The credential referenced by an envelope could not be resolved.
    #[error("Credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// The outbound call did not produce a status code.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// The target answered with a 4xx/5xx status.
    #[error("Target rejected the request with status {0}")]
    TargetRejected(u16),

    /// A required dead-letter stream does not exist or is not active.
    #[error("Prerequisite missing: {0}")]
    PrerequisiteMissing(String),

    /// The stream service failed.
    #[error("Stream error: {0}")]
    Stream(String),

    /// An entry-point request body was invalid.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns true when the error aborts a whole batch rather than one message.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::PrerequisiteMissing(_) | RelayError::InvalidRequest(_) | RelayError::Config(_)
        )
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::MalformedEnvelope(err.to_string())
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RelayError::TransportFailure(format!("request timed out: {}", err))
        } else {
            RelayError::TransportFailure(err.to_string())
        }
    }
}
