//! Transport error types.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Scheme not served by this transport (`coaps` needs a DTLS transport)
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Response message id {actual} does not match request {expected}")]
    MessageIdMismatch { expected: u16, actual: u16 },

    #[error("Request {0} was reset by the peer")]
    Reset(u16),
}

pub type TransportResult<T> = Result<T, TransportError>;
