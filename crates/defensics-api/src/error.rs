//! Transport-level failures of the API facade

use thiserror::Error;

/// A failed round-trip to the API server
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established or was dropped
    #[error("connection to {url} failed: {message}")]
    Connect {
        url: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Request did not complete within the client timeout
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// Server answered with a non-2xx status
    #[error("{operation} failed with HTTP {status}: {message}")]
    Status {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// Response body could not be decoded
    #[error("failed to decode {operation} response: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },

    /// Client could not be constructed or the request could not be built
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl TransportError {
    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Connect { .. } | TransportError::Timeout { .. } => true,
            TransportError::Status { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            TransportError::Decode { .. } | TransportError::InvalidRequest { .. } => false,
        }
    }
}
