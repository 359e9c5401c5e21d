//! Error types for the streaming engine.

use std::time::Duration;

use thiserror::Error;

/// Transport-level failure of a streaming request.
///
/// Tool-level failures never show up here; they are folded into session
/// state by the reconciler.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection or body read failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("API request failed: {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, if it could be read.
        body: String,
    },

    /// The overall request deadline elapsed.
    #[error("Request timed out after {0:?} - the server may be warming up")]
    Timeout(Duration),

    /// The event stream could not be decoded.
    #[error("Stream decode error: {0}")]
    Decode(#[from] std::io::Error),

    /// Invalid backend URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl TransportError {
    /// Whether the transport may transparently restart the request.
    ///
    /// Status failures are final; everything that looks like a dropped or
    /// stalled connection is retried within the configured budget.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout(_) | Self::Decode(_))
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
