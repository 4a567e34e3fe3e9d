//! Error types for the buildwatch system
//!
//! This module defines all error types used throughout the crate.
//!
//! Failures are contained at the boundary they occur on: a fetch error for
//! one product never aborts the other products in a cycle, and a delivery
//! error at one destination never blocks the remaining destinations. Only
//! store persistence failures escalate to [`Error::FatalCycle`], since every
//! later decision depends on a readable, writable store.

use thiserror::Error;

/// Result type alias for buildwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the buildwatch system
#[derive(Error, Debug)]
pub enum Error {
    /// Connection or timeout failure talking to the version endpoint
    #[error("connect error for '{product}': {message}")]
    Connect {
        /// Product whose fetch failed
        product: String,
        /// Underlying transport message
        message: String,
    },

    /// Non-2xx status from the version endpoint
    #[error("version endpoint returned status {status} for '{product}'")]
    HttpStatus {
        /// Product whose fetch failed
        product: String,
        /// HTTP status code
        status: u16,
    },

    /// Response body too short to contain a header and a data row
    #[error("empty version response for '{product}'")]
    EmptyResponse {
        /// Product whose fetch failed
        product: String,
    },

    /// Response body present but missing expected columns or the seqn marker
    #[error("malformed version record for '{product}': {reason}")]
    MalformedRecord {
        /// Product whose fetch failed
        product: String,
        /// What was missing or garbled
        reason: String,
    },

    /// Build store persistence errors
    #[error("store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Delivery failure at a single destination
    #[error("destination error ({destination}): {message}")]
    Destination {
        /// Destination identifier (channel, user, or platform name)
        destination: String,
        /// Error message
        message: String,
    },

    /// Unexpected error escaping a whole poll cycle
    #[error("fatal cycle error: {0}")]
    FatalCycle(String),

    /// I/O errors from the store backend
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a connect error
    pub fn connect(product: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            product: product.into(),
            message: message.into(),
        }
    }

    /// Create an HTTP status error
    pub fn http_status(product: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            product: product.into(),
            status,
        }
    }

    /// Create an empty-response error
    pub fn empty_response(product: impl Into<String>) -> Self {
        Self::EmptyResponse {
            product: product.into(),
        }
    }

    /// Create a malformed-record error
    pub fn malformed(product: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            product: product.into(),
            reason: reason.into(),
        }
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a destination error
    pub fn destination(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Destination {
            destination: destination.into(),
            message: message.into(),
        }
    }

    /// Create a fatal cycle error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::FatalCycle(msg.into())
    }

    /// Whether the failure is expected to clear on its own by the next
    /// scheduled cycle (transport-class errors), as opposed to a
    /// structural problem that needs intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::HttpStatus { .. } | Self::EmptyResponse { .. }
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_class_errors_are_retryable() {
        assert!(Error::connect("wow", "timed out").is_retryable());
        assert!(Error::http_status("wow", 503).is_retryable());
        assert!(Error::empty_response("wow").is_retryable());
        assert!(!Error::malformed("wow", "missing BuildId").is_retryable());
        assert!(!Error::store("disk full").is_retryable());
    }
}
