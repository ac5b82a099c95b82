//! Protocol error types for the wire layer.
//!
//! These cover framing and parse failures on a connection. Semantic
//! failures (bad certificate, denied authentication) are
//! [`guestauth_core::error::ServiceError`] values and travel back to the
//! client inside an error reply; protocol violations instead terminate the
//! connection.

use std::io;

use thiserror::Error;

/// Maximum bytes a connection may buffer while waiting for a complete
/// request document (1 MiB).
pub const MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// Errors on the wire-protocol layer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Pending request bytes exceed [`MAX_REQUEST_SIZE`].
    ///
    /// Detected on the raw buffer, before any XML work, to bound memory.
    #[error("request too large: {size} bytes exceeds maximum {max} bytes")]
    RequestTooLarge {
        /// Buffered byte count.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// The request document is not valid protocol XML.
    ///
    /// Covers syntax errors, unknown or misplaced elements, duplicate
    /// fields, attributes, and forbidden constructs (CDATA, doctype,
    /// processing instructions).
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// What was wrong.
        reason: String,
    },

    /// A required field was missing from a structurally valid request.
    #[error("missing field: {field}")]
    MissingField {
        /// The absent element name.
        field: String,
    },

    /// Peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection sat idle past the configured timeout.
    #[error("connection idle for {seconds}s")]
    IdleTimeout {
        /// Configured idle limit.
        seconds: u64,
    },

    /// Underlying transport error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Create an invalid-request error.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Create a missing-field error.
    #[must_use]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Returns `true` when the peer violated the protocol and the
    /// connection must be dropped rather than answered.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::RequestTooLarge { .. } | Self::InvalidRequest { .. } | Self::MissingField { .. }
        )
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
