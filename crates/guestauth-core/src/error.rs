//! Error types for the trust broker core.
//!
//! The broker collapses its many internal failure causes into a small set of
//! abstract kinds. Only the kind and a short message ever reach the wire;
//! detailed causes are logged locally so that a remote caller cannot use the
//! error surface as an oracle into which security check failed.
//!
//! # Error Classification
//!
//! - **Caller errors**: [`ServiceError::InvalidArgument`],
//!   [`ServiceError::InvalidCertificate`], [`ServiceError::NoSuchUser`],
//!   [`ServiceError::MultipleMappings`]
//! - **Security outcomes**: [`ServiceError::AuthenticationDenied`],
//!   [`ServiceError::PermissionDenied`], [`ServiceError::SecurityViolation`]
//! - **Infrastructure**: [`ServiceError::CommunicationFailure`],
//!   [`ServiceError::InternalFailure`]

use std::io;

use thiserror::Error;

/// Abstract error kinds for broker operations.
///
/// Each variant has a stable numeric wire code (see [`ServiceError::wire_code`])
/// so replies stay parseable across versions.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A request argument was missing or malformed.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Description of the offending argument.
        reason: String,
    },

    /// A certificate could not be parsed as PEM/DER.
    #[error("invalid certificate: {reason}")]
    InvalidCertificate {
        /// Description of the parse failure.
        reason: String,
    },

    /// A named OS user does not exist.
    #[error("no such user: {user}")]
    NoSuchUser {
        /// The user name that failed to resolve.
        user: String,
    },

    /// The same (certificate, subject) pair maps to more than one user.
    #[error("certificate and subject map to multiple users")]
    MultipleMappings,

    /// Generic authentication failure.
    ///
    /// Deliberately carries no detail: the specific failed check is logged
    /// locally but never placed on the wire.
    #[error("authentication denied")]
    AuthenticationDenied,

    /// The requester is not allowed to perform this operation.
    #[error("permission denied")]
    PermissionDenied,

    /// Store integrity violation: unexpected owner, mode, type, or size on a
    /// trust-sensitive file, or a check/use metadata mismatch.
    ///
    /// Must be audited; the offending file is quarantined rather than used.
    #[error("security violation on {path}: {reason}")]
    SecurityViolation {
        /// Path of the offending file.
        path: String,
        /// What failed verification.
        reason: String,
    },

    /// Transport or protocol failure; the connection is closed.
    #[error("communication failure: {reason}")]
    CommunicationFailure {
        /// Description of the failure.
        reason: String,
    },

    /// Unexpected internal failure (I/O, resource exhaustion).
    ///
    /// Aborts only the current request, never the process.
    #[error("internal failure: {reason}")]
    InternalFailure {
        /// Description of the failure.
        reason: String,
    },
}

impl ServiceError {
    /// Create an [`ServiceError::InvalidArgument`] error.
    #[must_use]
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create an [`ServiceError::InvalidCertificate`] error.
    #[must_use]
    pub fn invalid_certificate(reason: impl Into<String>) -> Self {
        Self::InvalidCertificate {
            reason: reason.into(),
        }
    }

    /// Create a [`ServiceError::NoSuchUser`] error.
    #[must_use]
    pub fn no_such_user(user: impl Into<String>) -> Self {
        Self::NoSuchUser { user: user.into() }
    }

    /// Create a [`ServiceError::SecurityViolation`] error.
    #[must_use]
    pub fn security_violation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SecurityViolation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an [`ServiceError::InternalFailure`] error.
    #[must_use]
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::InternalFailure {
            reason: reason.into(),
        }
    }

    /// Stable numeric code placed on the wire in error replies.
    #[must_use]
    pub const fn wire_code(&self) -> u32 {
        match self {
            Self::InvalidArgument { .. } => 1,
            Self::InvalidCertificate { .. } => 2,
            Self::NoSuchUser { .. } => 3,
            Self::MultipleMappings => 4,
            Self::AuthenticationDenied => 5,
            Self::PermissionDenied => 6,
            Self::SecurityViolation { .. } => 7,
            Self::CommunicationFailure { .. } => 8,
            Self::InternalFailure { .. } => 9,
        }
    }

    /// Returns `true` if this error must be routed to the audit sink.
    #[must_use]
    pub const fn is_security_violation(&self) -> bool {
        matches!(self, Self::SecurityViolation { .. })
    }

    /// Message safe to place on the wire.
    ///
    /// Authentication failures are reduced to a fixed string regardless of
    /// cause; everything else uses the display form.
    #[must_use]
    pub fn wire_message(&self) -> String {
        match self {
            Self::AuthenticationDenied => "authentication denied".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<io::Error> for ServiceError {
    fn from(e: io::Error) -> Self {
        Self::InternalFailure {
            reason: format!("I/O error: {e}"),
        }
    }
}

/// Result type for broker operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
