//! Error types for the reconciliation engine
//!
//! Every remote-client and store failure is expressed as an [`Error`].
//! [`Error::kind`] maps it onto the [`FailureKind`] taxonomy the reconciler
//! uses to decide between retrying with backoff and recording a terminal
//! failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// The remote resource (or stored object) does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A create collided with an existing remote resource
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The remote service rejected the call because of a concurrent change
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rate limiting errors
    #[error("Throttled: {0}")]
    Throttled(String),

    /// Timeouts, connection resets, 5xx responses
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// The declared spec cannot be applied as written
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// Authentication errors that will not resolve on their own
    #[error("Authentication failed: {0}")]
    PermanentAuth(String),

    /// Optimistic concurrency check failed on a store write
    #[error("Version conflict on {key}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Object identifier
        key: String,
        /// Version the writer read
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// A referenced managed object is missing or has no remote handle yet
    #[error("Dependency not ready: {0}")]
    DependencyNotReady(String),

    /// Desired-state store errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an "already exists" error
    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a throttling error
    pub fn throttled(msg: impl Into<String>) -> Self {
        Self::Throttled(msg.into())
    }

    /// Create a transient network error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientNetwork(msg.into())
    }

    /// Create an invalid spec error
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::PermanentAuth(msg.into())
    }

    /// Create a dependency error
    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::DependencyNotReady(msg.into())
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify this error
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::NotFound(_) => FailureKind::NotFound,
            Error::AlreadyExists(_) | Error::Conflict(_) => FailureKind::Conflict,
            Error::Throttled(_) => FailureKind::Throttled,
            Error::TransientNetwork(_) | Error::Io(_) => FailureKind::TransientNetwork,
            Error::InvalidSpec(_) | Error::Json(_) | Error::Config(_) => FailureKind::InvalidSpec,
            Error::PermanentAuth(_) => FailureKind::PermanentAuth,
            Error::VersionConflict { .. } => FailureKind::VersionConflict,
            Error::DependencyNotReady(_) => FailureKind::DependencyNotReady,
            Error::StateStore(_) => FailureKind::Store,
            Error::Other(_) => FailureKind::Internal,
        }
    }

    /// True for remote or stored "does not exist" results
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

/// Failure classification carried by a failed reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Remote resource missing where it was required
    NotFound,
    /// A previous attempt partially succeeded or a concurrent change won
    Conflict,
    /// Remote rate limiting
    Throttled,
    /// Timeouts and unreachable endpoints
    TransientNetwork,
    /// Spec rejected locally or by the remote service
    InvalidSpec,
    /// Credentials rejected
    PermanentAuth,
    /// Store write lost an optimistic concurrency race
    VersionConflict,
    /// Referenced object not yet created
    DependencyNotReady,
    /// Store unavailable
    Store,
    /// Anything else
    Internal,
}

impl FailureKind {
    /// Whether a failure of this kind is retried automatically
    pub fn is_retryable(self) -> bool {
        !matches!(self, FailureKind::InvalidSpec | FailureKind::PermanentAuth)
    }

    /// Condition reason recorded for this failure
    pub fn reason(self) -> &'static str {
        match self {
            FailureKind::NotFound => "NotFound",
            FailureKind::Conflict => "Conflict",
            FailureKind::Throttled => "Throttled",
            FailureKind::TransientNetwork => "TransientNetwork",
            FailureKind::InvalidSpec => "InvalidSpec",
            FailureKind::PermanentAuth => "PermanentAuth",
            FailureKind::VersionConflict => "VersionConflict",
            FailureKind::DependencyNotReady => "DependencyNotReady",
            FailureKind::Store => "StoreUnavailable",
            FailureKind::Internal => "InternalError",
        }
    }

    /// Inverse of [`FailureKind::reason`]
    pub fn from_reason(reason: &str) -> Option<Self> {
        [
            FailureKind::NotFound,
            FailureKind::Conflict,
            FailureKind::Throttled,
            FailureKind::TransientNetwork,
            FailureKind::InvalidSpec,
            FailureKind::PermanentAuth,
            FailureKind::VersionConflict,
            FailureKind::DependencyNotReady,
            FailureKind::Store,
            FailureKind::Internal,
        ]
        .into_iter()
        .find(|kind| kind.reason() == reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_split() {
        assert!(Error::throttled("slow down").kind().is_retryable());
        assert!(Error::transient("reset").kind().is_retryable());
        assert!(Error::conflict("busy").kind().is_retryable());
        assert!(Error::already_exists("dup").kind().is_retryable());
        assert!(!Error::invalid_spec("bad").kind().is_retryable());
        assert!(!Error::auth("denied").kind().is_retryable());
    }

    #[test]
    fn test_reason_round_trip() {
        for kind in [FailureKind::Throttled, FailureKind::InvalidSpec, FailureKind::Store] {
            assert_eq!(FailureKind::from_reason(kind.reason()), Some(kind));
        }
        assert_eq!(FailureKind::from_reason("Synced"), None);
    }
}
