//! Error taxonomy for the relay.
//!
//! Every failure that crosses the system boundary is rendered as an
//! [`ErrorEnvelope`] carrying exactly one [`ErrorKind`]. Component errors
//! (`StorageError`, `InvocationError`) fold into [`DispatchError`], which
//! knows its kind and how much of itself is safe to reveal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Closed set of error kinds visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Malformed, empty or oversized input.
    ValidationError,
    /// Missing or invalid credentials.
    AuthenticationError,
    /// Unknown route or resource.
    NotFound,
    /// Downstream call exceeded its budget.
    Timeout,
    /// Circuit breaker is open; no downstream attempt was made.
    ServiceUnavailable,
    /// Downstream agent reported a processing failure.
    AgentError,
    /// Anything unexpected or unclassified.
    InternalError,
}

impl ErrorKind {
    /// Wire name, as serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::AuthenticationError => "AUTHENTICATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Timeout => "TIMEOUT",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::AgentError => "AGENT_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// HTTP-style status code for this kind.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ValidationError => 400,
            Self::AuthenticationError => 401,
            Self::NotFound => 404,
            Self::Timeout => 504,
            Self::ServiceUnavailable => 503,
            Self::AgentError | Self::InternalError => 500,
        }
    }

    /// Whether failures of this kind happened on the downstream path and
    /// therefore count against the circuit breaker.
    pub fn is_downstream(&self) -> bool {
        matches!(self, Self::Timeout | Self::AgentError | Self::InternalError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only error shape that leaves the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Failures from a session storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session state could not be decoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend unreachable: {0}")]
    Connection(String),
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Connection(err.to_string())
    }
}

/// Outcome of a failed downstream invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvocationError {
    #[error("Agent invocation exceeded {0:?}")]
    Timeout(Duration),

    #[error("Agent is misconfigured: {0}")]
    Configuration(String),

    #[error("Agent invocation failed: {0}")]
    Invocation(String),
}

/// Everything that can go wrong while dispatching a request.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Circuit breaker open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error("Session storage failed: {0}")]
    Storage(#[from] Arc<StorageError>),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Classify into the caller-visible taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::Authentication(_) => ErrorKind::AuthenticationError,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::CircuitOpen { .. } => ErrorKind::ServiceUnavailable,
            Self::Invocation(InvocationError::Timeout(_)) => ErrorKind::Timeout,
            Self::Invocation(InvocationError::Invocation(_)) => ErrorKind::AgentError,
            Self::Invocation(InvocationError::Configuration(_))
            | Self::Storage(_)
            | Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Message safe to show to any caller.
    ///
    /// Locally resolved failures describe the caller's own mistake and are
    /// shown verbatim; downstream failures get a fixed string.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::Authentication(msg) | Self::NotFound(msg) => msg.clone(),
            Self::CircuitOpen { retry_after } => format!(
                "Agent service is temporarily unavailable, retry in {}s",
                retry_after.as_secs().max(1)
            ),
            Self::Invocation(InvocationError::Timeout(_)) => {
                "The agent did not respond in time".to_string()
            }
            Self::Invocation(InvocationError::Invocation(_)) => {
                "The agent failed to process the request".to_string()
            }
            Self::Invocation(InvocationError::Configuration(_))
            | Self::Storage(_)
            | Self::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Render as an envelope. Internals go into `detail` only when `debug` is set.
    pub fn to_envelope(&self, debug: bool) -> ErrorEnvelope {
        let detail = debug.then(|| {
            json!({
                "cause": self.to_string(),
                "variant": format!("{self:?}"),
            })
        });

        ErrorEnvelope {
            kind: self.kind(),
            message: self.public_message(),
            detail,
            timestamp: Utc::now(),
        }
    }
}

impl From<StorageError> for DispatchError {
    fn from(err: StorageError) -> Self {
        DispatchError::Storage(Arc::new(err))
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorKind::ValidationError.status_code(), 400);
        assert_eq!(ErrorKind::AuthenticationError.status_code(), 401);
        assert_eq!(ErrorKind::NotFound.status_code(), 404);
        assert_eq!(ErrorKind::Timeout.status_code(), 504);
        assert_eq!(ErrorKind::ServiceUnavailable.status_code(), 503);
        assert_eq!(ErrorKind::AgentError.status_code(), 500);
        assert_eq!(ErrorKind::InternalError.status_code(), 500);
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_string(&ErrorKind::ServiceUnavailable).unwrap();
        assert_eq!(json, "\"SERVICE_UNAVAILABLE\"");
        assert_eq!(ErrorKind::Timeout.as_str(), "TIMEOUT");
    }

    #[test]
    fn test_classification() {
        let timeout = DispatchError::from(InvocationError::Timeout(Duration::from_secs(1)));
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        let config = DispatchError::from(InvocationError::Configuration("no key".into()));
        assert_eq!(config.kind(), ErrorKind::InternalError);

        let storage = DispatchError::from(StorageError::Connection("refused".into()));
        assert_eq!(storage.kind(), ErrorKind::InternalError);
        assert!(storage.kind().is_downstream());
        assert!(!ErrorKind::ValidationError.is_downstream());
    }

    #[test]
    fn test_envelope_hides_internals_without_debug() {
        let err = DispatchError::from(InvocationError::Invocation("stack: boom at x.py:3".into()));

        let safe = err.to_envelope(false);
        assert_eq!(safe.kind, ErrorKind::AgentError);
        assert!(!safe.message.contains("boom"));
        assert!(safe.detail.is_none());

        let verbose = err.to_envelope(true);
        let cause = verbose.detail.unwrap()["cause"].as_str().unwrap().to_string();
        assert!(cause.contains("boom"));
    }
}
