//! Error types for csq-client.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::Status;

/// Which half of the two-phase exchange an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before any command was submitted (allocation, staging).
    Setup,
    /// Write execution plan (`0x95`).
    SubmitPlan,
    /// Get compute result (`0x92`).
    FetchResult,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Setup => write!(f, "setup"),
            Phase::SubmitPlan => write!(f, "plan submission"),
            Phase::FetchResult => write!(f, "result fetch"),
        }
    }
}

/// A completion that carried an error status.
///
/// A plan that failed mid-exchange may leave state on the remote side, so the
/// session never retries on its own; `retryable` is advice for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// Phase whose completion failed.
    pub phase: Phase,
    /// Decoded completion status.
    pub status: Status,
    /// Human-readable status string.
    pub description: String,
    /// Whether the status class permits resubmission.
    pub retryable: bool,
}

impl TransportError {
    /// Build a typed error from a failed completion status.
    pub fn from_status(phase: Phase, status: Status) -> Self {
        Self {
            phase,
            status,
            description: status.description(),
            retryable: status.is_retryable(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "I/O error status during {}: {} (sct={:#x}, sc={:#x}{})",
            self.phase,
            self.description,
            self.status.code_type,
            self.status.code,
            if self.retryable { ", retryable" } else { "" }
        )
    }
}

/// Main error type for all query offload operations.
#[derive(Debug, Error)]
pub enum CsqError {
    /// I/O error (stdout, config files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config, summaries).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed transport identification string.
    #[error("Invalid transport id: {0}")]
    InvalidTransportId(String),

    /// Discovery against the endpoint failed.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// No discovered controller matched the subsystem filter.
    #[error("Cannot find {subnqn}")]
    ControllerNotFound { subnqn: String },

    /// The namespace is missing or inactive.
    #[error("Namespace {nsid} unavailable")]
    NamespaceUnavailable { nsid: u32 },

    /// Queue pair allocation failed.
    #[error("Queue pair allocation failed: {0}")]
    QueuePairAllocation(String),

    /// DMA buffer allocation failed.
    #[error("Buffer allocation of {size} bytes failed")]
    BufferAllocation { size: usize },

    /// Query text does not fit the result buffer.
    #[error("Query of {len} bytes exceeds the {max} byte limit")]
    QueryTooLarge { len: usize, max: usize },

    /// Query text is empty.
    #[error("Query text is empty")]
    EmptyQuery,

    /// The transport refused to queue a command.
    #[error("Submission rejected during {phase}: {reason}")]
    SubmissionRejected { phase: Phase, reason: String },

    /// A completion reported an error status.
    #[error("{0}")]
    Transport(TransportError),

    /// Completion contents violate the wire contract.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No completion arrived within the session timeout.
    #[error("Timed out during {phase} after {elapsed:?}")]
    Timeout { phase: Phase, elapsed: Duration },

    /// The session was cancelled while waiting.
    #[error("Cancelled during {phase}")]
    Cancelled { phase: Phase },

    /// Operation not valid in the current session state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<TransportError> for CsqError {
    fn from(e: TransportError) -> Self {
        CsqError::Transport(e)
    }
}

impl CsqError {
    /// Whether a caller may reasonably resubmit the same request.
    ///
    /// A timeout only counts before any command was submitted. Once a plan
    /// is outstanding the target may have run it, and a resubmission would
    /// run it twice.
    pub fn is_retryable(&self) -> bool {
        match self {
            CsqError::Transport(e) => e.retryable,
            CsqError::Timeout { phase, .. } => *phase == Phase::Setup,
            _ => false,
        }
    }
}

/// Result type alias using CsqError.
pub type Result<T> = std::result::Result<T, CsqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_names_subsystem() {
        let err = CsqError::ControllerNotFound {
            subnqn: "nqn.test:subsystem2".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot find nqn.test:subsystem2");
    }

    #[test]
    fn test_transport_error_keeps_status_text() {
        let status = Status::from_raw(0x0004 << 1);
        let err = CsqError::from(TransportError::from_status(Phase::FetchResult, status));
        let msg = err.to_string();
        assert!(msg.contains("result fetch"));
        assert!(msg.contains("DATA TRANSFER ERROR"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_timeout_retryable_only_before_submission() {
        let timeout = |phase| CsqError::Timeout {
            phase,
            elapsed: Duration::from_millis(5),
        };
        assert!(timeout(Phase::Setup).is_retryable());
        assert!(!timeout(Phase::SubmitPlan).is_retryable());
        assert!(!timeout(Phase::FetchResult).is_retryable());
    }

    #[test]
    fn test_query_too_large_not_retryable() {
        let err = CsqError::QueryTooLarge { len: 5000, max: 4095 };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("4095"));
    }
}
