//! Query requests and outcomes.

use std::borrow::Cow;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

/// A query to run against one object on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// Query text (opaque to this crate).
    pub query: String,
    /// Target object id.
    pub object_id: u32,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, object_id: u32) -> Self {
        Self {
            query: query.into(),
            object_id,
        }
    }

    /// Query text as sent on the wire.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.query.as_bytes()
    }
}

/// Plan registered by the controller for a submitted query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    /// Id assigned at plan submission.
    pub plan_id: u32,
    /// Result size declared at plan submission.
    pub total_result_size: u32,
}

/// Result size declared at plan submission vs. reported at fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeMismatch {
    pub declared: u32,
    pub observed: u32,
}

/// Outcome of a completed session.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    /// Result bytes, exactly `bytes_transferred` long.
    pub result: Bytes,
    pub plan: ExecutionPlan,
    /// Bytes the controller wrote into the buffer.
    pub bytes_transferred: u32,
    /// Result size the controller reported at fetch.
    pub bytes_available: u32,
    /// Set when the two reported sizes disagree.
    pub size_mismatch: Option<SizeMismatch>,
    pub elapsed: Duration,
}

impl QueryOutcome {
    /// Result as text (CSV).
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.result)
    }

    /// Check if the whole result fit into the buffer.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.bytes_transferred >= self.bytes_available
    }

    /// Serializable summary (without the result bytes).
    pub fn summary(&self) -> OutcomeSummary {
        OutcomeSummary {
            plan: self.plan,
            bytes_transferred: self.bytes_transferred,
            bytes_available: self.bytes_available,
            size_mismatch: self.size_mismatch,
            complete: self.is_complete(),
            elapsed_us: self.elapsed.as_micros().min(u128::from(u64::MAX)) as u64,
        }
    }
}

/// JSON-friendly view of a [`QueryOutcome`].
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeSummary {
    pub plan: ExecutionPlan,
    pub bytes_transferred: u32,
    pub bytes_available: u32,
    pub size_mismatch: Option<SizeMismatch>,
    pub complete: bool,
    pub elapsed_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(transferred: u32, available: u32) -> QueryOutcome {
        QueryOutcome {
            result: Bytes::from(vec![b'x'; transferred as usize]),
            plan: ExecutionPlan {
                plan_id: 1,
                total_result_size: available,
            },
            bytes_transferred: transferred,
            bytes_available: available,
            size_mismatch: None,
            elapsed: Duration::from_micros(15),
        }
    }

    #[test]
    fn test_text_and_completeness() {
        let o = outcome(3, 3);
        assert_eq!(o.text(), "xxx");
        assert!(o.is_complete());
        assert!(!outcome(4096, 5000).is_complete());
    }

    #[test]
    fn test_summary_json() {
        let json = serde_json::to_value(outcome(3, 3).summary()).unwrap();
        assert_eq!(json["plan"]["plan_id"], 1);
        assert_eq!(json["bytes_transferred"], 3);
        assert_eq!(json["size_mismatch"], serde_json::Value::Null);
        assert_eq!(json["elapsed_us"], 15);
    }
}
