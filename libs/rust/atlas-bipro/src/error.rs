//! Error taxonomy for the transfer pipeline

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by STS, TransferService and orchestrator operations.
///
/// The taxonomy drives retry behavior: only [`Throttled`](Self::Throttled)
/// and [`Transient`](Self::Transient) are retried, everything else is
/// propagated immediately.
#[derive(Debug, Error)]
pub enum TransferError {
    /// STS or transport authentication failed. The cached token has been
    /// invalidated; the caller must re-authenticate.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The carrier asked us to slow down (HTTP 429 or a BiPRO throttle
    /// fault).
    #[error("throttled by carrier")]
    Throttled {
        /// Parsed `Retry-After`, if the carrier sent one.
        retry_after: Option<Duration>,
    },

    /// The shipment id is unknown to the carrier.
    #[error("shipment not found: {0}")]
    NotFound(String),

    /// Connection-level failure or HTTP 5xx; retried with backoff.
    #[error("transient transport error: {0}")]
    Transient(String),

    /// The operation was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,

    /// Schema or parse error; aborts the single operation, never retried.
    #[error("protocol error: {0}")]
    Fatal(String),
}

impl TransferError {
    /// Whether the transfer client may retry the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Throttled { .. } | TransferError::Transient(_)
        )
    }

    /// Short tag for logs and per-shipment reports.
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::Auth(_) => "auth",
            TransferError::Throttled { .. } => "throttled",
            TransferError::NotFound(_) => "not_found",
            TransferError::Transient(_) => "transient",
            TransferError::Cancelled => "cancelled",
            TransferError::Fatal(_) => "fatal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(TransferError::Throttled { retry_after: None }.is_retryable());
        assert!(TransferError::Transient("reset".into()).is_retryable());
        assert!(!TransferError::Auth("denied".into()).is_retryable());
        assert!(!TransferError::NotFound("S-1".into()).is_retryable());
        assert!(!TransferError::Cancelled.is_retryable());
        assert!(!TransferError::Fatal("bad xml".into()).is_retryable());
    }
}
