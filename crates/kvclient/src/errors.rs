use std::fmt;

use uuid::Uuid;

use crate::hlc::Timestamp;

/// Why a transaction needs to be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// A key being written was committed by another transaction after this
    /// transaction's read timestamp.
    WriteTooOld,
    /// A key or span that was read was modified after this transaction's read
    /// timestamp.
    SerializableReadConflict,
    /// Injected or otherwise unspecified.
    Unknown,
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteTooOld => write!(f, "RETRY_WRITE_TOO_OLD"),
            Self::SerializableReadConflict => write!(f, "RETRY_SERIALIZABLE"),
            Self::Unknown => write!(f, "RETRY_REASON_UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvError {
    #[error("restart transaction: TransactionRetryError: retry txn ({reason}): {msg}")]
    TransactionRetry { reason: RetryReason, msg: String },

    #[error("restart transaction: TransactionAbortedError: txn {txn_id} aborted")]
    TransactionAborted { txn_id: Uuid },

    #[error("Invalid transaction operation: {0}")]
    InvalidTxnOperation(String),

    #[error("Transaction deadline exceeded: commit timestamp {commit_ts} >= deadline {deadline}")]
    TxnDeadlineExceeded {
        deadline: Timestamp,
        commit_ts: Timestamp,
    },

    #[error("Context canceled")]
    ContextCanceled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors that can tell the transaction driver whether retrying the
/// transaction may succeed.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

impl RetryableError for KvError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            KvError::TransactionRetry { .. } | KvError::TransactionAborted { .. }
        )
    }
}

#[allow(unused_macros)]
macro_rules! internal {
    ($($arg:tt)*) => {
        crate::errors::KvError::Internal(std::format!($($arg)*))
    };
}
#[allow(unused_imports)]
pub(crate) use internal;

pub type Result<T, E = KvError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable() {
        let retry = KvError::TransactionRetry {
            reason: RetryReason::WriteTooOld,
            msg: "key a".to_string(),
        };
        assert!(retry.is_retryable());
        assert!(
            KvError::TransactionAborted {
                txn_id: Uuid::nil()
            }
            .is_retryable()
        );
        assert!(!KvError::ContextCanceled.is_retryable());
        assert!(!KvError::InvalidTxnOperation("leaf".to_string()).is_retryable());
    }
}
