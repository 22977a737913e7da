use kvclient::{KvError, RetryableError};

use crate::txn_state::AdvanceCode;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecError {
    #[error("statement buffer closed")]
    BufferClosed,

    /// The statement buffer was closed and all commands were consumed.
    #[error("end of input")]
    EndOfInput,

    #[error("context canceled")]
    ContextCanceled,

    #[error("result reader closed")]
    ResultReaderClosed,

    #[error("{0}")]
    QueryExecution(String),

    #[error("rows iterator exceeded recursion depth limit ({limit})")]
    RecursionLimitExceeded { limit: usize },

    #[error("invalid transaction operation: {0}")]
    InvalidTxnOperation(String),

    #[error("unexpected advance code: {0:?}")]
    MalformedAdvanceCode(AdvanceCode),

    #[error("no transition for event {event} in state {state}")]
    InvalidTransition { state: String, event: String },

    #[error("current transaction is aborted, commands ignored until end of transaction block")]
    TxnAborted,

    #[error("current transaction is committed, commands ignored until end of transaction block")]
    TxnCommitted,

    #[error("failed to load config: {0}")]
    Config(String),

    #[error(transparent)]
    Parse(#[from] parser::errors::ParseError),

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecError {
    /// Errors that mean results can no longer reach the client. These end the
    /// execution loop instead of being reported through a command result.
    pub fn is_communication_error(&self) -> bool {
        matches!(
            self,
            ExecError::ContextCanceled | ExecError::ResultReaderClosed
        )
    }
}

impl RetryableError for ExecError {
    fn is_retryable(&self) -> bool {
        match self {
            ExecError::Kv(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<config::ConfigError> for ExecError {
    fn from(value: config::ConfigError) -> Self {
        ExecError::Config(value.to_string())
    }
}

pub type Result<T, E = ExecError> = std::result::Result<T, E>;

#[allow(unused_macros)]
macro_rules! internal {
    ($($arg:tt)*) => {
        crate::errors::ExecError::Internal(std::format!($($arg)*))
    };
}
pub(crate) use internal;

#[cfg(test)]
mod tests {
    use kvclient::errors::RetryReason;

    use super::*;

    #[test]
    fn retryable_only_for_kv_retries() {
        let retry = ExecError::from(KvError::TransactionRetry {
            reason: RetryReason::WriteTooOld,
            msg: "conflict".to_string(),
        });
        assert!(retry.is_retryable());

        let invalid = ExecError::from(KvError::InvalidTxnOperation("nope".to_string()));
        assert!(!invalid.is_retryable());

        assert!(!ExecError::QueryExecution("boom".to_string()).is_retryable());
    }

    #[test]
    fn communication_errors() {
        assert!(ExecError::ContextCanceled.is_communication_error());
        assert!(ExecError::ResultReaderClosed.is_communication_error());
        assert!(!ExecError::TxnAborted.is_communication_error());
    }
}
