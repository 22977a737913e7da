//! Request and response types sent through a [`Sender`](crate::Sender).

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hlc::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Reads and writes are validated at commit.
    #[default]
    Serializable,
    /// Only writes are validated at commit.
    Snapshot,
    /// Treated the same as snapshot.
    ReadCommitted,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serializable => write!(f, "SERIALIZABLE"),
            Self::Snapshot => write!(f, "SNAPSHOT"),
            Self::ReadCommitted => write!(f, "READ COMMITTED"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum UserPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl fmt::Display for UserPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Normal => write!(f, "NORMAL"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Committed,
    Aborted,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Committed => write!(f, "COMMITTED"),
            Self::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Transaction metadata attached to every transactional request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnMeta {
    pub id: Uuid,
    /// Incremented on every restart. Writes from earlier epochs are discarded.
    pub epoch: u32,
    /// Timestamp reads are served at.
    pub read_timestamp: Timestamp,
    pub priority: UserPriority,
    pub isolation: IsolationLevel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Bytes,
    pub value: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Get {
        key: Bytes,
    },
    Put {
        key: Bytes,
        value: Bytes,
    },
    Delete {
        key: Bytes,
    },
    /// Scan keys in `[start, end)`.
    Scan {
        start: Bytes,
        end: Bytes,
    },
    /// Commit or abort the transaction in the header.
    EndTxn {
        commit: bool,
        deadline: Option<Timestamp>,
    },
}

impl Request {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Get { .. } => "Get",
            Self::Put { .. } => "Put",
            Self::Delete { .. } => "Delete",
            Self::Scan { .. } => "Scan",
            Self::EndTxn { .. } => "EndTxn",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Get {
        value: Option<Bytes>,
    },
    Put,
    Delete,
    Scan {
        rows: Vec<KeyValue>,
    },
    EndTxn {
        status: TransactionStatus,
        commit_timestamp: Option<Timestamp>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// Transaction the batch belongs to. Non-transactional batches are applied
    /// immediately.
    pub txn: Option<TxnMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchRequest {
    pub header: Header,
    pub requests: Vec<Request>,
}

impl BatchRequest {
    pub fn is_end_txn(&self) -> bool {
        self.requests
            .iter()
            .any(|r| matches!(r, Request::EndTxn { .. }))
    }
}

impl fmt::Display for BatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methods: Vec<_> = self.requests.iter().map(|r| r.method()).collect();
        write!(f, "{}", methods.join(", "))?;
        if let Some(txn) = &self.header.txn {
            write!(f, " [txn: {}, epoch: {}]", txn.id, txn.epoch)?;
        }
        Ok(())
    }
}

/// Responses for a batch, one per request in the same order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResponse {
    pub responses: Vec<Response>,
}
