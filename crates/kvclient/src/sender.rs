use std::fmt::Debug;

use async_trait::async_trait;

use crate::api::{BatchRequest, BatchResponse};
use crate::errors::Result;

/// Whether a transaction is responsible for finalizing itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnType {
    /// A root transaction owns the transaction record and may commit or roll
    /// back.
    Root,
    /// A leaf transaction operates on behalf of a root and may only read and
    /// write.
    Leaf,
}

/// Route batches of requests to wherever they'll be evaluated.
#[async_trait]
pub trait Sender: Debug + Sync + Send {
    async fn send(&self, ba: BatchRequest) -> Result<BatchResponse>;
}
