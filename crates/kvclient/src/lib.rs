//! Client side of the key-value layer.
//!
//! Transactions are driven through [`DB::txn`], which runs a closure against a
//! root [`Txn`], committing on success and rolling back on failure. Requests
//! are routed through a [`Sender`]; [`local::LocalSender`] provides an
//! in-memory multi-version store for running without a cluster.
pub mod api;
pub mod batch;
pub mod db;
pub mod errors;
pub mod hlc;
pub mod local;
pub mod sender;
pub mod txn;

pub use db::{DB, DbConfig, TxnOptions};
pub use errors::{KvError, Result, RetryableError};
pub use sender::{Sender, TxnType};
pub use txn::Txn;
