use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::{
    BatchRequest,
    BatchResponse,
    Header,
    IsolationLevel,
    KeyValue,
    Request,
    Response,
    TransactionStatus,
    TxnMeta,
    UserPriority,
};
use crate::batch::Batch;
use crate::errors::{KvError, Result, RetryableError, internal};
use crate::hlc::{Clock, Timestamp};
use crate::sender::{Sender, TxnType};

/// State needed to create a leaf transaction operating on behalf of a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafTxnInputState {
    pub meta: TxnMeta,
}

#[derive(Debug)]
struct TxnState {
    meta: TxnMeta,
    status: TransactionStatus,
    deadline: Option<Timestamp>,
    /// If any request has been sent in the current epoch.
    sent_requests: bool,
    /// If any request has been sent in any epoch. Earlier epochs may have
    /// left state behind that only an abort cleans up.
    ever_sent: bool,
    commit_timestamp: Option<Timestamp>,
}

/// A key-value transaction.
///
/// A root transaction may be committed or rolled back. Leaf transactions
/// share the root's metadata and may only read and write.
pub struct Txn {
    typ: TxnType,
    sender: Arc<dyn Sender>,
    clock: Arc<Clock>,
    mu: Mutex<TxnState>,
}

impl Txn {
    /// Create a new root transaction reading at the current clock time.
    pub fn new_root(
        sender: Arc<dyn Sender>,
        clock: Arc<Clock>,
        priority: UserPriority,
        isolation: IsolationLevel,
    ) -> Self {
        let meta = TxnMeta {
            id: Uuid::new_v4(),
            epoch: 0,
            read_timestamp: clock.now(),
            priority,
            isolation,
        };
        Self::new(TxnType::Root, sender, clock, meta)
    }

    /// Create a leaf transaction from a root's input state.
    pub fn new_leaf(sender: Arc<dyn Sender>, clock: Arc<Clock>, input: LeafTxnInputState) -> Self {
        Self::new(TxnType::Leaf, sender, clock, input.meta)
    }

    fn new(typ: TxnType, sender: Arc<dyn Sender>, clock: Arc<Clock>, meta: TxnMeta) -> Self {
        Txn {
            typ,
            sender,
            clock,
            mu: Mutex::new(TxnState {
                meta,
                status: TransactionStatus::Pending,
                deadline: None,
                sent_requests: false,
                ever_sent: false,
                commit_timestamp: None,
            }),
        }
    }

    pub fn typ(&self) -> TxnType {
        self.typ
    }

    pub fn id(&self) -> Uuid {
        self.mu.lock().meta.id
    }

    pub fn epoch(&self) -> u32 {
        self.mu.lock().meta.epoch
    }

    pub fn meta(&self) -> TxnMeta {
        self.mu.lock().meta.clone()
    }

    pub fn status(&self) -> TransactionStatus {
        self.mu.lock().status
    }

    pub fn is_open(&self) -> bool {
        self.status() == TransactionStatus::Pending
    }

    pub fn read_timestamp(&self) -> Timestamp {
        self.mu.lock().meta.read_timestamp
    }

    pub fn commit_timestamp(&self) -> Option<Timestamp> {
        self.mu.lock().commit_timestamp
    }

    pub fn priority(&self) -> UserPriority {
        self.mu.lock().meta.priority
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.mu.lock().meta.isolation
    }

    pub fn set_priority(&self, priority: UserPriority) {
        self.mu.lock().meta.priority = priority;
    }

    /// Set the isolation level. Must happen before any requests are sent.
    pub fn set_isolation(&self, isolation: IsolationLevel) -> Result<()> {
        let mut mu = self.mu.lock();
        if mu.meta.isolation == isolation {
            return Ok(());
        }
        if mu.sent_requests {
            return Err(KvError::InvalidTxnOperation(
                "cannot change the isolation level of a running transaction".to_string(),
            ));
        }
        mu.meta.isolation = isolation;
        Ok(())
    }

    /// Lower the deadline the transaction must commit before. A later
    /// deadline than the current one is ignored.
    pub fn update_deadline(&self, deadline: Timestamp) {
        let mut mu = self.mu.lock();
        mu.deadline = Some(match mu.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        self.mu.lock().deadline
    }

    /// Get the state needed to create leaf transactions for this root.
    pub fn leaf_input_state(&self) -> Result<LeafTxnInputState> {
        if self.typ != TxnType::Root {
            return Err(KvError::InvalidTxnOperation(
                "leaf_input_state() called on leaf txn".to_string(),
            ));
        }
        Ok(LeafTxnInputState { meta: self.meta() })
    }

    /// Header for a new request, erroring if the transaction has been
    /// finalized.
    fn pending_header(&self) -> Result<Header> {
        let mut mu = self.mu.lock();
        if mu.status != TransactionStatus::Pending {
            return Err(KvError::InvalidTxnOperation(format!(
                "txn {} is already {}",
                mu.meta.id, mu.status
            )));
        }
        mu.sent_requests = true;
        mu.ever_sent = true;
        Ok(Header {
            txn: Some(mu.meta.clone()),
        })
    }

    /// Send requests as part of this transaction.
    pub async fn send(&self, requests: Vec<Request>) -> Result<BatchResponse> {
        let header = self.pending_header()?;
        self.sender.send(BatchRequest { header, requests }).await
    }

    async fn send_one(&self, request: Request) -> Result<Response> {
        let resp = self.send(vec![request]).await?;
        resp.responses
            .into_iter()
            .next()
            .ok_or_else(|| internal!("missing response"))
    }

    pub async fn get(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        match self.send_one(Request::Get { key: key.into() }).await? {
            Response::Get { value } => Ok(value),
            other => Err(internal!("unexpected response for get: {other:?}")),
        }
    }

    pub async fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        self.send_one(Request::Put {
            key: key.into(),
            value: value.into(),
        })
        .await?;
        Ok(())
    }

    pub async fn del(&self, key: impl Into<Bytes>) -> Result<()> {
        self.send_one(Request::Delete { key: key.into() }).await?;
        Ok(())
    }

    /// Scan keys in `[start, end)`.
    pub async fn scan(
        &self,
        start: impl Into<Bytes>,
        end: impl Into<Bytes>,
    ) -> Result<Vec<KeyValue>> {
        let req = Request::Scan {
            start: start.into(),
            end: end.into(),
        };
        match self.send_one(req).await? {
            Response::Scan { rows } => Ok(rows),
            other => Err(internal!("unexpected response for scan: {other:?}")),
        }
    }

    /// Run all requests in the batch as part of this transaction.
    pub async fn run(&self, batch: &mut Batch) -> Result<()> {
        let requests = batch.take_requests();
        let resp = self.send(requests).await?;
        batch.fill_results(resp.responses);
        Ok(())
    }

    /// Commit the transaction.
    ///
    /// Errors if called on a leaf transaction, nothing is sent in that case.
    pub async fn commit(&self) -> Result<()> {
        if self.typ != TxnType::Root {
            return Err(KvError::InvalidTxnOperation(
                "commit() called on leaf txn".to_string(),
            ));
        }

        let header = self.pending_header()?;
        let deadline = self.deadline();
        let resp = self
            .sender
            .send(BatchRequest {
                header,
                requests: vec![Request::EndTxn {
                    commit: true,
                    deadline,
                }],
            })
            .await?;

        let commit_timestamp = match resp.responses.first() {
            Some(Response::EndTxn {
                status: TransactionStatus::Committed,
                commit_timestamp,
            }) => *commit_timestamp,
            other => return Err(internal!("unexpected response for commit: {other:?}")),
        };

        let mut mu = self.mu.lock();
        mu.status = TransactionStatus::Committed;
        mu.commit_timestamp = commit_timestamp;
        debug!(txn_id = %mu.meta.id, epoch = mu.meta.epoch, "committed txn");

        Ok(())
    }

    /// Roll back the transaction.
    ///
    /// Always safe to call on a root transaction. Finalized transactions are
    /// left untouched. The transaction is terminal afterwards even if sending
    /// the abort fails.
    pub async fn rollback(&self) -> Result<()> {
        if self.typ != TxnType::Root {
            return Err(KvError::InvalidTxnOperation(
                "rollback() called on leaf txn".to_string(),
            ));
        }

        let header = {
            let mut mu = self.mu.lock();
            if mu.status != TransactionStatus::Pending {
                return Ok(());
            }
            mu.status = TransactionStatus::Aborted;
            if !mu.ever_sent {
                // Nothing to clean up.
                return Ok(());
            }
            Header {
                txn: Some(mu.meta.clone()),
            }
        };

        self.sender
            .send(BatchRequest {
                header,
                requests: vec![Request::EndTxn {
                    commit: false,
                    deadline: None,
                }],
            })
            .await?;

        Ok(())
    }

    /// Restart the transaction after a retryable error.
    ///
    /// Bumps the epoch, discarding writes from the previous attempt, and moves
    /// the read timestamp forward.
    pub fn prepare_for_retry(&self) -> Result<()> {
        if self.typ != TxnType::Root {
            return Err(KvError::InvalidTxnOperation(
                "prepare_for_retry() called on leaf txn".to_string(),
            ));
        }

        let mut mu = self.mu.lock();
        if mu.status == TransactionStatus::Committed {
            return Err(KvError::InvalidTxnOperation(
                "cannot restart a committed txn".to_string(),
            ));
        }
        mu.meta.epoch += 1;
        mu.meta.read_timestamp = self.clock.now();
        mu.status = TransactionStatus::Pending;
        mu.sent_requests = false;
        debug!(txn_id = %mu.meta.id, epoch = mu.meta.epoch, "restarting txn");

        Ok(())
    }

    /// Run `f` and commit, retrying the whole thing on retryable errors.
    ///
    /// At most `max_retries` retries are attempted after the first attempt.
    /// If `f` commits the transaction itself, no additional commit is issued.
    pub async fn exec<F, Fut, T, E>(
        self: &Arc<Self>,
        ctx: &CancellationToken,
        max_retries: u32,
        mut f: F,
    ) -> Result<T, E>
    where
        F: FnMut(Arc<Txn>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<KvError> + RetryableError + fmt::Display,
    {
        let mut retries = 0;
        loop {
            if ctx.is_cancelled() {
                return Err(KvError::ContextCanceled.into());
            }

            let err = match f(self.clone()).await {
                Ok(v) if self.status() == TransactionStatus::Committed => return Ok(v),
                Ok(v) => match self.commit().await {
                    Ok(()) => return Ok(v),
                    Err(e) => E::from(e),
                },
                Err(e) => e,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if retries >= max_retries {
                warn!(%err, retries, "txn retries exhausted");
                return Err(err);
            }

            retries += 1;
            debug!(%err, retries, "retrying txn");
            self.prepare_for_retry()?;
        }
    }
}

impl fmt::Debug for Txn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mu = self.mu.lock();
        f.debug_struct("Txn")
            .field("typ", &self.typ)
            .field("id", &mu.meta.id)
            .field("epoch", &mu.meta.epoch)
            .field("status", &mu.status)
            .finish_non_exhaustive()
    }
}
