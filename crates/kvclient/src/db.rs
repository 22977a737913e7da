use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug_span, warn};

use crate::api::{BatchRequest, Header, IsolationLevel, KeyValue, Request, Response, UserPriority};
use crate::batch::Batch;
use crate::errors::{KvError, Result, RetryableError, internal};
use crate::hlc::Clock;
use crate::local::LocalSender;
use crate::sender::Sender;
use crate::txn::Txn;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Max number of times a transaction is retried after the first attempt.
    pub max_txn_retries: u32,
    pub default_priority: UserPriority,
    pub default_isolation: IsolationLevel,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            max_txn_retries: 5,
            default_priority: UserPriority::Normal,
            default_isolation: IsolationLevel::Serializable,
        }
    }
}

/// Overrides for a single transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxnOptions {
    pub priority: Option<UserPriority>,
    pub isolation: Option<IsolationLevel>,
}

/// Entry point for running transactions against the key-value layer.
#[derive(Debug, Clone)]
pub struct DB {
    sender: Arc<dyn Sender>,
    clock: Arc<Clock>,
    config: DbConfig,
}

impl DB {
    pub fn new(sender: Arc<dyn Sender>, clock: Arc<Clock>, config: DbConfig) -> Self {
        DB {
            sender,
            clock,
            config,
        }
    }

    /// Create a database backed by an in-memory store.
    pub fn new_local(config: DbConfig) -> Self {
        let clock = Arc::new(Clock::new());
        let sender = Arc::new(LocalSender::new(clock.clone()));
        Self::new(sender, clock, config)
    }

    pub fn sender(&self) -> &Arc<dyn Sender> {
        &self.sender
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Create a new root transaction. The caller is responsible for
    /// finalizing it.
    pub fn new_txn(&self, opts: TxnOptions) -> Txn {
        Txn::new_root(
            self.sender.clone(),
            self.clock.clone(),
            opts.priority.unwrap_or(self.config.default_priority),
            opts.isolation.unwrap_or(self.config.default_isolation),
        )
    }

    /// Run `f` in a new transaction, committing on success.
    ///
    /// Retryable errors restart the transaction and run `f` again, up to the
    /// configured number of retries. On any final error the transaction is
    /// rolled back. A failed rollback is logged and never replaces the
    /// original error.
    pub async fn txn<F, Fut, T, E>(&self, ctx: &CancellationToken, f: F) -> Result<T, E>
    where
        F: FnMut(Arc<Txn>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<KvError> + RetryableError + fmt::Display,
    {
        self.txn_with_options(ctx, TxnOptions::default(), f).await
    }

    pub async fn txn_with_options<F, Fut, T, E>(
        &self,
        ctx: &CancellationToken,
        opts: TxnOptions,
        f: F,
    ) -> Result<T, E>
    where
        F: FnMut(Arc<Txn>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<KvError> + RetryableError + fmt::Display,
    {
        let txn = Arc::new(self.new_txn(opts));
        let span = debug_span!("txn", txn_id = %txn.id());
        run_txn(ctx, txn, self.config.max_txn_retries, f)
            .instrument(span)
            .await
    }

    async fn send_non_txn(&self, requests: Vec<Request>) -> Result<Vec<Response>> {
        let resp = self
            .sender
            .send(BatchRequest {
                header: Header::default(),
                requests,
            })
            .await?;
        Ok(resp.responses)
    }

    pub async fn get(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        let mut resps = self.send_non_txn(vec![Request::Get { key: key.into() }]).await?;
        match resps.pop() {
            Some(Response::Get { value }) => Ok(value),
            other => Err(internal!("unexpected response for get: {other:?}")),
        }
    }

    pub async fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        self.send_non_txn(vec![Request::Put {
            key: key.into(),
            value: value.into(),
        }])
        .await?;
        Ok(())
    }

    pub async fn del(&self, key: impl Into<Bytes>) -> Result<()> {
        self.send_non_txn(vec![Request::Delete { key: key.into() }])
            .await?;
        Ok(())
    }

    pub async fn scan(
        &self,
        start: impl Into<Bytes>,
        end: impl Into<Bytes>,
    ) -> Result<Vec<KeyValue>> {
        let mut resps = self
            .send_non_txn(vec![Request::Scan {
                start: start.into(),
                end: end.into(),
            }])
            .await?;
        match resps.pop() {
            Some(Response::Scan { rows }) => Ok(rows),
            other => Err(internal!("unexpected response for scan: {other:?}")),
        }
    }

    /// Run the batch outside of a transaction.
    pub async fn run(&self, batch: &mut Batch) -> Result<()> {
        let requests = batch.take_requests();
        let responses = self.send_non_txn(requests).await?;
        batch.fill_results(responses);
        Ok(())
    }
}

async fn run_txn<F, Fut, T, E>(
    ctx: &CancellationToken,
    txn: Arc<Txn>,
    max_retries: u32,
    f: F,
) -> Result<T, E>
where
    F: FnMut(Arc<Txn>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<KvError> + RetryableError + fmt::Display,
{
    let result = txn.exec(ctx, max_retries, f).await;
    if let Err(err) = &result {
        if let Err(rollback_err) = txn.rollback().await {
            warn!(%rollback_err, original_err = %err, "failed to rollback txn");
        }
    }
    result
}
