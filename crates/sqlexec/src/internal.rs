//! Running SQL from inside the system.
//!
//! Every call spins up a short lived [`ConnExecutor`] on its own task, feeds
//! it a single statement followed by a sync, and reads results back through
//! a [`RowsIterator`].
use std::future::Future;
use std::sync::Arc;

use kvclient::{DB, Txn, TxnOptions};
use parser::StatementReturnType;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, warn};

use crate::client_comm::InternalClientComm;
use crate::commands::{BindStmt, ExecPortal, ExecStmt, PrepareStmt, SyncCmd};
use crate::config::{ExecutorConfig, SessionData};
use crate::conn_executor::ConnExecutor;
use crate::errors::{ExecError, Result};
use crate::result_channel::{
    ExecutionMode, IteratorResult, new_async_result_channel, new_sync_result_channel,
};
use crate::rows_iter::RowsIterator;
use crate::stmt_buf::StmtBuf;
use crate::types::{DataType, Datum, Datums, ResultColumn, ResultColumns};

/// Executes statements on behalf of the system rather than a client.
///
/// Cheap to clone.
#[derive(Debug, Clone)]
pub struct InternalExecutor {
    db: DB,
    config: Arc<ExecutorConfig>,
    session_data: SessionData,
}

impl InternalExecutor {
    pub fn new(db: DB, config: ExecutorConfig) -> Self {
        let session_data = SessionData::from_config(&config);
        InternalExecutor {
            db,
            config: Arc::new(config),
            session_data,
        }
    }

    pub fn with_session_data(mut self, session_data: SessionData) -> Self {
        self.session_data = session_data;
        self
    }

    pub fn db(&self) -> &DB {
        &self.db
    }

    /// Execute a statement, returning the number of rows it affected.
    ///
    /// Runs in `txn` if provided, otherwise in an implicit transaction.
    pub async fn exec(
        &self,
        ctx: &CancellationToken,
        op_name: &str,
        txn: Option<&Arc<Txn>>,
        stmt: &str,
        args: &[Datum],
    ) -> Result<usize> {
        let mut it = self
            .exec_internal(ctx, op_name, txn, stmt, args, ExecutionMode::RowsAffected, false)
            .await?;
        while it.next(ctx).await? {}
        Ok(it.rows_affected())
    }

    /// Execute a statement, buffering all returned rows.
    pub async fn query_buffered_with_columns(
        &self,
        ctx: &CancellationToken,
        op_name: &str,
        txn: Option<&Arc<Txn>>,
        stmt: &str,
        args: &[Datum],
    ) -> Result<(Vec<Datums>, ResultColumns)> {
        let mut it = self
            .exec_internal(ctx, op_name, txn, stmt, args, ExecutionMode::Default, false)
            .await?;
        let mut rows = Vec::new();
        while it.next(ctx).await? {
            rows.push(it.cur().clone());
        }
        Ok((rows, it.types().clone()))
    }

    pub async fn query_buffered(
        &self,
        ctx: &CancellationToken,
        op_name: &str,
        txn: Option<&Arc<Txn>>,
        stmt: &str,
        args: &[Datum],
    ) -> Result<Vec<Datums>> {
        let (rows, _) = self
            .query_buffered_with_columns(ctx, op_name, txn, stmt, args)
            .await?;
        Ok(rows)
    }

    /// Execute a statement expected to return at most one row.
    pub async fn query_row(
        &self,
        ctx: &CancellationToken,
        op_name: &str,
        txn: Option<&Arc<Txn>>,
        stmt: &str,
        args: &[Datum],
    ) -> Result<Option<Datums>> {
        let mut rows = self.query_buffered(ctx, op_name, txn, stmt, args).await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            n => Err(ExecError::QueryExecution(format!(
                "{op_name}: expected 1 row, got {n}"
            ))),
        }
    }

    /// Execute a statement, returning an iterator streaming its rows.
    ///
    /// The executor only produces the next result once the previous one was
    /// consumed. The iterator must be closed (or read to the end) to release
    /// the executor.
    pub async fn query_iterator(
        &self,
        ctx: &CancellationToken,
        op_name: &str,
        txn: Option<&Arc<Txn>>,
        stmt: &str,
        args: &[Datum],
    ) -> Result<RowsIterator> {
        self.exec_internal(ctx, op_name, txn, stmt, args, ExecutionMode::Default, true)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn exec_internal(
        &self,
        ctx: &CancellationToken,
        op_name: &str,
        txn: Option<&Arc<Txn>>,
        stmt: &str,
        args: &[Datum],
        mode: ExecutionMode,
        sync: bool,
    ) -> Result<RowsIterator> {
        // Parse errors are returned without starting an executor.
        let parsed = parser::parse_one(stmt)?;
        let return_type = parsed.ast.return_type();

        let stmt_buf = Arc::new(StmtBuf::new());
        let (writer, reader) = if sync {
            new_sync_result_channel()
        } else {
            new_async_result_channel()
        };
        let exec_ctx = ctx.child_token();

        let comm = InternalClientComm::new(exec_ctx.clone(), writer.clone(), mode, stmt_buf.clone());
        let mut executor = match txn {
            Some(txn) => ConnExecutor::new_with_external_txn(
                self.db.clone(),
                txn.clone(),
                stmt_buf.clone(),
                Box::new(comm),
                &self.config,
                self.session_data.clone(),
            ),
            None => ConnExecutor::new(
                self.db.clone(),
                stmt_buf.clone(),
                Box::new(comm),
                &self.config,
                self.session_data.clone(),
            ),
        };

        if args.is_empty() {
            stmt_buf.push(ExecStmt::new(parsed, true))?;
        } else {
            stmt_buf.push(PrepareStmt {
                name: String::new(),
                stmt: parsed,
            })?;
            stmt_buf.push(BindStmt {
                prepared_statement_name: String::new(),
                portal_name: String::new(),
                args: args.to_vec(),
            })?;
            stmt_buf.push(ExecPortal::new("", 0, true))?;
        }
        stmt_buf.push(SyncCmd {
            explicit_from_client: false,
        })?;

        let span = debug_span!("internal_exec", op = %op_name, external_txn = txn.is_some());
        let handle = tokio::spawn(
            async move {
                if let Err(e) = executor.run(&exec_ctx).await {
                    if e.is_communication_error() {
                        debug!(%e, "internal executor stopped");
                    } else {
                        warn!(%e, "internal executor failed");
                        let _ = writer.add_result(&exec_ctx, IteratorResult::Error(e)).await;
                    }
                }
                writer.finish();
            }
            .instrument(span),
        );

        let mut it = RowsIterator::new(reader, mode).with_executor(stmt_buf, handle);
        if mode == ExecutionMode::Default && return_type != StatementReturnType::Rows {
            it.set_columns(vec![ResultColumn::new("rows_affected", DataType::Int)]);
        }
        it.read_first(ctx).await?;
        Ok(it)
    }
}

/// A database handle pairing the kv layer with an internal executor.
#[derive(Debug, Clone)]
pub struct InternalDb {
    db: DB,
    executor: InternalExecutor,
}

impl InternalDb {
    pub fn new(db: DB, config: ExecutorConfig) -> Self {
        let executor = InternalExecutor::new(db.clone(), config);
        InternalDb { db, executor }
    }

    pub fn executor(&self) -> &InternalExecutor {
        &self.executor
    }

    pub fn kv(&self) -> &DB {
        &self.db
    }

    /// Run `f` in a transaction, committing if it succeeds.
    ///
    /// `f` is called again from the start when the transaction hits a
    /// retryable error. Anything else rolls the transaction back and is
    /// returned.
    pub async fn txn<F, Fut, T>(&self, ctx: &CancellationToken, opts: TxnOptions, mut f: F) -> Result<T>
    where
        F: FnMut(InternalTxn) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let executor = self.executor.clone();
        self.db
            .txn_with_options(ctx, opts, move |txn| {
                f(InternalTxn {
                    executor: executor.clone(),
                    txn,
                })
            })
            .await
    }
}

/// Executor bound to a transaction handed out by [`InternalDb::txn`].
#[derive(Debug, Clone)]
pub struct InternalTxn {
    executor: InternalExecutor,
    txn: Arc<Txn>,
}

impl InternalTxn {
    pub fn kv_txn(&self) -> &Arc<Txn> {
        &self.txn
    }

    pub async fn exec(
        &self,
        ctx: &CancellationToken,
        op_name: &str,
        stmt: &str,
        args: &[Datum],
    ) -> Result<usize> {
        self.executor
            .exec(ctx, op_name, Some(&self.txn), stmt, args)
            .await
    }

    pub async fn query_buffered_with_columns(
        &self,
        ctx: &CancellationToken,
        op_name: &str,
        stmt: &str,
        args: &[Datum],
    ) -> Result<(Vec<Datums>, ResultColumns)> {
        self.executor
            .query_buffered_with_columns(ctx, op_name, Some(&self.txn), stmt, args)
            .await
    }

    pub async fn query_buffered(
        &self,
        ctx: &CancellationToken,
        op_name: &str,
        stmt: &str,
        args: &[Datum],
    ) -> Result<Vec<Datums>> {
        self.executor
            .query_buffered(ctx, op_name, Some(&self.txn), stmt, args)
            .await
    }

    pub async fn query_row(
        &self,
        ctx: &CancellationToken,
        op_name: &str,
        stmt: &str,
        args: &[Datum],
    ) -> Result<Option<Datums>> {
        self.executor
            .query_row(ctx, op_name, Some(&self.txn), stmt, args)
            .await
    }
}
