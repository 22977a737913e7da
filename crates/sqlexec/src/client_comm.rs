//! Interfaces for delivering results of executed commands to a client.
//!
//! The connection executor creates a [`CommandResult`] for every command it
//! executes through a [`ClientComm`]. Results are closed once the command
//! finished, or discarded if the command will be executed again.
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use parser::{Statement, StatementReturnType};
use tokio_util::sync::CancellationToken;

use crate::commands::CmdPos;
use crate::errors::{ExecError, Result};
use crate::result_channel::{ExecutionMode, IteratorResult, ResultWriter};
use crate::stmt_buf::StmtBuf;
use crate::types::{Datum, Datums, ResultColumns};

/// Transaction status reported to the client on every flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatusIndicator {
    /// Not in a transaction block.
    Idle,
    /// In a transaction block.
    InBlock,
    /// In a failed transaction block. Statements are rejected until the
    /// block is ended.
    InFailedBlock,
}

impl TxnStatusIndicator {
    pub fn as_char(&self) -> char {
        match self {
            TxnStatusIndicator::Idle => 'I',
            TxnStatusIndicator::InBlock => 'T',
            TxnStatusIndicator::InFailedBlock => 'E',
        }
    }
}

/// Result of executing a single command.
#[async_trait]
pub trait CommandResult: Send {
    /// Set the schema of the rows that follow.
    async fn set_columns(&mut self, cols: ResultColumns) -> Result<()>;

    async fn add_row(&mut self, row: Datums) -> Result<()>;

    async fn set_rows_affected(&mut self, n: usize) -> Result<()>;

    fn rows_affected(&self) -> usize;

    /// Record an execution error. The error is delivered when the result is
    /// closed.
    fn set_error(&mut self, err: ExecError);

    fn err(&self) -> Option<&ExecError>;

    /// If anything was already delivered to the client, preventing the
    /// command from being transparently retried.
    fn cannot_rewind(&self) -> bool;

    /// Finish the result.
    async fn close(&mut self) -> Result<()>;

    /// Drop the result without delivering anything further.
    fn discard(&mut self);
}

#[async_trait]
pub trait ClientComm: Send {
    fn create_statement_result(
        &mut self,
        stmt: &Statement,
        pos: CmdPos,
        limit: usize,
        portal_name: &str,
        implicit_txn: bool,
    ) -> Box<dyn CommandResult>;

    fn create_prepare_result(&mut self, pos: CmdPos) -> Box<dyn CommandResult>;

    fn create_bind_result(&mut self, pos: CmdPos) -> Box<dyn CommandResult>;

    fn create_sync_result(&mut self, pos: CmdPos) -> Box<dyn CommandResult>;

    /// Deliver everything produced up to and including `pos`.
    async fn flush(&mut self, pos: CmdPos, status: TxnStatusIndicator) -> Result<()>;
}

/// What command a result was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Statement(StatementReturnType),
    Prepare,
    Bind,
    Sync,
}

/// Client comm for executors run by the internal executor. Results are
/// streamed into a result channel read by a [`RowsIterator`].
///
/// Errors are held back until the batch is flushed and only the first one
/// is sent.
///
/// [`RowsIterator`]: crate::rows_iter::RowsIterator
#[derive(Debug)]
pub struct InternalClientComm {
    ctx: CancellationToken,
    writer: ResultWriter,
    mode: ExecutionMode,
    stmt_buf: Arc<StmtBuf>,
    errors: Arc<Mutex<Vec<ExecError>>>,
}

impl InternalClientComm {
    pub fn new(
        ctx: CancellationToken,
        writer: ResultWriter,
        mode: ExecutionMode,
        stmt_buf: Arc<StmtBuf>,
    ) -> Self {
        InternalClientComm {
            ctx,
            writer,
            mode,
            stmt_buf,
            errors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn new_result(&self, kind: ResultKind) -> Box<dyn CommandResult> {
        Box::new(StreamingCommandResult {
            ctx: self.ctx.clone(),
            writer: self.writer.clone(),
            mode: self.mode,
            kind,
            errors: self.errors.clone(),
            rows_affected: 0,
            cannot_rewind: false,
            err: None,
        })
    }
}

#[async_trait]
impl ClientComm for InternalClientComm {
    fn create_statement_result(
        &mut self,
        stmt: &Statement,
        _pos: CmdPos,
        _limit: usize,
        _portal_name: &str,
        _implicit_txn: bool,
    ) -> Box<dyn CommandResult> {
        self.new_result(ResultKind::Statement(stmt.return_type()))
    }

    fn create_prepare_result(&mut self, _pos: CmdPos) -> Box<dyn CommandResult> {
        self.new_result(ResultKind::Prepare)
    }

    fn create_bind_result(&mut self, _pos: CmdPos) -> Box<dyn CommandResult> {
        self.new_result(ResultKind::Bind)
    }

    fn create_sync_result(&mut self, _pos: CmdPos) -> Box<dyn CommandResult> {
        self.new_result(ResultKind::Sync)
    }

    async fn flush(&mut self, _pos: CmdPos, _status: TxnStatusIndicator) -> Result<()> {
        let first = self.errors.lock().drain(..).next();
        // Internal executions run a single batch.
        self.stmt_buf.close();
        if let Some(err) = first {
            self.writer
                .add_result(&self.ctx, IteratorResult::Error(err))
                .await?;
        }
        Ok(())
    }
}

/// Result streaming rows into a result channel as they're produced.
#[derive(Debug)]
struct StreamingCommandResult {
    ctx: CancellationToken,
    writer: ResultWriter,
    mode: ExecutionMode,
    kind: ResultKind,
    errors: Arc<Mutex<Vec<ExecError>>>,
    rows_affected: usize,
    cannot_rewind: bool,
    err: Option<ExecError>,
}

impl StreamingCommandResult {
    async fn send(&self, res: IteratorResult) -> Result<()> {
        self.writer.add_result(&self.ctx, res).await
    }
}

#[async_trait]
impl CommandResult for StreamingCommandResult {
    async fn set_columns(&mut self, cols: ResultColumns) -> Result<()> {
        self.send(IteratorResult::Columns(cols)).await
    }

    async fn add_row(&mut self, row: Datums) -> Result<()> {
        self.rows_affected += 1;
        self.cannot_rewind = true;
        self.send(IteratorResult::Row(row)).await
    }

    async fn set_rows_affected(&mut self, n: usize) -> Result<()> {
        self.rows_affected = n;
        if self.mode == ExecutionMode::RowsAffected {
            // The reader only keeps the latest count, so resending after a
            // retry is harmless.
            self.send(IteratorResult::RowsAffected(n)).await?;
        }
        Ok(())
    }

    fn rows_affected(&self) -> usize {
        self.rows_affected
    }

    fn set_error(&mut self, err: ExecError) {
        self.err = Some(err);
    }

    fn err(&self) -> Option<&ExecError> {
        self.err.as_ref()
    }

    fn cannot_rewind(&self) -> bool {
        self.cannot_rewind
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(err) = self.err.take() {
            self.errors.lock().push(err);
            return Ok(());
        }

        // Statements not returning rows report their count as a single row
        // when rows are requested.
        if let ResultKind::Statement(typ) = self.kind {
            if self.mode == ExecutionMode::Default && typ != StatementReturnType::Rows {
                let n = self.rows_affected;
                self.send(IteratorResult::Row(vec![Datum::Int(n as i64)]))
                    .await?;
                self.send(IteratorResult::RowsAffected(n)).await?;
            }
        }
        Ok(())
    }

    fn discard(&mut self) {
        self.err = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result_channel::new_async_result_channel;
    use crate::rows_iter::RowsIterator;

    #[tokio::test]
    async fn errors_sent_on_flush() {
        let (writer, reader) = new_async_result_channel();
        let ctx = CancellationToken::new();
        let stmt_buf = Arc::new(StmtBuf::new());
        let mut comm =
            InternalClientComm::new(ctx.clone(), writer.clone(), ExecutionMode::Default, stmt_buf.clone());

        let stmt = parser::parse_one("SELECT 1").unwrap();
        let mut res = comm.create_statement_result(&stmt.ast, 0, 0, "", true);
        res.set_error(ExecError::QueryExecution("first".to_string()));
        res.close().await.unwrap();

        let mut res = comm.create_statement_result(&stmt.ast, 1, 0, "", true);
        res.set_error(ExecError::QueryExecution("second".to_string()));
        res.close().await.unwrap();

        comm.flush(2, TxnStatusIndicator::Idle).await.unwrap();
        writer.finish();
        assert!(stmt_buf.is_closed());

        let mut iter = RowsIterator::new(reader, ExecutionMode::Default);
        let err = iter.next(&ctx).await.unwrap_err();
        assert_eq!("first", err.to_string());
    }

    #[tokio::test]
    async fn rows_affected_as_row_in_default_mode() {
        let (writer, reader) = new_async_result_channel();
        let ctx = CancellationToken::new();
        let mut comm = InternalClientComm::new(
            ctx.clone(),
            writer.clone(),
            ExecutionMode::Default,
            Arc::new(StmtBuf::new()),
        );

        let stmt = parser::parse_one("INSERT INTO t VALUES ('a', 1)").unwrap();
        let mut res = comm.create_statement_result(&stmt.ast, 0, 0, "", true);
        res.set_rows_affected(3).await.unwrap();
        assert!(!res.cannot_rewind());

        let handle = tokio::spawn(async move {
            res.close().await.unwrap();
            writer.finish();
        });

        let mut iter = RowsIterator::new(reader, ExecutionMode::Default);
        assert!(iter.next(&ctx).await.unwrap());
        assert_eq!(&vec![Datum::Int(3)], iter.cur());
        assert!(!iter.next(&ctx).await.unwrap());
        assert_eq!(3, iter.rows_affected());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn discarded_error_not_reported() {
        let (writer, reader) = new_async_result_channel();
        let ctx = CancellationToken::new();
        let mut comm = InternalClientComm::new(
            ctx.clone(),
            writer.clone(),
            ExecutionMode::RowsAffected,
            Arc::new(StmtBuf::new()),
        );

        let mut res = comm.create_prepare_result(0);
        res.set_error(ExecError::QueryExecution("retry me".to_string()));
        res.discard();

        comm.flush(1, TxnStatusIndicator::Idle).await.unwrap();
        writer.finish();

        let mut iter = RowsIterator::new(reader, ExecutionMode::RowsAffected);
        assert!(!iter.next(&ctx).await.unwrap());
    }
}
