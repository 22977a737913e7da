use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::{ExecError, Result, internal};
use crate::result_channel::{ExecutionMode, IteratorResult, ResultReader};
use crate::stmt_buf::StmtBuf;
use crate::types::{Datums, ResultColumns};

/// Max number of metadata results consumed by a single call to
/// [`RowsIterator::next`] before giving up.
pub const ITERATOR_DEPTH_LIMIT: usize = 1000;

/// Iterator over the results of an internally executed statement.
///
/// Rows are pulled from a result channel fed by an executor task. Metadata
/// (column schemas, rows affected counts) is folded into the iterator's
/// state without being surfaced. The iterator closes itself once the stream
/// ends or an error is hit, after which `next` keeps returning the same
/// outcome.
#[derive(Debug)]
pub struct RowsIterator {
    reader: ResultReader,
    mode: ExecutionMode,
    /// Buffer feeding the executor, closed along with the iterator.
    stmt_buf: Option<Arc<StmtBuf>>,
    /// Executor task, awaited on close.
    handle: Option<JoinHandle<()>>,
    /// Result read ahead of time before handing out the iterator.
    first: Option<IteratorResult>,
    rows_affected: usize,
    result_cols: ResultColumns,
    last_row: Datums,
    last_err: Option<ExecError>,
    done: bool,
    closed: bool,
}

impl RowsIterator {
    pub fn new(reader: ResultReader, mode: ExecutionMode) -> Self {
        RowsIterator {
            reader,
            mode,
            stmt_buf: None,
            handle: None,
            first: None,
            rows_affected: 0,
            result_cols: Vec::new(),
            last_row: Vec::new(),
            last_err: None,
            done: false,
            closed: false,
        }
    }

    /// Attach the executor producing results for this iterator.
    pub(crate) fn with_executor(mut self, stmt_buf: Arc<StmtBuf>, handle: JoinHandle<()>) -> Self {
        self.stmt_buf = Some(stmt_buf);
        self.handle = Some(handle);
        self
    }

    pub(crate) fn set_first(&mut self, first: IteratorResult) {
        self.first = Some(first);
    }

    pub(crate) fn set_columns(&mut self, cols: ResultColumns) {
        self.result_cols = cols;
    }

    /// Block until the executor produced its first result, so that errors
    /// hit early are returned before the iterator is handed out.
    ///
    /// A leading column schema is recorded and the result after it is read
    /// ahead instead.
    pub(crate) async fn read_first(&mut self, ctx: &CancellationToken) -> Result<()> {
        let mut res = self.reader.first_result(ctx).await;
        if let Ok(Some(IteratorResult::Columns(cols))) = &res {
            if self.mode == ExecutionMode::Default {
                self.result_cols = cols.clone();
            }
            res = self.reader.next_result(ctx).await;
        }

        match res {
            Ok(None) => Ok(()),
            Ok(Some(IteratorResult::Error(e))) | Err(e) => {
                self.done = true;
                self.last_err = Some(e);
                self.close().await
            }
            Ok(Some(first)) => {
                self.first = Some(first);
                Ok(())
            }
        }
    }

    /// Advance to the next row.
    ///
    /// Returns `false` once all rows have been read.
    pub async fn next(&mut self, ctx: &CancellationToken) -> Result<bool> {
        if self.done {
            return self.terminal();
        }

        match self.next_inner(ctx).await {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.done = true;
                let _ = self.close().await;
                self.terminal()
            }
            Err(e) => {
                self.done = true;
                self.last_err = Some(e);
                let _ = self.close().await;
                self.terminal()
            }
        }
    }

    async fn next_inner(&mut self, ctx: &CancellationToken) -> Result<bool> {
        let mut depth = 0;
        loop {
            depth += 1;
            if depth > ITERATOR_DEPTH_LIMIT {
                return Err(ExecError::RecursionLimitExceeded {
                    limit: ITERATOR_DEPTH_LIMIT,
                });
            }

            let res = match self.first.take() {
                Some(first) => first,
                None => match self.reader.next_result(ctx).await? {
                    Some(res) => res,
                    None => return Ok(false),
                },
            };

            match res {
                IteratorResult::Row(row) => {
                    self.rows_affected += 1;
                    self.last_row = row;
                    return Ok(true);
                }
                IteratorResult::RowsAffected(n) => self.rows_affected = n,
                IteratorResult::Columns(cols) => match self.mode {
                    ExecutionMode::RowsAffected => (),
                    // A statement retried by the executor sends its schema
                    // again, possibly with different types.
                    ExecutionMode::Default => self.result_cols = cols,
                },
                IteratorResult::Error(e) => return Err(e),
            }
        }
    }

    fn terminal(&self) -> Result<bool> {
        match &self.last_err {
            Some(e) => Err(e.clone()),
            None => Ok(false),
        }
    }

    /// The current row.
    pub fn cur(&self) -> &Datums {
        &self.last_row
    }

    /// Number of rows affected by the statement, or the number of rows read
    /// so far for row-returning statements.
    pub fn rows_affected(&self) -> usize {
        self.rows_affected
    }

    pub fn types(&self) -> &ResultColumns {
        &self.result_cols
    }

    /// If a row was read ahead before the iterator was returned.
    pub fn has_results(&self) -> bool {
        matches!(self.first, Some(IteratorResult::Row(_)))
    }

    /// Close the iterator, stopping the executor and waiting for it to exit.
    ///
    /// Returns the error the iterator ended with, if any. Safe to call more
    /// than once.
    pub async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            if let Some(stmt_buf) = &self.stmt_buf {
                stmt_buf.close();
            }
            if let Err(e) = self.reader.close() {
                if self.last_err.is_none() {
                    self.last_err = Some(e);
                }
            }
            if let Some(handle) = self.handle.take() {
                if let Err(e) = handle.await {
                    warn!(%e, "executor task failed");
                    if self.last_err.is_none() {
                        self.last_err = Some(internal!("executor task failed: {e}"));
                    }
                }
            }
        }

        match &self.last_err {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

impl Drop for RowsIterator {
    fn drop(&mut self) {
        if let Some(stmt_buf) = &self.stmt_buf {
            stmt_buf.close();
        }
    }
}
