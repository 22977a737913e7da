//! Channel carrying results from an executor task to a reader.
//!
//! The channel holds at most one buffered item. In sync mode the writer
//! additionally waits after every item until the reader asks for the next
//! one, so the executor never runs ahead of the reader.
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::errors::{ExecError, Result};
use crate::types::{Datums, ResultColumns};

/// A single message sent from the executor to the reader.
#[derive(Debug, Clone)]
pub enum IteratorResult {
    Row(Datums),
    RowsAffected(usize),
    Columns(ResultColumns),
    Error(ExecError),
}

/// How results of an internal query are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Rows are returned along with their column schema.
    Default,
    /// Only the number of rows affected is of interest. Column schemas are
    /// ignored.
    RowsAffected,
}

/// Create a channel where the writer only blocks once an item is buffered.
pub fn new_async_result_channel() -> (ResultWriter, ResultReader) {
    new_result_channel(None)
}

/// Create a channel where the writer waits for the reader to consume every
/// item before continuing.
pub fn new_sync_result_channel() -> (ResultWriter, ResultReader) {
    new_result_channel(Some(Arc::new(Notify::new())))
}

fn new_result_channel(ready: Option<Arc<Notify>>) -> (ResultWriter, ResultReader) {
    let (tx, rx) = mpsc::channel(1);
    let reader_closed = CancellationToken::new();
    let writer = ResultWriter {
        data: Arc::new(Mutex::new(Some(tx))),
        reader_closed: reader_closed.clone(),
        ready: ready.clone(),
    };
    let reader = ResultReader {
        data: rx,
        reader_closed,
        ready,
        close_result: None,
    };
    (writer, reader)
}

/// Writing half of the result channel.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    /// Taken on finish so the channel is closed exactly once.
    data: Arc<Mutex<Option<mpsc::Sender<IteratorResult>>>>,
    reader_closed: CancellationToken,
    ready: Option<Arc<Notify>>,
}

impl ResultWriter {
    /// Send a result to the reader.
    ///
    /// Errors if `ctx` is canceled or the reader went away while waiting.
    pub async fn add_result(&self, ctx: &CancellationToken, res: IteratorResult) -> Result<()> {
        let tx = match self.data.lock().as_ref() {
            Some(tx) => tx.clone(),
            None => return Err(ExecError::ResultReaderClosed),
        };

        tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(ExecError::ContextCanceled),
            _ = self.reader_closed.cancelled() => return Err(ExecError::ResultReaderClosed),
            sent = tx.send(res) => {
                if sent.is_err() {
                    return Err(ExecError::ResultReaderClosed);
                }
            }
        }

        if let Some(ready) = &self.ready {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(ExecError::ContextCanceled),
                _ = self.reader_closed.cancelled() => return Err(ExecError::ResultReaderClosed),
                _ = ready.notified() => (),
            }
        }

        Ok(())
    }

    /// Signal that no more results will be written.
    pub fn finish(&self) {
        self.data.lock().take();
    }
}

/// Reading half of the result channel.
#[derive(Debug)]
pub struct ResultReader {
    data: mpsc::Receiver<IteratorResult>,
    reader_closed: CancellationToken,
    ready: Option<Arc<Notify>>,
    close_result: Option<Result<()>>,
}

impl ResultReader {
    /// Wait for the first result.
    ///
    /// Returns `None` once the writer has finished.
    pub async fn first_result(&mut self, ctx: &CancellationToken) -> Result<Option<IteratorResult>> {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(ExecError::ContextCanceled),
            _ = self.reader_closed.cancelled() => Err(ExecError::ResultReaderClosed),
            res = self.data.recv() => Ok(res),
        }
    }

    /// Let the writer continue past the previous result, then wait for the
    /// next one.
    pub async fn next_result(&mut self, ctx: &CancellationToken) -> Result<Option<IteratorResult>> {
        if let Some(ready) = &self.ready {
            ready.notify_one();
        }
        self.first_result(ctx).await
    }

    /// Close the reader, unblocking the writer.
    ///
    /// Pending results are drained and the first error among them is
    /// returned. Closing multiple times returns the same result.
    pub fn close(&mut self) -> Result<()> {
        if let Some(res) = &self.close_result {
            return res.clone();
        }

        self.reader_closed.cancel();
        self.data.close();

        let mut first_err = None;
        while let Ok(res) = self.data.try_recv() {
            if let IteratorResult::Error(e) = res {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }

        let res = match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        };
        self.close_result = Some(res.clone());
        res
    }
}

impl Drop for ResultReader {
    fn drop(&mut self) {
        self.reader_closed.cancel();
    }
}
