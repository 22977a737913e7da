use std::sync::Arc;

use async_trait::async_trait;
use kvclient::DB;
use parking_lot::Mutex;
use parser::{Statement, StatementReturnType};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug_span};

use crate::client_comm::{ClientComm, CommandResult, TxnStatusIndicator};
use crate::commands::{BindStmt, CmdPos, ExecPortal, ExecStmt, PrepareStmt, SyncCmd};
use crate::config::{ExecutorConfig, SessionData};
use crate::conn_executor::ConnExecutor;
use crate::errors::{ExecError, Result, internal};
use crate::stmt_buf::StmtBuf;
use crate::types::{Datum, Datums, ResultColumns};

/// Output of a single command in a batch.
#[derive(Debug, Clone)]
pub struct StatementOutput {
    pub pos: CmdPos,
    /// Command tag, empty for commands that aren't statements.
    pub tag: &'static str,
    pub return_type: Option<StatementReturnType>,
    pub columns: ResultColumns,
    pub rows: Vec<Datums>,
    pub rows_affected: usize,
    pub error: Option<ExecError>,
}

/// Everything produced by a batch of commands ending in a sync.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub outputs: Vec<StatementOutput>,
    pub txn_status: TxnStatusIndicator,
}

impl BatchOutput {
    pub fn first_error(&self) -> Option<&ExecError> {
        self.outputs.iter().find_map(|out| out.error.as_ref())
    }
}

/// A client session running an executor over a statement buffer for its
/// whole lifetime.
///
/// Each call to [`Session::execute`] submits one batch and waits for its
/// output.
#[derive(Debug)]
pub struct Session {
    ctx: CancellationToken,
    stmt_buf: Arc<StmtBuf>,
    batches: mpsc::UnboundedReceiver<BatchOutput>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl Session {
    pub fn new(db: DB, config: &ExecutorConfig, session_data: SessionData) -> Self {
        let ctx = CancellationToken::new();
        let stmt_buf = Arc::new(StmtBuf::new());
        let (tx, batches) = mpsc::unbounded_channel();

        let span = debug_span!("session", application_name = %session_data.application_name);
        let mut executor = ConnExecutor::new(
            db,
            stmt_buf.clone(),
            Box::new(BufferedClientComm::new(tx)),
            config,
            session_data,
        );

        let exec_ctx = ctx.clone();
        let handle = tokio::spawn(async move { executor.run(&exec_ctx).await }.instrument(span));

        Session {
            ctx,
            stmt_buf,
            batches,
            handle: Some(handle),
        }
    }

    /// Execute every statement in `sql` as a single batch.
    pub async fn execute(&mut self, sql: &str) -> Result<BatchOutput> {
        let stmts = parser::parse_many(sql)?;
        let n = stmts.len();
        for (i, stmt) in stmts.into_iter().enumerate() {
            self.stmt_buf.push(ExecStmt::new(stmt, i + 1 == n))?;
        }
        self.sync().await
    }

    /// Execute a single statement using positional arguments.
    pub async fn execute_with_args(&mut self, sql: &str, args: Vec<Datum>) -> Result<BatchOutput> {
        let stmt = parser::parse_one(sql)?;
        self.stmt_buf.push(PrepareStmt {
            name: String::new(),
            stmt,
        })?;
        self.stmt_buf.push(BindStmt {
            prepared_statement_name: String::new(),
            portal_name: String::new(),
            args,
        })?;
        self.stmt_buf.push(ExecPortal::new("", 0, true))?;
        self.sync().await
    }

    async fn sync(&mut self) -> Result<BatchOutput> {
        self.stmt_buf.push(SyncCmd {
            explicit_from_client: true,
        })?;
        match self.batches.recv().await {
            Some(batch) => Ok(batch),
            None => {
                // Executor exited before flushing.
                self.close().await?;
                Err(internal!("session executor exited"))
            }
        }
    }

    /// Stop the executor, rolling back any open transaction.
    pub async fn close(&mut self) -> Result<()> {
        self.stmt_buf.close();
        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| internal!("session executor panicked: {e}"))?,
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stmt_buf.close();
        if self.handle.is_some() {
            self.ctx.cancel();
        }
    }
}

/// Client comm buffering all output until the batch is flushed.
#[derive(Debug)]
struct BufferedClientComm {
    outputs: Arc<Mutex<Vec<StatementOutput>>>,
    tx: mpsc::UnboundedSender<BatchOutput>,
}

impl BufferedClientComm {
    fn new(tx: mpsc::UnboundedSender<BatchOutput>) -> Self {
        BufferedClientComm {
            outputs: Arc::new(Mutex::new(Vec::new())),
            tx,
        }
    }

    fn new_result(
        &self,
        pos: CmdPos,
        tag: &'static str,
        return_type: Option<StatementReturnType>,
    ) -> Box<dyn CommandResult> {
        Box::new(BufferedCommandResult {
            outputs: self.outputs.clone(),
            out: StatementOutput {
                pos,
                tag,
                return_type,
                columns: Vec::new(),
                rows: Vec::new(),
                rows_affected: 0,
                error: None,
            },
        })
    }
}

#[async_trait]
impl ClientComm for BufferedClientComm {
    fn create_statement_result(
        &mut self,
        stmt: &Statement,
        pos: CmdPos,
        _limit: usize,
        _portal_name: &str,
        _implicit_txn: bool,
    ) -> Box<dyn CommandResult> {
        self.new_result(pos, stmt.tag(), Some(stmt.return_type()))
    }

    fn create_prepare_result(&mut self, pos: CmdPos) -> Box<dyn CommandResult> {
        self.new_result(pos, "", None)
    }

    fn create_bind_result(&mut self, pos: CmdPos) -> Box<dyn CommandResult> {
        self.new_result(pos, "", None)
    }

    fn create_sync_result(&mut self, pos: CmdPos) -> Box<dyn CommandResult> {
        self.new_result(pos, "", None)
    }

    async fn flush(&mut self, _pos: CmdPos, status: TxnStatusIndicator) -> Result<()> {
        let outputs = std::mem::take(&mut *self.outputs.lock());
        self.tx
            .send(BatchOutput {
                outputs,
                txn_status: status,
            })
            .map_err(|_| ExecError::ResultReaderClosed)
    }
}

/// Nothing is delivered before the batch is flushed, so these results can
/// always be rewound.
#[derive(Debug)]
struct BufferedCommandResult {
    outputs: Arc<Mutex<Vec<StatementOutput>>>,
    out: StatementOutput,
}

#[async_trait]
impl CommandResult for BufferedCommandResult {
    async fn set_columns(&mut self, cols: ResultColumns) -> Result<()> {
        self.out.columns = cols;
        Ok(())
    }

    async fn add_row(&mut self, row: Datums) -> Result<()> {
        self.out.rows_affected += 1;
        self.out.rows.push(row);
        Ok(())
    }

    async fn set_rows_affected(&mut self, n: usize) -> Result<()> {
        self.out.rows_affected = n;
        Ok(())
    }

    fn rows_affected(&self) -> usize {
        self.out.rows_affected
    }

    fn set_error(&mut self, err: ExecError) {
        self.out.error = Some(err);
    }

    fn err(&self) -> Option<&ExecError> {
        self.out.error.as_ref()
    }

    fn cannot_rewind(&self) -> bool {
        false
    }

    async fn close(&mut self) -> Result<()> {
        // Protocol level commands only show up when they failed.
        if self.out.return_type.is_none() && self.out.error.is_none() {
            return Ok(());
        }
        let out = StatementOutput {
            columns: std::mem::take(&mut self.out.columns),
            rows: std::mem::take(&mut self.out.rows),
            error: self.out.error.take(),
            ..self.out.clone()
        };
        self.outputs.lock().push(out);
        Ok(())
    }

    fn discard(&mut self) {
        self.out.columns.clear();
        self.out.rows.clear();
        self.out.rows_affected = 0;
        self.out.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn_state::State;

    fn session() -> Session {
        logutil::init_test();
        Session::new(
            DB::new_local(Default::default()),
            &ExecutorConfig::default(),
            SessionData::default(),
        )
    }

    #[tokio::test]
    async fn implicit_batch() {
        let mut sess = session();
        let out = sess
            .execute("INSERT INTO t VALUES ('a', 1), ('b', 2); SELECT v FROM t WHERE k = 'b'")
            .await
            .unwrap();

        assert_eq!(TxnStatusIndicator::Idle, out.txn_status);
        assert_eq!(2, out.outputs.len());
        assert_eq!("INSERT", out.outputs[0].tag);
        assert_eq!(2, out.outputs[0].rows_affected);
        assert_eq!(vec![vec![Datum::Int(2)]], out.outputs[1].rows);
        assert!(out.first_error().is_none());
        sess.close().await.unwrap();
    }

    #[tokio::test]
    async fn explicit_txn_status() {
        let mut sess = session();

        let out = sess.execute("BEGIN").await.unwrap();
        assert_eq!(TxnStatusIndicator::InBlock, out.txn_status);

        let out = sess.execute("SHOW TRANSACTION STATUS").await.unwrap();
        assert_eq!(
            vec![vec![Datum::String(State::Open { implicit: false }.to_string())]],
            out.outputs[0].rows
        );

        let out = sess.execute("COMMIT").await.unwrap();
        assert_eq!(TxnStatusIndicator::Idle, out.txn_status);
        sess.close().await.unwrap();
    }

    #[tokio::test]
    async fn error_skips_rest_of_batch() {
        let mut sess = session();
        let out = sess
            .execute("SELECT 1 / 0; INSERT INTO t VALUES ('a', 1)")
            .await
            .unwrap();
        assert_eq!(1, out.outputs.len());
        assert_eq!("division by zero", out.first_error().unwrap().to_string());

        let out = sess.execute("SELECT k FROM t").await.unwrap();
        assert!(out.outputs[0].rows.is_empty());
        sess.close().await.unwrap();
    }

    #[tokio::test]
    async fn failed_bind_reported() {
        let mut sess = session();
        let out = sess
            .execute_with_args("SELECT $1 + $2", vec![Datum::Int(1)])
            .await
            .unwrap();
        let err = out.first_error().unwrap().to_string();
        assert!(err.contains("requires 2"), "{err}");
        sess.close().await.unwrap();
    }
}
