//! The execution loop for a connection.
//!
//! A [`ConnExecutor`] consumes commands from a [`StmtBuf`], executes them
//! against the current transaction state, and reports results through a
//! [`ClientComm`]. Every executed command produces at most one event for the
//! transaction state machine, which in turn decides where the cursor moves
//! next.
use std::collections::HashMap;
use std::sync::Arc;

use kvclient::api::{IsolationLevel, UserPriority};
use kvclient::{DB, Txn};
use parser::Statement;
use parser::ast::{IsolationLevel as AstIsolationLevel, TransactionModes, TransactionPriority};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::client_comm::{ClientComm, CommandResult};
use crate::commands::{BindStmt, CmdPos, Command, ExecPortal, PrepareStmt};
use crate::config::{ExecutorConfig, SessionData};
use crate::errors::{ExecError, Result, internal};
use crate::extended::{Portal, PreparedStatement};
use crate::placeholders::PlaceholderInfo;
use crate::planner::Planner;
use crate::stmt_buf::StmtBuf;
use crate::txn_state::{AdvanceCode, AdvanceInfo, Event, State, TxnStartPayload, TxnState};
use crate::types::{DataType, Datum, ResultColumn};

pub struct ConnExecutor {
    stmt_buf: Arc<StmtBuf>,
    client_comm: Box<dyn ClientComm>,
    txn_state: TxnState,
    max_auto_retries: usize,
    session_data: SessionData,
    prepared_statements: HashMap<String, PreparedStatement>,
    portals: HashMap<String, Portal>,
    /// Set once a result was delivered within the current transaction.
    /// Rewinding would re-deliver it.
    rewind_blocked: bool,
}

impl ConnExecutor {
    pub fn new(
        db: DB,
        stmt_buf: Arc<StmtBuf>,
        client_comm: Box<dyn ClientComm>,
        config: &ExecutorConfig,
        session_data: SessionData,
    ) -> Self {
        Self::with_txn_state(TxnState::new(db), stmt_buf, client_comm, config, session_data)
    }

    /// Create an executor running every statement in a transaction owned by
    /// the caller.
    pub fn new_with_external_txn(
        db: DB,
        txn: Arc<Txn>,
        stmt_buf: Arc<StmtBuf>,
        client_comm: Box<dyn ClientComm>,
        config: &ExecutorConfig,
        session_data: SessionData,
    ) -> Self {
        Self::with_txn_state(
            TxnState::new_external(db, txn),
            stmt_buf,
            client_comm,
            config,
            session_data,
        )
    }

    fn with_txn_state(
        txn_state: TxnState,
        stmt_buf: Arc<StmtBuf>,
        client_comm: Box<dyn ClientComm>,
        config: &ExecutorConfig,
        session_data: SessionData,
    ) -> Self {
        ConnExecutor {
            stmt_buf,
            client_comm,
            txn_state,
            max_auto_retries: config.max_auto_retries,
            session_data,
            prepared_statements: HashMap::new(),
            portals: HashMap::new(),
            rewind_blocked: false,
        }
    }

    pub fn txn_state(&self) -> &TxnState {
        &self.txn_state
    }

    /// Run until the statement buffer is closed, then clean up.
    ///
    /// Errors that prevent results from reaching the client end the loop and
    /// are returned. Statement errors are reported through the client comm.
    pub async fn run(&mut self, ctx: &CancellationToken) -> Result<()> {
        let result = loop {
            match self.exec_cmd(ctx).await {
                Ok(()) => (),
                Err(ExecError::EndOfInput) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.close().await;
        result
    }

    /// Roll back any open transaction owned by this executor.
    pub async fn close(&mut self) {
        self.txn_state.finish().await;
        self.portals.clear();
        self.prepared_statements.clear();
    }

    /// Execute the command at the cursor and move the cursor.
    pub async fn exec_cmd(&mut self, ctx: &CancellationToken) -> Result<()> {
        let (cmd, pos) = self.stmt_buf.cur_cmd(ctx).await?;
        trace!(pos, %cmd, state = %self.txn_state.state(), "executing command");

        let is_sync = cmd.is_sync();
        let (event, mut res) = match cmd {
            Command::ExecStmt(exec) => {
                let implicit = self.in_implicit_txn();
                let mut res =
                    self.client_comm
                        .create_statement_result(&exec.stmt.ast, pos, 0, "", implicit);
                let event = self
                    .exec_stmt(
                        &exec.stmt.ast,
                        &PlaceholderInfo::default(),
                        res.as_mut(),
                        exec.last_in_batch,
                        0,
                    )
                    .await?;
                (event, res)
            }
            Command::PrepareStmt(prepare) => {
                let mut res = self.client_comm.create_prepare_result(pos);
                let event = self
                    .exec_prepare(prepare)
                    .err()
                    .map(|e| self.error_event(e, false, res.as_mut()));
                (event, res)
            }
            Command::BindStmt(bind) => {
                let mut res = self.client_comm.create_bind_result(pos);
                let event = self
                    .exec_bind(bind)
                    .err()
                    .map(|e| self.error_event(e, false, res.as_mut()));
                (event, res)
            }
            Command::ExecPortal(exec) => self.exec_portal(exec, pos).await?,
            Command::Sync(_) => {
                let mut res = self.client_comm.create_sync_result(pos);
                let event = self.exec_sync(res.as_mut()).await?;
                (event, res)
            }
        };

        let started_txn = matches!(event, Some(Event::TxnStart { .. }));
        let advance = match event {
            Some(event) => self.txn_state.apply(event, pos).await?,
            None => AdvanceInfo {
                code: AdvanceCode::AdvanceOne,
                rewind_pos: self.txn_state.rewind_pos(),
            },
        };
        trace!(pos, code = ?advance.code, state = %self.txn_state.state(), "advancing");

        if started_txn {
            // Nothing before the start of the transaction is needed for a
            // rewind.
            self.stmt_buf.ltrim(pos)?;
            self.rewind_blocked = false;
        }

        match advance.code {
            AdvanceCode::StayInPlace | AdvanceCode::Rewind => res.discard(),
            _ => {
                res.close().await?;
                if self.txn_state.state().is_open() {
                    self.rewind_blocked = true;
                }
            }
        }

        if is_sync {
            self.client_comm
                .flush(pos, self.txn_state.status_indicator())
                .await?;
            if self.txn_state.state() == State::NoTxn {
                self.stmt_buf.ltrim(pos)?;
            }
        }

        match advance.code {
            AdvanceCode::AdvanceOne => {
                self.stmt_buf.advance_one();
            }
            AdvanceCode::StayInPlace => (),
            AdvanceCode::SkipBatch if is_sync => {
                self.stmt_buf.advance_one();
            }
            AdvanceCode::SkipBatch => self.stmt_buf.seek_to_next_batch(ctx).await?,
            AdvanceCode::Rewind => {
                debug!(
                    from = pos,
                    to = advance.rewind_pos,
                    retries = self.txn_state.auto_retry_count(),
                    "rewinding to retry txn"
                );
                self.stmt_buf.rewind(advance.rewind_pos)?;
            }
            AdvanceCode::Unknown => return Err(ExecError::MalformedAdvanceCode(advance.code)),
        }

        Ok(())
    }

    fn in_implicit_txn(&self) -> bool {
        matches!(
            self.txn_state.state(),
            State::NoTxn | State::Open { implicit: true }
        )
    }

    fn exec_prepare(&mut self, prepare: PrepareStmt) -> Result<()> {
        if !prepare.name.is_empty() && self.prepared_statements.contains_key(&prepare.name) {
            return Err(ExecError::QueryExecution(format!(
                "prepared statement \"{}\" already exists",
                prepare.name
            )));
        }
        trace!(name = %prepare.name, sql = %prepare.stmt.sql, "prepared statement");
        let prepared = PreparedStatement::new(prepare.name.clone(), prepare.stmt);
        self.prepared_statements.insert(prepare.name, prepared);
        Ok(())
    }

    fn exec_bind(&mut self, bind: BindStmt) -> Result<()> {
        if !bind.portal_name.is_empty() && self.portals.contains_key(&bind.portal_name) {
            return Err(ExecError::QueryExecution(format!(
                "portal \"{}\" already exists",
                bind.portal_name
            )));
        }
        let prepared = self
            .prepared_statements
            .get(&bind.prepared_statement_name)
            .ok_or_else(|| {
                ExecError::QueryExecution(format!(
                    "unknown prepared statement \"{}\"",
                    bind.prepared_statement_name
                ))
            })?;
        let portal = Portal::new(bind.portal_name.clone(), prepared, bind.args)?;
        self.portals.insert(bind.portal_name, portal);
        Ok(())
    }

    async fn exec_portal(
        &mut self,
        exec: ExecPortal,
        pos: CmdPos,
    ) -> Result<(Option<Event>, Box<dyn CommandResult>)> {
        let portal = match self.portals.get(&exec.name) {
            Some(portal) => portal.clone(),
            None => {
                let mut res = self.client_comm.create_bind_result(pos);
                let err = ExecError::QueryExecution(format!("unknown portal \"{}\"", exec.name));
                let event = self.error_event(err, false, res.as_mut());
                return Ok((Some(event), res));
            }
        };

        let implicit = self.in_implicit_txn();
        let mut res = self.client_comm.create_statement_result(
            &portal.stmt.ast,
            pos,
            exec.limit,
            &portal.name,
            implicit,
        );
        let event = self
            .exec_stmt(
                &portal.stmt.ast,
                &portal.placeholders,
                res.as_mut(),
                exec.followed_by_sync,
                exec.limit,
            )
            .await?;
        Ok((event, res))
    }

    /// Commit an implicit transaction left open by the batch.
    async fn exec_sync(&mut self, res: &mut dyn CommandResult) -> Result<Option<Event>> {
        if !self.txn_state.is_implicit() || self.txn_state.is_external() {
            return Ok(None);
        }
        Ok(Some(self.commit(res, Event::TxnFinishCommitted, false).await))
    }

    /// Execute a statement in the current transaction state.
    ///
    /// Statement errors are recorded on `res` and turned into an event. Only
    /// errors that prevent results from being delivered are returned.
    async fn exec_stmt(
        &mut self,
        stmt: &Statement,
        placeholders: &PlaceholderInfo,
        res: &mut dyn CommandResult,
        can_auto_commit: bool,
        limit: usize,
    ) -> Result<Option<Event>> {
        if let Statement::ShowTransactionStatus = stmt {
            return self.exec_show_txn_status(res).await.map(|_| None);
        }

        match self.txn_state.state() {
            State::NoTxn => Ok(self.exec_stmt_in_no_txn_state(stmt, res)),
            State::Open { .. } => {
                self.exec_stmt_in_open_state(stmt, placeholders, res, can_auto_commit, limit)
                    .await
            }
            State::Aborted => Ok(self.exec_stmt_in_aborted_state(stmt, res)),
            State::CommitWait => Ok(self.exec_stmt_in_commit_wait_state(stmt, res)),
        }
    }

    async fn exec_show_txn_status(&mut self, res: &mut dyn CommandResult) -> Result<()> {
        res.set_columns(vec![ResultColumn::new("transaction_status", DataType::String)])
            .await?;
        res.add_row(vec![Datum::String(self.txn_state.state().to_string())])
            .await
    }

    fn exec_stmt_in_no_txn_state(
        &mut self,
        stmt: &Statement,
        res: &mut dyn CommandResult,
    ) -> Option<Event> {
        match stmt {
            Statement::BeginTransaction(modes) => Some(Event::TxnStart {
                implicit: false,
                payload: self.txn_payload(Some(modes)),
            }),
            Statement::Commit | Statement::Rollback => {
                warn!(stmt = %stmt, "there is no transaction in progress");
                None
            }
            Statement::ReleaseSavepoint(_) => {
                let err = ExecError::QueryExecution("there is no transaction in progress".to_string());
                Some(self.error_event(err, false, res))
            }
            _ => Some(Event::TxnStart {
                implicit: true,
                payload: self.txn_payload(None),
            }),
        }
    }

    async fn exec_stmt_in_open_state(
        &mut self,
        stmt: &Statement,
        placeholders: &PlaceholderInfo,
        res: &mut dyn CommandResult,
        can_auto_commit: bool,
        limit: usize,
    ) -> Result<Option<Event>> {
        let external = self.txn_state.is_external();
        if external && stmt.is_transaction_control() {
            let err = ExecError::InvalidTxnOperation(format!(
                "{} cannot be used with an external transaction",
                stmt.tag()
            ));
            return Ok(Some(self.error_event(err, false, res)));
        }

        match stmt {
            Statement::BeginTransaction(_) => {
                let err = ExecError::QueryExecution(
                    "there is already a transaction in progress".to_string(),
                );
                return Ok(Some(self.error_event(err, false, res)));
            }
            Statement::Commit => {
                return Ok(Some(self.commit(res, Event::TxnFinishCommitted, true).await));
            }
            Statement::Rollback => return Ok(Some(Event::TxnFinishAborted)),
            Statement::ReleaseSavepoint(name) => {
                debug!(savepoint = %name, "releasing savepoint, committing txn");
                return Ok(Some(self.commit(res, Event::TxnReleased, true).await));
            }
            _ => (),
        }

        let txn = self
            .txn_state
            .txn()
            .cloned()
            .ok_or_else(|| internal!("missing txn in open state"))?;
        let planner = Planner::new(&txn, placeholders, self.txn_state.read_only());

        match planner.execute(stmt, res, limit).await {
            Ok(()) => (),
            Err(e) if e.is_communication_error() => return Err(e),
            Err(e) => return Ok(Some(self.error_event(e, false, res))),
        }

        if self.txn_state.is_implicit() && can_auto_commit && !external {
            return Ok(Some(self.commit(res, Event::TxnFinishCommitted, false).await));
        }
        Ok(None)
    }

    fn exec_stmt_in_aborted_state(
        &mut self,
        stmt: &Statement,
        res: &mut dyn CommandResult,
    ) -> Option<Event> {
        match stmt {
            Statement::Rollback if !self.txn_state.is_external() => Some(Event::TxnFinishAborted),
            _ => Some(self.error_event(ExecError::TxnAborted, false, res)),
        }
    }

    fn exec_stmt_in_commit_wait_state(
        &mut self,
        stmt: &Statement,
        res: &mut dyn CommandResult,
    ) -> Option<Event> {
        match stmt {
            Statement::Commit => Some(Event::TxnFinishCommitted),
            Statement::Rollback => Some(Event::TxnFinishAborted),
            _ => Some(self.error_event(ExecError::TxnCommitted, false, res)),
        }
    }

    /// Commit the current transaction, producing `on_success` if it worked.
    ///
    /// `explicit` is set when the commit was requested by the client rather
    /// than done automatically.
    async fn commit(
        &mut self,
        res: &mut dyn CommandResult,
        on_success: Event,
        explicit: bool,
    ) -> Event {
        let txn = match self.txn_state.txn() {
            Some(txn) => txn.clone(),
            None => return self.error_event(internal!("missing txn to commit"), true, res),
        };
        match txn.commit().await {
            Ok(()) => {
                trace!(txn_id = %txn.id(), explicit, "committed txn");
                on_success
            }
            Err(e) => self.error_event(e.into(), true, res),
        }
    }

    /// Turn a statement error into an event, recording it on the result
    /// unless the statement will be retried.
    fn error_event(&mut self, err: ExecError, is_commit: bool, res: &mut dyn CommandResult) -> Event {
        use kvclient::RetryableError;

        if !err.is_retryable() {
            debug!(%err, is_commit, "statement failed");
            res.set_error(err);
            return Event::NonRetriableErr { is_commit };
        }

        let can_auto_retry = self.txn_state.is_implicit()
            && !self.txn_state.is_external()
            && !res.cannot_rewind()
            && !self.rewind_blocked
            && self.txn_state.auto_retry_count() < self.max_auto_retries;

        if can_auto_retry {
            debug!(%err, is_commit, retries = self.txn_state.auto_retry_count(), "retrying statement");
        } else {
            if self.txn_state.is_implicit()
                && self.txn_state.auto_retry_count() >= self.max_auto_retries
            {
                warn!(%err, retries = self.txn_state.auto_retry_count(), "statement retries exhausted");
            }
            res.set_error(err);
        }

        Event::RetriableErr {
            can_auto_retry,
            is_commit,
        }
    }

    fn txn_payload(&self, modes: Option<&TransactionModes>) -> TxnStartPayload {
        let mut payload = TxnStartPayload {
            priority: self.session_data.default_txn_priority,
            isolation: self.session_data.default_txn_isolation,
            read_only: self.session_data.default_txn_read_only,
        };
        let Some(modes) = modes else {
            return payload;
        };

        if let Some(isolation) = modes.isolation {
            payload.isolation = match isolation {
                AstIsolationLevel::Serializable => IsolationLevel::Serializable,
                AstIsolationLevel::Snapshot => IsolationLevel::Snapshot,
                AstIsolationLevel::ReadCommitted => IsolationLevel::ReadCommitted,
            };
        }
        if let Some(priority) = modes.priority {
            payload.priority = match priority {
                TransactionPriority::Low => UserPriority::Low,
                TransactionPriority::Normal => UserPriority::Normal,
                TransactionPriority::High => UserPriority::High,
            };
        }
        if let Some(read_only) = modes.read_only {
            payload.read_only = read_only;
        }
        payload
    }
}

impl std::fmt::Debug for ConnExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnExecutor")
            .field("txn_state", &self.txn_state)
            .field("prepared_statements", &self.prepared_statements.len())
            .field("portals", &self.portals.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use kvclient::api::{BatchRequest, BatchResponse, Request};
    use kvclient::errors::RetryReason;
    use kvclient::hlc::Clock;
    use kvclient::local::LocalSender;
    use kvclient::{DbConfig, KvError, Sender};
    use parking_lot::Mutex;

    use super::*;
    use crate::client_comm::TxnStatusIndicator;
    use crate::commands::{ExecStmt, SyncCmd};
    use crate::types::Datums;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Records what happens to every result as a line in a shared log.
    #[derive(Debug)]
    struct RecordingResult {
        log: Log,
        pos: CmdPos,
        rows: Vec<Datums>,
        err: Option<ExecError>,
    }

    #[async_trait]
    impl CommandResult for RecordingResult {
        async fn set_columns(&mut self, _cols: crate::types::ResultColumns) -> Result<()> {
            Ok(())
        }

        async fn add_row(&mut self, row: Datums) -> Result<()> {
            self.rows.push(row);
            Ok(())
        }

        async fn set_rows_affected(&mut self, _n: usize) -> Result<()> {
            Ok(())
        }

        fn rows_affected(&self) -> usize {
            self.rows.len()
        }

        fn set_error(&mut self, err: ExecError) {
            self.err = Some(err);
        }

        fn err(&self) -> Option<&ExecError> {
            self.err.as_ref()
        }

        fn cannot_rewind(&self) -> bool {
            false
        }

        async fn close(&mut self) -> Result<()> {
            let line = match &self.err {
                Some(err) => format!("close {} error: {err}", self.pos),
                None => format!("close {} rows: {}", self.pos, self.rows.len()),
            };
            self.log.lock().push(line);
            Ok(())
        }

        fn discard(&mut self) {
            self.log.lock().push(format!("discard {}", self.pos));
        }
    }

    #[derive(Debug, Default)]
    struct RecordingClientComm {
        log: Log,
    }

    impl RecordingClientComm {
        fn result(&self, pos: CmdPos) -> Box<dyn CommandResult> {
            Box::new(RecordingResult {
                log: self.log.clone(),
                pos,
                rows: Vec::new(),
                err: None,
            })
        }
    }

    #[async_trait]
    impl ClientComm for RecordingClientComm {
        fn create_statement_result(
            &mut self,
            _stmt: &Statement,
            pos: CmdPos,
            _limit: usize,
            _portal_name: &str,
            _implicit_txn: bool,
        ) -> Box<dyn CommandResult> {
            self.result(pos)
        }

        fn create_prepare_result(&mut self, pos: CmdPos) -> Box<dyn CommandResult> {
            self.result(pos)
        }

        fn create_bind_result(&mut self, pos: CmdPos) -> Box<dyn CommandResult> {
            self.result(pos)
        }

        fn create_sync_result(&mut self, pos: CmdPos) -> Box<dyn CommandResult> {
            self.result(pos)
        }

        async fn flush(&mut self, pos: CmdPos, status: TxnStatusIndicator) -> Result<()> {
            self.log
                .lock()
                .push(format!("flush {pos} {}", status.as_char()));
            Ok(())
        }
    }

    /// Fails the first commit with a retryable error.
    #[derive(Debug)]
    struct FailFirstCommit {
        inner: LocalSender,
        commits: AtomicUsize,
    }

    #[async_trait]
    impl Sender for FailFirstCommit {
        async fn send(&self, ba: BatchRequest) -> kvclient::Result<BatchResponse> {
            let is_commit = ba
                .requests
                .iter()
                .any(|r| matches!(r, Request::EndTxn { commit: true, .. }));
            if is_commit && self.commits.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(KvError::TransactionRetry {
                    reason: RetryReason::Unknown,
                    msg: "injected".to_string(),
                });
            }
            self.inner.send(ba).await
        }
    }

    struct Harness {
        executor: ConnExecutor,
        stmt_buf: Arc<StmtBuf>,
        log: Log,
        ctx: CancellationToken,
    }

    impl Harness {
        fn new(db: DB) -> Self {
            logutil::init_test();
            let stmt_buf = Arc::new(StmtBuf::new());
            let comm = RecordingClientComm::default();
            let log = comm.log.clone();
            let executor = ConnExecutor::new(
                db,
                stmt_buf.clone(),
                Box::new(comm),
                &ExecutorConfig::default(),
                SessionData::default(),
            );
            Harness {
                executor,
                stmt_buf,
                log,
                ctx: CancellationToken::new(),
            }
        }

        fn push_batch(&self, stmts: &[&str]) {
            for (i, sql) in stmts.iter().enumerate() {
                let stmt = parser::parse_one(sql).unwrap();
                self.stmt_buf
                    .push(ExecStmt::new(stmt, i + 1 == stmts.len()))
                    .unwrap();
            }
            self.stmt_buf
                .push(SyncCmd {
                    explicit_from_client: true,
                })
                .unwrap();
        }

        /// Execute one command, returning the state and cursor afterwards.
        async fn step(&mut self) -> (State, CmdPos) {
            self.executor.exec_cmd(&self.ctx).await.unwrap();
            (self.executor.txn_state().state(), self.stmt_buf.cursor())
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    const IMPLICIT: State = State::Open { implicit: true };
    const EXPLICIT: State = State::Open { implicit: false };

    #[tokio::test]
    async fn implicit_txn_for_single_statement() {
        let mut h = Harness::new(DB::new_local(DbConfig::default()));
        h.push_batch(&["SELECT 1"]);

        // Starting the txn doesn't move the cursor.
        assert_eq!((IMPLICIT, 0), h.step().await);
        assert_eq!((State::NoTxn, 1), h.step().await);
        assert_eq!((State::NoTxn, 2), h.step().await);

        assert_eq!(
            vec!["discard 0", "close 0 rows: 1", "close 1 rows: 0", "flush 1 I"],
            h.log()
        );
        assert!(h.executor.txn_state().txn().is_none());
    }

    #[tokio::test]
    async fn explicit_txn_block() {
        let mut h = Harness::new(DB::new_local(DbConfig::default()));
        h.push_batch(&["BEGIN", "SELECT 1", "COMMIT"]);

        assert_eq!((EXPLICIT, 1), h.step().await);
        assert_eq!((EXPLICIT, 2), h.step().await);
        assert_eq!((State::NoTxn, 3), h.step().await);
        assert_eq!((State::NoTxn, 4), h.step().await);

        assert_eq!(
            vec![
                "close 0 rows: 0",
                "close 1 rows: 1",
                "close 2 rows: 0",
                "close 3 rows: 0",
                "flush 3 I",
            ],
            h.log()
        );
    }

    #[tokio::test]
    async fn error_skips_rest_of_batch() {
        let mut h = Harness::new(DB::new_local(DbConfig::default()));
        h.push_batch(&["SELECT 1 / 0", "SELECT 2", "SELECT 3"]);

        assert_eq!((IMPLICIT, 0), h.step().await);
        // Moves straight to the sync.
        assert_eq!((State::NoTxn, 3), h.step().await);
        assert_eq!((State::NoTxn, 4), h.step().await);

        assert_eq!(
            vec![
                "discard 0",
                "close 0 error: division by zero",
                "close 3 rows: 0",
                "flush 3 I",
            ],
            h.log()
        );
    }

    #[tokio::test]
    async fn error_in_explicit_txn_aborts() {
        let mut h = Harness::new(DB::new_local(DbConfig::default()));
        h.push_batch(&["BEGIN", "SELECT 1 / 0", "SELECT 2"]);

        assert_eq!((EXPLICIT, 1), h.step().await);
        assert_eq!((State::Aborted, 3), h.step().await);
        assert_eq!((State::Aborted, 4), h.step().await);
        assert_eq!(Some(&"flush 3 E".to_string()), h.log().last());

        h.push_batch(&["SELECT 4"]);
        assert_eq!((State::Aborted, 5), h.step().await);
        assert_eq!(
            Some(&format!("close 4 error: {}", ExecError::TxnAborted)),
            h.log().last()
        );
        assert_eq!((State::Aborted, 6), h.step().await);

        h.push_batch(&["ROLLBACK"]);
        assert_eq!((State::NoTxn, 7), h.step().await);
        assert_eq!((State::NoTxn, 8), h.step().await);
        assert_eq!(Some(&"flush 7 I".to_string()), h.log().last());
    }

    #[tokio::test]
    async fn retried_commit_rewinds() {
        let clock = Arc::new(Clock::new());
        let sender = Arc::new(FailFirstCommit {
            inner: LocalSender::new(clock.clone()),
            commits: AtomicUsize::new(0),
        });
        let mut h = Harness::new(DB::new(sender.clone(), clock, DbConfig::default()));
        h.push_batch(&["INSERT INTO t VALUES ('a', 1)"]);

        assert_eq!((IMPLICIT, 0), h.step().await);
        // Commit fails, the statement is executed again from the start of
        // the txn.
        assert_eq!((IMPLICIT, 0), h.step().await);
        assert_eq!(1, h.executor.txn_state().auto_retry_count());
        assert_eq!(0, h.executor.txn_state().rewind_pos());
        assert_eq!((State::NoTxn, 1), h.step().await);
        assert_eq!((State::NoTxn, 2), h.step().await);

        assert_eq!(2, sender.commits.load(Ordering::SeqCst));
        assert_eq!(
            vec![
                "discard 0",
                "discard 0",
                "close 0 rows: 0",
                "close 1 rows: 0",
                "flush 1 I",
            ],
            h.log()
        );
    }

    #[tokio::test]
    async fn failed_commit_at_sync_after_delivery() {
        let clock = Arc::new(Clock::new());
        let sender = Arc::new(FailFirstCommit {
            inner: LocalSender::new(clock.clone()),
            commits: AtomicUsize::new(0),
        });
        let mut h = Harness::new(DB::new(sender.clone(), clock, DbConfig::default()));
        // Not last in the batch, so the implicit txn stays open until the sync.
        let stmt = parser::parse_one("SELECT 1").unwrap();
        h.stmt_buf.push(ExecStmt::new(stmt, false)).unwrap();
        h.stmt_buf
            .push(SyncCmd {
                explicit_from_client: true,
            })
            .unwrap();

        assert_eq!((IMPLICIT, 0), h.step().await);
        assert_eq!((IMPLICIT, 1), h.step().await);
        // The row was already delivered, so the commit can't be retried.
        assert_eq!((State::NoTxn, 2), h.step().await);
        assert_eq!(1, sender.commits.load(Ordering::SeqCst));

        let log = h.log();
        assert_eq!(4, log.len(), "{log:?}");
        assert_eq!("close 0 rows: 1", log[1]);
        assert!(log[2].starts_with("close 1 error:"), "{log:?}");
        assert_eq!("flush 1 I", log[3]);
    }

    #[tokio::test]
    async fn show_status_in_any_state() {
        let mut h = Harness::new(DB::new_local(DbConfig::default()));
        h.push_batch(&["BEGIN", "SHOW TRANSACTION STATUS", "ROLLBACK"]);

        assert_eq!((EXPLICIT, 1), h.step().await);
        // Doesn't produce an event.
        assert_eq!((EXPLICIT, 2), h.step().await);
        assert_eq!((State::NoTxn, 3), h.step().await);
        assert_eq!("close 1 rows: 1", h.log()[1]);
    }

    #[tokio::test]
    async fn run_until_closed_rolls_back() {
        let mut h = Harness::new(DB::new_local(DbConfig::default()));
        h.push_batch(&["BEGIN", "INSERT INTO t VALUES ('a', 1)"]);
        assert_eq!((EXPLICIT, 1), h.step().await);
        assert_eq!((EXPLICIT, 2), h.step().await);
        let txn = h.executor.txn_state().txn().cloned().unwrap();

        h.stmt_buf.close();
        h.executor.run(&h.ctx).await.unwrap();
        assert_eq!(State::NoTxn, h.executor.txn_state().state());
        assert!(!txn.is_open());

        let err = h.executor.exec_cmd(&h.ctx).await.unwrap_err();
        assert!(matches!(err, ExecError::EndOfInput), "{err}");
    }
}
