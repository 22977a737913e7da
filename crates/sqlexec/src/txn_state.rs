//! Transaction state machine driven by the connection executor.
//!
//! The executor derives an [`Event`] from every command it executes and
//! applies it to the [`TxnState`]. Applying an event moves the machine to its
//! next [`State`], performs the accompanying transaction action (starting,
//! restarting or rolling back the KV transaction), and tells the executor how
//! to move its cursor through the [`AdvanceInfo`].
use std::fmt;
use std::sync::Arc;

use kvclient::api::{IsolationLevel, UserPriority};
use kvclient::hlc::Timestamp;
use kvclient::{DB, Txn, TxnOptions};
use tracing::{debug, trace, warn};

use crate::client_comm::TxnStatusIndicator;
use crate::commands::CmdPos;
use crate::errors::{ExecError, Result, internal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No transaction is open. Statements start an implicit transaction.
    NoTxn,
    /// A transaction is open. Implicit transactions are started for a single
    /// statement and end with it.
    Open { implicit: bool },
    /// An explicit transaction encountered an error. Only ROLLBACK is
    /// accepted.
    Aborted,
    /// The transaction was committed with RELEASE SAVEPOINT and only awaits
    /// COMMIT or ROLLBACK.
    CommitWait,
}

impl State {
    pub fn is_open(&self) -> bool {
        matches!(self, State::Open { .. })
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::NoTxn => write!(f, "NoTxn"),
            State::Open { implicit: true } => write!(f, "Open(implicit)"),
            State::Open { implicit: false } => write!(f, "Open"),
            State::Aborted => write!(f, "Aborted"),
            State::CommitWait => write!(f, "CommitWait"),
        }
    }
}

/// Modes applied to a transaction when it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxnStartPayload {
    pub priority: UserPriority,
    pub isolation: IsolationLevel,
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Start a transaction.
    TxnStart {
        implicit: bool,
        payload: TxnStartPayload,
    },
    /// The transaction was committed.
    TxnFinishCommitted,
    /// The transaction was rolled back by the client.
    TxnFinishAborted,
    /// The transaction was committed with RELEASE SAVEPOINT.
    TxnReleased,
    /// A statement failed and the transaction cannot be retried.
    NonRetriableErr { is_commit: bool },
    /// A statement failed with an error that may succeed on retry.
    RetriableErr { can_auto_retry: bool, is_commit: bool },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::TxnStart { implicit, .. } => write!(f, "TxnStart(implicit: {implicit})"),
            Event::TxnFinishCommitted => write!(f, "TxnFinishCommitted"),
            Event::TxnFinishAborted => write!(f, "TxnFinishAborted"),
            Event::TxnReleased => write!(f, "TxnReleased"),
            Event::NonRetriableErr { is_commit } => {
                write!(f, "NonRetriableErr(is_commit: {is_commit})")
            }
            Event::RetriableErr {
                can_auto_retry,
                is_commit,
            } => write!(
                f,
                "RetriableErr(can_auto_retry: {can_auto_retry}, is_commit: {is_commit})"
            ),
        }
    }
}

/// How the executor should move its cursor after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceCode {
    /// Never produced by a valid transition.
    Unknown,
    /// Execute the current command again. Used after starting an implicit
    /// transaction so the statement runs inside it.
    StayInPlace,
    /// Move to the next command.
    AdvanceOne,
    /// Skip to the next sync, ignoring the rest of the batch.
    SkipBatch,
    /// Move back to the start of the transaction to retry it.
    Rewind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvanceInfo {
    pub code: AdvanceCode,
    /// Position to move back to when `code` is `Rewind`.
    pub rewind_pos: CmdPos,
}

/// Work done on the KV transaction when a transition is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnAction {
    None,
    Start,
    /// The transaction was already finalized, drop our handle.
    Finish,
    Rollback,
    Restart,
}

/// The transition table.
fn transition(state: State, event: &Event) -> Option<(State, TxnAction, AdvanceCode)> {
    use AdvanceCode::*;

    Some(match (state, *event) {
        (State::NoTxn, Event::TxnStart { implicit: true, .. }) => {
            (State::Open { implicit: true }, TxnAction::Start, StayInPlace)
        }
        (State::NoTxn, Event::TxnStart { implicit: false, .. }) => {
            (State::Open { implicit: false }, TxnAction::Start, AdvanceOne)
        }
        (State::NoTxn, Event::NonRetriableErr { .. }) => (State::NoTxn, TxnAction::None, SkipBatch),

        (State::Open { .. }, Event::TxnFinishCommitted) => {
            (State::NoTxn, TxnAction::Finish, AdvanceOne)
        }
        (State::Open { .. }, Event::TxnFinishAborted) => {
            (State::NoTxn, TxnAction::Rollback, AdvanceOne)
        }
        (State::Open { .. }, Event::TxnReleased) => {
            (State::CommitWait, TxnAction::None, AdvanceOne)
        }
        (State::Open { implicit: true }, Event::NonRetriableErr { .. }) => {
            (State::NoTxn, TxnAction::Rollback, SkipBatch)
        }
        (State::Open { implicit: false }, Event::NonRetriableErr { is_commit: true }) => {
            (State::NoTxn, TxnAction::Rollback, SkipBatch)
        }
        (State::Open { implicit: false }, Event::NonRetriableErr { is_commit: false }) => {
            (State::Aborted, TxnAction::Rollback, SkipBatch)
        }
        (
            State::Open { implicit },
            Event::RetriableErr {
                can_auto_retry: true,
                ..
            },
        ) => (State::Open { implicit }, TxnAction::Restart, Rewind),
        (
            State::Open { implicit: true },
            Event::RetriableErr {
                can_auto_retry: false,
                ..
            },
        ) => (State::NoTxn, TxnAction::Rollback, SkipBatch),
        (
            State::Open { implicit: false },
            Event::RetriableErr {
                can_auto_retry: false,
                is_commit: true,
            },
        ) => (State::NoTxn, TxnAction::Rollback, SkipBatch),
        (
            State::Open { implicit: false },
            Event::RetriableErr {
                can_auto_retry: false,
                is_commit: false,
            },
        ) => (State::Aborted, TxnAction::Rollback, SkipBatch),

        (State::Aborted, Event::TxnFinishAborted) => (State::NoTxn, TxnAction::None, AdvanceOne),
        (State::Aborted, Event::NonRetriableErr { .. }) => {
            (State::Aborted, TxnAction::None, SkipBatch)
        }

        (State::CommitWait, Event::TxnFinishCommitted | Event::TxnFinishAborted) => {
            (State::NoTxn, TxnAction::Finish, AdvanceOne)
        }
        (State::CommitWait, Event::NonRetriableErr { .. }) => {
            (State::CommitWait, TxnAction::None, SkipBatch)
        }

        _ => return None,
    })
}

/// Transaction state for a connection executor along with the KV
/// transaction backing it.
#[derive(Debug)]
pub struct TxnState {
    state: State,
    db: DB,
    txn: Option<Arc<Txn>>,
    /// Set if the KV transaction is owned by the caller. External
    /// transactions are never committed, rolled back or restarted here.
    external: bool,
    priority: UserPriority,
    isolation: IsolationLevel,
    read_only: bool,
    /// Position of the first command of the current transaction.
    rewind_pos: CmdPos,
    auto_retry_count: usize,
}

impl TxnState {
    pub fn new(db: DB) -> Self {
        TxnState {
            state: State::NoTxn,
            db,
            txn: None,
            external: false,
            priority: UserPriority::default(),
            isolation: IsolationLevel::default(),
            read_only: false,
            rewind_pos: 0,
            auto_retry_count: 0,
        }
    }

    /// Create state bound to a transaction owned by the caller. The state
    /// starts open and stays bound to that transaction.
    pub fn new_external(db: DB, txn: Arc<Txn>) -> Self {
        TxnState {
            state: State::Open { implicit: false },
            priority: txn.priority(),
            isolation: txn.isolation(),
            txn: Some(txn),
            external: true,
            ..Self::new(db)
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn txn(&self) -> Option<&Arc<Txn>> {
        self.txn.as_ref()
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    pub fn is_implicit(&self) -> bool {
        matches!(self.state, State::Open { implicit: true })
    }

    pub fn priority(&self) -> UserPriority {
        self.priority
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Read timestamp of the current transaction, if one is open.
    pub fn read_timestamp(&self) -> Option<Timestamp> {
        self.txn.as_ref().map(|txn| txn.read_timestamp())
    }

    pub fn rewind_pos(&self) -> CmdPos {
        self.rewind_pos
    }

    pub fn auto_retry_count(&self) -> usize {
        self.auto_retry_count
    }

    pub fn status_indicator(&self) -> TxnStatusIndicator {
        match self.state {
            State::NoTxn | State::Open { implicit: true } => TxnStatusIndicator::Idle,
            State::Open { implicit: false } | State::CommitWait => TxnStatusIndicator::InBlock,
            State::Aborted => TxnStatusIndicator::InFailedBlock,
        }
    }

    /// Apply an event produced by executing the command at `pos`.
    pub async fn apply(&mut self, event: Event, pos: CmdPos) -> Result<AdvanceInfo> {
        let (next, action, code) =
            transition(self.state, &event).ok_or_else(|| ExecError::InvalidTransition {
                state: self.state.to_string(),
                event: event.to_string(),
            })?;

        match action {
            TxnAction::None => (),
            TxnAction::Start => {
                let payload = match event {
                    Event::TxnStart { payload, .. } => payload,
                    other => return Err(internal!("starting txn on event {other}")),
                };
                self.start_txn(payload, pos);
            }
            TxnAction::Finish => self.finish_txn(),
            TxnAction::Rollback => self.rollback_txn().await,
            TxnAction::Restart => self.restart_txn()?,
        }

        trace!(from = %self.state, to = %next, %event, ?code, pos, "txn state transition");
        self.state = next;

        Ok(AdvanceInfo {
            code,
            rewind_pos: self.rewind_pos,
        })
    }

    /// Roll back any open transaction that we own. Called when the executor
    /// shuts down.
    pub async fn finish(&mut self) {
        if self.state.is_open() {
            self.rollback_txn().await;
        }
        self.state = State::NoTxn;
    }

    fn start_txn(&mut self, payload: TxnStartPayload, pos: CmdPos) {
        self.priority = payload.priority;
        self.isolation = payload.isolation;
        self.read_only = payload.read_only;
        self.rewind_pos = pos;
        self.auto_retry_count = 0;

        if self.external {
            return;
        }
        let txn = self.db.new_txn(TxnOptions {
            priority: Some(payload.priority),
            isolation: Some(payload.isolation),
        });
        debug!(txn_id = %txn.id(), priority = %payload.priority, isolation = %payload.isolation, "started txn");
        self.txn = Some(Arc::new(txn));
    }

    fn finish_txn(&mut self) {
        if !self.external {
            self.txn = None;
        }
    }

    async fn rollback_txn(&mut self) {
        if self.external {
            return;
        }
        if let Some(txn) = self.txn.take() {
            if let Err(e) = txn.rollback().await {
                warn!(%e, txn_id = %txn.id(), "failed to roll back txn");
            }
        }
    }

    fn restart_txn(&mut self) -> Result<()> {
        if self.external {
            return Err(internal!("attempted to restart an external txn"));
        }
        let txn = self
            .txn
            .as_ref()
            .ok_or_else(|| internal!("missing txn to restart"))?;
        txn.prepare_for_retry()?;
        self.auto_retry_count += 1;
        Ok(())
    }
}
