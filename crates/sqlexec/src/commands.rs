//! Commands consumed by the connection executor.
use std::fmt;
use std::time::Instant;

use parser::ParsedStatement;

use crate::types::Datum;

/// Position of a command in a statement buffer.
///
/// Positions are assigned at push time and increase monotonically starting
/// at zero.
pub type CmdPos = i64;

/// Execute a single statement.
#[derive(Debug, Clone)]
pub struct ExecStmt {
    pub stmt: ParsedStatement,
    pub time_received: Instant,
    /// If this is the last statement before the next sync. Statements in an
    /// implicit transaction are only auto-committed when this is set.
    pub last_in_batch: bool,
}

impl ExecStmt {
    pub fn new(stmt: ParsedStatement, last_in_batch: bool) -> Self {
        ExecStmt {
            stmt,
            time_received: Instant::now(),
            last_in_batch,
        }
    }
}

/// Create a named prepared statement.
///
/// An empty name refers to the unnamed prepared statement, which is
/// overwritten by each new unnamed prepare.
#[derive(Debug, Clone)]
pub struct PrepareStmt {
    pub name: String,
    pub stmt: ParsedStatement,
}

/// Bind arguments to a prepared statement, creating a portal.
#[derive(Debug, Clone)]
pub struct BindStmt {
    pub prepared_statement_name: String,
    pub portal_name: String,
    pub args: Vec<Datum>,
}

/// Execute a previously bound portal.
#[derive(Debug, Clone)]
pub struct ExecPortal {
    pub name: String,
    /// Max number of rows to produce, zero for unlimited.
    pub limit: usize,
    /// If the next command is a sync. Mirrors `last_in_batch` for portals.
    pub followed_by_sync: bool,
    pub time_received: Instant,
}

impl ExecPortal {
    pub fn new(name: impl Into<String>, limit: usize, followed_by_sync: bool) -> Self {
        ExecPortal {
            name: name.into(),
            limit,
            followed_by_sync,
            time_received: Instant::now(),
        }
    }
}

/// End of a batch. Results are flushed to the client and implicit
/// transactions are finished.
#[derive(Debug, Clone, Copy)]
pub struct SyncCmd {
    /// Set if the sync was sent by a client, unset if it was inserted to
    /// delimit a simple query.
    pub explicit_from_client: bool,
}

#[derive(Debug, Clone)]
pub enum Command {
    ExecStmt(ExecStmt),
    PrepareStmt(PrepareStmt),
    BindStmt(BindStmt),
    ExecPortal(ExecPortal),
    Sync(SyncCmd),
}

impl Command {
    pub fn is_sync(&self) -> bool {
        matches!(self, Command::Sync(_))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::ExecStmt(cmd) => write!(f, "ExecStmt: {}", cmd.stmt.sql),
            Command::PrepareStmt(cmd) => {
                write!(f, "PrepareStmt: {} ({})", cmd.name, cmd.stmt.sql)
            }
            Command::BindStmt(cmd) => write!(
                f,
                "BindStmt: {} -> {} ({} args)",
                cmd.prepared_statement_name,
                cmd.portal_name,
                cmd.args.len()
            ),
            Command::ExecPortal(cmd) => write!(f, "ExecPortal: {}", cmd.name),
            Command::Sync(_) => write!(f, "Sync"),
        }
    }
}

impl From<ExecStmt> for Command {
    fn from(value: ExecStmt) -> Self {
        Command::ExecStmt(value)
    }
}

impl From<PrepareStmt> for Command {
    fn from(value: PrepareStmt) -> Self {
        Command::PrepareStmt(value)
    }
}

impl From<BindStmt> for Command {
    fn from(value: BindStmt) -> Self {
        Command::BindStmt(value)
    }
}

impl From<ExecPortal> for Command {
    fn from(value: ExecPortal) -> Self {
        Command::ExecPortal(value)
    }
}

impl From<SyncCmd> for Command {
    fn from(value: SyncCmd) -> Self {
        Command::Sync(value)
    }
}
