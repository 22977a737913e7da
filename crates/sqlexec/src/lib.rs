//! SQL statement execution.
//!
//! Statements are pushed into a [`StmtBuf`] and executed in order by a
//! [`ConnExecutor`], which drives the transaction state machine and reports
//! results through a [`ClientComm`]. The [`InternalExecutor`] runs
//! statements from within the system and exposes their results as a
//! [`RowsIterator`].
pub mod client_comm;
pub mod commands;
pub mod config;
pub mod conn_executor;
pub mod errors;
pub mod extended;
pub mod internal;
pub mod placeholders;
pub mod result_channel;
pub mod rows_iter;
pub mod session;
pub mod stmt_buf;
pub mod txn_state;
pub mod types;

mod planner;

pub use client_comm::{ClientComm, CommandResult, TxnStatusIndicator};
pub use config::{ExecutorConfig, SessionData};
pub use conn_executor::ConnExecutor;
pub use errors::{ExecError, Result};
pub use internal::{InternalDb, InternalExecutor, InternalTxn};
pub use rows_iter::RowsIterator;
pub use session::{BatchOutput, Session, StatementOutput};
pub use stmt_buf::StmtBuf;
pub use types::{DataType, Datum, Datums, ResultColumn, ResultColumns};
