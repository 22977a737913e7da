use std::fmt;

use crate::ast::{Delete, Ident, Insert, SelectNode, TransactionModes};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// SELECT ...
    Select(SelectNode),

    /// INSERT INTO ...
    Insert(Insert),

    /// DELETE FROM ...
    Delete(Delete),

    /// BEGIN [TRANSACTION] ...
    /// START TRANSACTION ...
    BeginTransaction(TransactionModes),

    /// COMMIT
    Commit,

    /// ROLLBACK
    Rollback,

    /// RELEASE SAVEPOINT <name>
    ReleaseSavepoint(Ident),

    /// SHOW TRANSACTION STATUS
    ShowTransactionStatus,
}

/// What a statement produces when executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementReturnType {
    /// Statement returns a set of rows.
    Rows,
    /// Statement returns a count of rows it modified.
    RowsAffected,
    /// Statement returns nothing beyond success or failure.
    Ack,
}

impl Statement {
    pub fn return_type(&self) -> StatementReturnType {
        match self {
            Self::Select(_) | Self::ShowTransactionStatus => StatementReturnType::Rows,
            Self::Insert(_) | Self::Delete(_) => StatementReturnType::RowsAffected,
            Self::BeginTransaction(_)
            | Self::Commit
            | Self::Rollback
            | Self::ReleaseSavepoint(_) => StatementReturnType::Ack,
        }
    }

    /// Command tag reported to clients.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Select(_) => "SELECT",
            Self::Insert(_) => "INSERT",
            Self::Delete(_) => "DELETE",
            Self::BeginTransaction(_) => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Rollback => "ROLLBACK",
            Self::ReleaseSavepoint(_) => "RELEASE",
            Self::ShowTransactionStatus => "SHOW",
        }
    }

    /// Number of positional placeholders referenced.
    ///
    /// This is the highest referenced index, not the count of distinct
    /// placeholders.
    pub fn num_placeholders(&self) -> usize {
        match self {
            Self::Select(select) => select.max_placeholder(),
            Self::Insert(insert) => insert.max_placeholder(),
            Self::Delete(delete) => delete.max_placeholder(),
            _ => 0,
        }
    }

    /// If this statement only controls transaction state.
    pub fn is_transaction_control(&self) -> bool {
        matches!(
            self,
            Self::BeginTransaction(_) | Self::Commit | Self::Rollback | Self::ReleaseSavepoint(_)
        )
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select(select) => write!(f, "{select}"),
            Self::Insert(insert) => write!(f, "{insert}"),
            Self::Delete(delete) => write!(f, "{delete}"),
            Self::BeginTransaction(modes) => write!(f, "{modes}"),
            Self::Commit => write!(f, "COMMIT TRANSACTION"),
            Self::Rollback => write!(f, "ROLLBACK TRANSACTION"),
            Self::ReleaseSavepoint(name) => write!(f, "RELEASE SAVEPOINT {name}"),
            Self::ShowTransactionStatus => write!(f, "SHOW TRANSACTION STATUS"),
        }
    }
}

/// A statement along with the sql text it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatement {
    pub ast: Statement,
    pub sql: String,
    pub num_placeholders: usize,
}

impl ParsedStatement {
    /// Create a parsed statement using the normalized sql text of the
    /// statement.
    pub fn new(ast: Statement) -> Self {
        ParsedStatement {
            sql: ast.to_string(),
            num_placeholders: ast.num_placeholders(),
            ast,
        }
    }
}

impl fmt::Display for ParsedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}
