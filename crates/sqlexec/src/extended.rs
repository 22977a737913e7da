//! Prepared statements and portals for executing statements with bound
//! arguments.
use parser::ParsedStatement;

use crate::errors::{ExecError, Result};
use crate::placeholders::PlaceholderInfo;
use crate::types::Datum;

#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub name: String,
    pub stmt: ParsedStatement,
}

impl PreparedStatement {
    pub fn new(name: impl Into<String>, stmt: ParsedStatement) -> Self {
        PreparedStatement {
            name: name.into(),
            stmt,
        }
    }

    pub fn num_placeholders(&self) -> usize {
        self.stmt.num_placeholders
    }
}

/// A prepared statement with its arguments bound, ready for execution.
#[derive(Debug, Clone)]
pub struct Portal {
    pub name: String,
    pub stmt: ParsedStatement,
    pub placeholders: PlaceholderInfo,
}

impl Portal {
    /// Bind `args` to a prepared statement.
    ///
    /// Errors if the number of arguments doesn't match the number of
    /// placeholders in the statement.
    pub fn new(name: impl Into<String>, prepared: &PreparedStatement, args: Vec<Datum>) -> Result<Self> {
        let expected = prepared.num_placeholders();
        if args.len() != expected {
            return Err(ExecError::QueryExecution(format!(
                "bind message supplies {} parameters, but prepared statement \"{}\" requires {}",
                args.len(),
                prepared.name,
                expected
            )));
        }

        Ok(Portal {
            name: name.into(),
            stmt: prepared.stmt.clone(),
            placeholders: PlaceholderInfo::new(args),
        })
    }
}
