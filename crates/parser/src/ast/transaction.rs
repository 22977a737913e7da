use std::fmt;

use super::AstParseable;
use crate::errors::{ParseError, Result};
use crate::keywords::Keyword;
use crate::parser::Parser;
use crate::tokens::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    Serializable,
    Snapshot,
    ReadCommitted,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serializable => write!(f, "SERIALIZABLE"),
            Self::Snapshot => write!(f, "SNAPSHOT"),
            Self::ReadCommitted => write!(f, "READ COMMITTED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionPriority {
    Low,
    Normal,
    High,
}

impl fmt::Display for TransactionPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Normal => write!(f, "NORMAL"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// Modes provided to `BEGIN`.
///
/// Unset modes fall back to session defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionModes {
    pub isolation: Option<IsolationLevel>,
    pub read_only: Option<bool>,
    pub priority: Option<TransactionPriority>,
}

impl AstParseable for TransactionModes {
    /// Parses `BEGIN [TRANSACTION | WORK] [modes]` or `START TRANSACTION [modes]`.
    fn parse(parser: &mut Parser) -> Result<Self> {
        if parser.parse_keyword(Keyword::BEGIN) {
            parser.parse_one_of_keywords(&[Keyword::TRANSACTION, Keyword::WORK]);
        } else {
            parser.expect_keyword(Keyword::START)?;
            parser.expect_keyword(Keyword::TRANSACTION)?;
        }

        let mut modes = TransactionModes::default();
        loop {
            if parser.parse_keyword_sequence(&[Keyword::ISOLATION, Keyword::LEVEL]) {
                let level = if parser.parse_keyword(Keyword::SERIALIZABLE) {
                    IsolationLevel::Serializable
                } else if parser.parse_keyword(Keyword::SNAPSHOT) {
                    IsolationLevel::Snapshot
                } else if parser.parse_keyword_sequence(&[Keyword::READ, Keyword::COMMITTED]) {
                    IsolationLevel::ReadCommitted
                } else {
                    return Err(ParseError::new(
                        "Expected SERIALIZABLE, SNAPSHOT, or READ COMMITTED",
                    ));
                };
                set_once(&mut modes.isolation, level, "isolation level")?;
            } else if parser.parse_keyword_sequence(&[Keyword::READ, Keyword::ONLY]) {
                set_once(&mut modes.read_only, true, "read mode")?;
            } else if parser.parse_keyword_sequence(&[Keyword::READ, Keyword::WRITE]) {
                set_once(&mut modes.read_only, false, "read mode")?;
            } else if parser.parse_keyword(Keyword::PRIORITY) {
                let priority = match parser.parse_one_of_keywords(&[
                    Keyword::LOW,
                    Keyword::NORMAL,
                    Keyword::HIGH,
                ]) {
                    Some(Keyword::LOW) => TransactionPriority::Low,
                    Some(Keyword::HIGH) => TransactionPriority::High,
                    Some(_) => TransactionPriority::Normal,
                    None => return Err(ParseError::new("Expected LOW, NORMAL, or HIGH")),
                };
                set_once(&mut modes.priority, priority, "priority")?;
            } else {
                break;
            }

            // Modes may optionally be comma separated.
            parser.consume_token(&Token::Comma);
        }

        Ok(modes)
    }
}

fn set_once<T>(slot: &mut Option<T>, val: T, name: &str) -> Result<()> {
    if slot.is_some() {
        return Err(ParseError::new(format!(
            "Transaction {name} specified multiple times"
        )));
    }
    *slot = Some(val);
    Ok(())
}

impl fmt::Display for TransactionModes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BEGIN TRANSACTION")?;
        if let Some(isolation) = self.isolation {
            write!(f, " ISOLATION LEVEL {isolation}")?;
        }
        match self.read_only {
            Some(true) => write!(f, " READ ONLY")?,
            Some(false) => write!(f, " READ WRITE")?,
            None => (),
        }
        if let Some(priority) = self.priority {
            write!(f, " PRIORITY {priority}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::testutil::parse_ast;

    #[test]
    fn begin_no_modes() {
        for sql in ["begin", "BEGIN TRANSACTION", "begin work", "start transaction"] {
            let modes: TransactionModes = parse_ast(sql).unwrap();
            assert_eq!(TransactionModes::default(), modes, "{sql}");
        }
    }

    #[test]
    fn all_modes() {
        let modes: TransactionModes =
            parse_ast("begin isolation level read committed, read only priority high").unwrap();
        let expected = TransactionModes {
            isolation: Some(IsolationLevel::ReadCommitted),
            read_only: Some(true),
            priority: Some(TransactionPriority::High),
        };
        assert_eq!(expected, modes);
        assert_eq!(
            "BEGIN TRANSACTION ISOLATION LEVEL READ COMMITTED READ ONLY PRIORITY HIGH",
            modes.to_string()
        );
    }

    #[test]
    fn duplicate_mode() {
        parse_ast::<TransactionModes>("begin read only, read write").unwrap_err();
    }

    #[test]
    fn bad_isolation() {
        parse_ast::<TransactionModes>("begin isolation level chaos").unwrap_err();
    }
}
