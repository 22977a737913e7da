//! Parser for the small SQL dialect understood by the executor.
//!
//! Structure loosely follows sqlparser-rs: a tokenizer producing located
//! tokens, and AST nodes that know how to parse themselves.
pub mod ast;
pub mod errors;
pub mod keywords;
pub mod parser;
pub mod statement;
pub mod tokens;

pub use parser::{parse, parse_many, parse_one};
pub use statement::{ParsedStatement, Statement, StatementReturnType};
