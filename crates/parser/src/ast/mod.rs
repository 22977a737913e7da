pub mod delete;
pub use delete::*;
pub mod expr;
pub use expr::*;
pub mod insert;
pub use insert::*;
pub mod select;
pub use select::*;
pub mod transaction;
pub use transaction::*;

use std::fmt;

use crate::errors::{ParseError, Result};
use crate::parser::Parser;
use crate::tokens::Token;

pub trait AstParseable: Sized {
    /// Parse an instance of Self from the provided parser.
    ///
    /// It's assumed that the parser is in the correct state for parsing Self,
    /// and if it isn't, an error should be returned.
    fn parse(parser: &mut Parser) -> Result<Self>;
}

#[cfg(test)]
mod testutil {
    use super::*;
    use crate::tokens::Tokenizer;

    /// Parse an AST node directly from a string.
    pub(crate) fn parse_ast<A: AstParseable>(s: &str) -> Result<A> {
        let toks = Tokenizer::new(s).tokenize()?;
        let mut parser = Parser::with_tokens(toks);
        A::parse(&mut parser)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ident {
    pub value: String,
}

impl Ident {
    pub fn from_string(s: impl Into<String>) -> Self {
        Ident { value: s.into() }
    }
}

impl AstParseable for Ident {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let tok = match parser.next() {
            Some(tok) => &tok.token,
            None => {
                return Err(ParseError::new(
                    "Expected identifier, found end of statement",
                ));
            }
        };

        match tok {
            // Unquoted identifiers are case insensitive.
            Token::Word(w) if w.quote.is_none() => Ok(Ident {
                value: w.value.to_lowercase(),
            }),
            Token::Word(w) => Ok(Ident {
                value: w.value.clone(),
            }),
            other => Err(ParseError::new(format!(
                "Unexpected token: {other}. Expected an identifier.",
            ))),
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}
