use std::fmt;

use super::{AstParseable, Expr, Ident};
use crate::errors::Result;
use crate::keywords::Keyword;
use crate::parser::Parser;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    pub table: Ident,
    pub where_expr: Option<Expr>,
}

impl AstParseable for Delete {
    fn parse(parser: &mut Parser) -> Result<Self> {
        parser.expect_keyword(Keyword::DELETE)?;
        parser.expect_keyword(Keyword::FROM)?;

        let table = Ident::parse(parser)?;
        let where_expr = if parser.parse_keyword(Keyword::WHERE) {
            Some(Expr::parse(parser)?)
        } else {
            None
        };

        Ok(Delete { table, where_expr })
    }
}

impl Delete {
    pub fn max_placeholder(&self) -> usize {
        self.where_expr
            .as_ref()
            .map(|e| e.max_placeholder())
            .unwrap_or(0)
    }
}

impl fmt::Display for Delete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DELETE FROM {}", self.table)?;
        if let Some(where_expr) = &self.where_expr {
            write!(f, " WHERE {where_expr}")?;
        }
        Ok(())
    }
}
