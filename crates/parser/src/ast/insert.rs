use std::fmt;

use super::{AstParseable, Expr, Ident};
use crate::errors::Result;
use crate::keywords::Keyword;
use crate::parser::Parser;
use crate::tokens::Token;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert {
    pub table: Ident,
    pub columns: Vec<Ident>,
    pub rows: Vec<Vec<Expr>>,
}

impl AstParseable for Insert {
    fn parse(parser: &mut Parser) -> Result<Self> {
        parser.expect_keyword(Keyword::INSERT)?;
        parser.expect_keyword(Keyword::INTO)?;

        let table = Ident::parse(parser)?;

        let columns = if parser.consume_token(&Token::LeftParen) {
            let columns = parser.parse_comma_separated(Ident::parse)?;
            parser.expect_token(&Token::RightParen)?;
            columns
        } else {
            Vec::new()
        };

        parser.expect_keyword(Keyword::VALUES)?;
        let rows = parser.parse_comma_separated(|parser| {
            parser.expect_token(&Token::LeftParen)?;
            let row = parser.parse_comma_separated(Expr::parse)?;
            parser.expect_token(&Token::RightParen)?;
            Ok(row)
        })?;

        Ok(Insert {
            table,
            columns,
            rows,
        })
    }
}

impl Insert {
    pub fn max_placeholder(&self) -> usize {
        self.rows
            .iter()
            .flatten()
            .map(|e| e.max_placeholder())
            .max()
            .unwrap_or(0)
    }
}

impl fmt::Display for Insert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "INSERT INTO {}", self.table)?;
        if !self.columns.is_empty() {
            let cols: Vec<_> = self.columns.iter().map(|c| c.to_string()).collect();
            write!(f, " ({})", cols.join(", "))?;
        }
        let rows: Vec<_> = self
            .rows
            .iter()
            .map(|row| {
                let vals: Vec<_> = row.iter().map(|e| e.to_string()).collect();
                format!("({})", vals.join(", "))
            })
            .collect();
        write!(f, " VALUES {}", rows.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;
    use crate::ast::testutil::parse_ast;

    fn string(s: &str) -> Expr {
        Expr::Literal(Literal::SingleQuotedString(s.to_string()))
    }

    #[test]
    fn multiple_rows() {
        let node: Insert = parse_ast("insert into kv values ('a', 1), ('b', $1)").unwrap();
        let expected = Insert {
            table: Ident::from_string("kv"),
            columns: Vec::new(),
            rows: vec![
                vec![string("a"), Expr::Literal(Literal::Number("1".to_string()))],
                vec![string("b"), Expr::Placeholder(1)],
            ],
        };
        assert_eq!(expected, node);
        assert_eq!(1, node.max_placeholder());
    }

    #[test]
    fn with_columns() {
        let node: Insert = parse_ast("insert into kv (v, k) values (1, 'a')").unwrap();
        assert_eq!(
            vec![Ident::from_string("v"), Ident::from_string("k")],
            node.columns
        );
        assert_eq!("INSERT INTO kv (v, k) VALUES (1, 'a')", node.to_string());
    }

    #[test]
    fn missing_values() {
        parse_ast::<Insert>("insert into kv ('a', 1)").unwrap_err();
    }
}
