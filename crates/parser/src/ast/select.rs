use std::fmt;

use super::{AstParseable, Expr, Ident};
use crate::errors::Result;
use crate::keywords::{Keyword, RESERVED_FOR_COLUMN_ALIAS};
use crate::parser::Parser;
use crate::tokens::Token;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectNode {
    /// Projection list. May included wildcards.
    pub projections: Vec<SelectExpr>,
    /// FROM
    pub from: Option<Ident>,
    /// WHERE
    pub where_expr: Option<Expr>,
}

impl AstParseable for SelectNode {
    fn parse(parser: &mut Parser) -> Result<Self> {
        parser.expect_keyword(Keyword::SELECT)?;

        // Select list
        let projections = parser.parse_comma_separated(SelectExpr::parse)?;

        // FROM
        let from = if parser.parse_keyword(Keyword::FROM) {
            Some(Ident::parse(parser)?)
        } else {
            None
        };

        // WHERE
        let where_expr = if parser.parse_keyword(Keyword::WHERE) {
            Some(Expr::parse(parser)?)
        } else {
            None
        };

        Ok(SelectNode {
            projections,
            from,
            where_expr,
        })
    }
}

impl SelectNode {
    pub fn max_placeholder(&self) -> usize {
        let projections = self
            .projections
            .iter()
            .map(|p| match p {
                SelectExpr::Expr(expr) | SelectExpr::AliasedExpr(expr, _) => expr.max_placeholder(),
                SelectExpr::Wildcard => 0,
            })
            .max()
            .unwrap_or(0);
        let selection = self.where_expr.as_ref().map(|e| e.max_placeholder()).unwrap_or(0);
        projections.max(selection)
    }
}

impl fmt::Display for SelectNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let projections: Vec<_> = self.projections.iter().map(|p| p.to_string()).collect();
        write!(f, "SELECT {}", projections.join(", "))?;
        if let Some(from) = &self.from {
            write!(f, " FROM {from}")?;
        }
        if let Some(where_expr) = &self.where_expr {
            write!(f, " WHERE {where_expr}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectExpr {
    /// An unaliases expression.
    Expr(Expr),
    /// An aliased expression.
    ///
    /// `<expr> AS <ident>`
    AliasedExpr(Expr, Ident),
    /// An unqualified wild card.
    ///
    /// `*`
    Wildcard,
}

impl AstParseable for SelectExpr {
    fn parse(parser: &mut Parser) -> Result<Self> {
        if parser.consume_token(&Token::Mul) {
            return Ok(SelectExpr::Wildcard);
        }

        let expr = Expr::parse(parser)?;

        if parser.parse_keyword(Keyword::AS) {
            let alias = Ident::parse(parser)?;
            return Ok(SelectExpr::AliasedExpr(expr, alias));
        }

        // Bare alias, e.g. `SELECT 1 one`.
        let bare_alias = match parser.peek() {
            Some(tok) => match &tok.token {
                Token::Word(w) => match w.keyword {
                    Some(kw) => !RESERVED_FOR_COLUMN_ALIAS.contains(&kw),
                    None => true,
                },
                _ => false,
            },
            None => false,
        };
        if bare_alias {
            let alias = Ident::parse(parser)?;
            return Ok(SelectExpr::AliasedExpr(expr, alias));
        }

        Ok(SelectExpr::Expr(expr))
    }
}

impl fmt::Display for SelectExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expr(expr) => write!(f, "{expr}"),
            Self::AliasedExpr(expr, alias) => write!(f, "{expr} AS {alias}"),
            Self::Wildcard => write!(f, "*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;
    use crate::ast::testutil::parse_ast;

    #[test]
    fn select_literal() {
        let node: SelectNode = parse_ast("SELECT 1").unwrap();
        let expected = SelectNode {
            projections: vec![SelectExpr::Expr(Expr::Literal(Literal::Number(
                "1".to_string(),
            )))],
            from: None,
            where_expr: None,
        };
        assert_eq!(expected, node);
    }

    #[test]
    fn select_aliases() {
        let node: SelectNode = parse_ast("select 1 as one, 2 two, * from KV").unwrap();
        assert_eq!(
            vec![
                SelectExpr::AliasedExpr(
                    Expr::Literal(Literal::Number("1".to_string())),
                    Ident::from_string("one")
                ),
                SelectExpr::AliasedExpr(
                    Expr::Literal(Literal::Number("2".to_string())),
                    Ident::from_string("two")
                ),
                SelectExpr::Wildcard,
            ],
            node.projections
        );
        assert_eq!(Some(Ident::from_string("kv")), node.from);
    }

    #[test]
    fn select_where() {
        let node: SelectNode = parse_ast("select v from kv where k = $1").unwrap();
        assert_eq!("SELECT v FROM kv WHERE k = $1", node.to_string());
        assert_eq!(1, node.max_placeholder());
    }
}
