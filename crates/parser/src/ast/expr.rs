use std::fmt;

use super::{AstParseable, Ident};
use crate::errors::{ParseError, Result};
use crate::keywords::Keyword;
use crate::parser::Parser;
use crate::tokens::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    /// Plus, e.g. `+9`
    Plus,
    /// Minus, e.g. `-9`
    Minus,
    /// Not, e.g. `NOT(true)`
    Not,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plus => write!(f, "+"),
            Self::Minus => write!(f, "-"),
            Self::Not => write!(f, "NOT "),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    /// Plus, e.g. `a + b`
    Plus,
    /// Minus, e.g. `a - b`
    Minus,
    /// Multiply, e.g. `a * b`
    Multiply,
    /// Divide, e.g. `a / b`
    Divide,
    /// Greater than, e.g. `a > b`
    Gt,
    /// Less than, e.g. `a < b`
    Lt,
    /// Greater equal, e.g. `a >= b`
    GtEq,
    /// Less equal, e.g. `a <= b`
    LtEq,
    /// Equal, e.g. `a = b`
    Eq,
    /// Not equal, e.g. `a <> b`
    NotEq,
    /// And, e.g. `a AND b`
    And,
    /// Or, e.g. `a OR b`
    Or,
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::GtEq => ">=",
            Self::LtEq => "<=",
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::And => "AND",
            Self::Or => "OR",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    /// Unparsed number literal.
    Number(String),
    /// String literal.
    SingleQuotedString(String),
    /// Boolean literal.
    Boolean(bool),
    /// Null literal
    Null,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::SingleQuotedString(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Self::Boolean(true) => write!(f, "TRUE"),
            Self::Boolean(false) => write!(f, "FALSE"),
            Self::Null => write!(f, "NULL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// Column identifier.
    Ident(Ident),
    /// An expression literal,
    Literal(Literal),
    /// Positional placeholder, one-indexed.
    ///
    /// `$1`
    Placeholder(usize),
    /// A parenthesized expression.
    Nested(Box<Expr>),
    /// A unary expression.
    UnaryExpr {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    /// A binary expression.
    BinaryExpr {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
}

impl AstParseable for Expr {
    fn parse(parser: &mut Parser) -> Result<Self> {
        Self::parse_subexpr(parser, 0)
    }
}

// Precdences, ordered low to high.
const PREC_OR: u8 = 10;
const PREC_AND: u8 = 20;
const PREC_NOT: u8 = 30;
const PREC_COMPARISON: u8 = 50; // <=, =, etc
const PREC_ADD_SUB: u8 = 80;
const PREC_MUL_DIV_MOD: u8 = 90;
const PREC_UNARY: u8 = 100;

impl Expr {
    /// Highest placeholder index referenced by this expression, zero if none.
    pub fn max_placeholder(&self) -> usize {
        match self {
            Self::Ident(_) | Self::Literal(_) => 0,
            Self::Placeholder(idx) => *idx,
            Self::Nested(expr) => expr.max_placeholder(),
            Self::UnaryExpr { expr, .. } => expr.max_placeholder(),
            Self::BinaryExpr { left, right, .. } => {
                left.max_placeholder().max(right.max_placeholder())
            }
        }
    }

    fn parse_subexpr(parser: &mut Parser, precendence: u8) -> Result<Self> {
        let mut expr = Expr::parse_prefix(parser)?;

        loop {
            let next_precedence = Self::get_infix_precedence(parser);
            if precendence >= next_precedence {
                break;
            }

            expr = Self::parse_infix(parser, expr, next_precedence)?;
        }

        Ok(expr)
    }

    fn parse_prefix(parser: &mut Parser) -> Result<Self> {
        let tok = match parser.next() {
            Some(tok) => tok.token.clone(),
            None => {
                return Err(ParseError::new(
                    "Expected prefix expression, found end of statement",
                ));
            }
        };

        let expr = match tok {
            Token::Word(w) => match w.keyword {
                Some(Keyword::TRUE) => Expr::Literal(Literal::Boolean(true)),
                Some(Keyword::FALSE) => Expr::Literal(Literal::Boolean(false)),
                Some(Keyword::NULL) => Expr::Literal(Literal::Null),
                Some(Keyword::NOT) => Expr::UnaryExpr {
                    op: UnaryOperator::Not,
                    expr: Box::new(Expr::parse_subexpr(parser, PREC_NOT)?),
                },
                _ if w.quote.is_none() => Expr::Ident(Ident {
                    value: w.value.to_lowercase(),
                }),
                _ => Expr::Ident(Ident { value: w.value }),
            },
            Token::SingleQuotedString(s) => Expr::Literal(Literal::SingleQuotedString(s)),
            Token::Number(s) => Expr::Literal(Literal::Number(s)),
            Token::Placeholder(idx) => Expr::Placeholder(idx),
            Token::Minus => Expr::UnaryExpr {
                op: UnaryOperator::Minus,
                expr: Box::new(Expr::parse_subexpr(parser, PREC_UNARY)?),
            },
            Token::Plus => Expr::UnaryExpr {
                op: UnaryOperator::Plus,
                expr: Box::new(Expr::parse_subexpr(parser, PREC_UNARY)?),
            },
            Token::LeftParen => {
                let expr = Expr::parse(parser)?;
                parser.expect_token(&Token::RightParen)?;
                Expr::Nested(Box::new(expr))
            }
            other => {
                return Err(ParseError::new(format!(
                    "Unexpected token '{other}'. Expected expression."
                )));
            }
        };

        Ok(expr)
    }

    fn parse_infix(parser: &mut Parser, prefix: Expr, precendence: u8) -> Result<Self> {
        let tok = match parser.next() {
            Some(tok) => tok.token.clone(),
            None => {
                return Err(ParseError::new(
                    "Expected infix expression, found end of statement",
                ));
            }
        };

        let op = match &tok {
            Token::Eq => BinaryOperator::Eq,
            Token::Neq => BinaryOperator::NotEq,
            Token::Gt => BinaryOperator::Gt,
            Token::GtEq => BinaryOperator::GtEq,
            Token::Lt => BinaryOperator::Lt,
            Token::LtEq => BinaryOperator::LtEq,
            Token::Plus => BinaryOperator::Plus,
            Token::Minus => BinaryOperator::Minus,
            Token::Mul => BinaryOperator::Multiply,
            Token::Div => BinaryOperator::Divide,
            Token::Word(w) if w.keyword == Some(Keyword::AND) => BinaryOperator::And,
            Token::Word(w) if w.keyword == Some(Keyword::OR) => BinaryOperator::Or,
            other => {
                return Err(ParseError::new(format!(
                    "Unable to parse token '{other}' as an expression"
                )));
            }
        };

        Ok(Expr::BinaryExpr {
            left: Box::new(prefix),
            op,
            right: Box::new(Expr::parse_subexpr(parser, precendence)?),
        })
    }

    /// Get the relative precedence of the next operator.
    ///
    /// Zero is returned if the next token isn't an infix operator.
    ///
    /// See <https://www.postgresql.org/docs/16/sql-syntax-lexical.html#SQL-PRECEDENCE>
    fn get_infix_precedence(parser: &Parser) -> u8 {
        let tok = match parser.peek() {
            Some(tok) => &tok.token,
            None => return 0,
        };

        match tok {
            Token::Word(w) if w.keyword == Some(Keyword::OR) => PREC_OR,
            Token::Word(w) if w.keyword == Some(Keyword::AND) => PREC_AND,

            // Equalities
            Token::Eq | Token::Neq | Token::Lt | Token::LtEq | Token::Gt | Token::GtEq => {
                PREC_COMPARISON
            }

            // Numeric operators
            Token::Plus | Token::Minus => PREC_ADD_SUB,
            Token::Mul | Token::Div => PREC_MUL_DIV_MOD,

            _ => 0,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(ident) => write!(f, "{ident}"),
            Self::Literal(lit) => write!(f, "{lit}"),
            Self::Placeholder(idx) => write!(f, "${idx}"),
            Self::Nested(expr) => write!(f, "({expr})"),
            Self::UnaryExpr { op, expr } => write!(f, "{op}{expr}"),
            Self::BinaryExpr { left, op, right } => write!(f, "{left} {op} {right}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::testutil::parse_ast;

    fn number(s: &str) -> Box<Expr> {
        Box::new(Expr::Literal(Literal::Number(s.to_string())))
    }

    #[test]
    fn precedence_mul_over_add() {
        let expr: Expr = parse_ast("1 + 2 * 3").unwrap();
        let expected = Expr::BinaryExpr {
            left: number("1"),
            op: BinaryOperator::Plus,
            right: Box::new(Expr::BinaryExpr {
                left: number("2"),
                op: BinaryOperator::Multiply,
                right: number("3"),
            }),
        };
        assert_eq!(expected, expr);
    }

    #[test]
    fn left_associative() {
        let expr: Expr = parse_ast("8 - 4 - 2").unwrap();
        let expected = Expr::BinaryExpr {
            left: Box::new(Expr::BinaryExpr {
                left: number("8"),
                op: BinaryOperator::Minus,
                right: number("4"),
            }),
            op: BinaryOperator::Minus,
            right: number("2"),
        };
        assert_eq!(expected, expr);
    }

    #[test]
    fn unary_minus_binds_tightly() {
        let expr: Expr = parse_ast("-1 * 2").unwrap();
        let expected = Expr::BinaryExpr {
            left: Box::new(Expr::UnaryExpr {
                op: UnaryOperator::Minus,
                expr: number("1"),
            }),
            op: BinaryOperator::Multiply,
            right: number("2"),
        };
        assert_eq!(expected, expr);
    }

    #[test]
    fn not_binds_looser_than_comparison() {
        let expr: Expr = parse_ast("NOT k = 'a' AND TRUE").unwrap();
        assert_eq!("NOT k = 'a' AND TRUE", expr.to_string());
        match expr {
            Expr::BinaryExpr {
                op: BinaryOperator::And,
                left,
                ..
            } => assert!(matches!(
                *left,
                Expr::UnaryExpr {
                    op: UnaryOperator::Not,
                    ..
                }
            )),
            other => panic!("unexpected expr: {other:?}"),
        }
    }

    #[test]
    fn nested_display_roundtrip() {
        let expr: Expr = parse_ast("(1 + $2) * $1").unwrap();
        assert_eq!("(1 + $2) * $1", expr.to_string());
        assert_eq!(2, expr.max_placeholder());
    }

    #[test]
    fn missing_operand() {
        parse_ast::<Expr>("1 +").unwrap_err();
    }
}
