use crate::ast::AstParseable;
use crate::errors::{ParseError, Result};
use crate::keywords::Keyword;
use crate::statement::{ParsedStatement, Statement};
use crate::tokens::{Token, TokenWithLocation, Tokenizer};

/// Parse a sql query into statements.
pub fn parse(sql: &str) -> Result<Vec<Statement>> {
    let toks = Tokenizer::new(sql).tokenize()?;
    Parser::with_tokens(toks).parse_statements()
}

/// Parse a sql query into statements, annotating each with its normalized sql
/// text and placeholder count.
pub fn parse_many(sql: &str) -> Result<Vec<ParsedStatement>> {
    Ok(parse(sql)?.into_iter().map(ParsedStatement::new).collect())
}

/// Parse a sql query that must contain exactly one statement.
pub fn parse_one(sql: &str) -> Result<ParsedStatement> {
    let mut stmts = parse(sql)?;
    if stmts.len() != 1 {
        return Err(ParseError::ExpectedOneStatement(stmts.len()));
    }
    let ast = stmts.remove(0);
    Ok(ParsedStatement {
        num_placeholders: ast.num_placeholders(),
        sql: sql.trim().to_string(),
        ast,
    })
}

#[derive(Debug)]
pub struct Parser {
    toks: Vec<TokenWithLocation>,
    /// Index of token we should process next.
    idx: usize,
}

impl Parser {
    pub fn with_tokens(toks: Vec<TokenWithLocation>) -> Self {
        Parser { toks, idx: 0 }
    }

    /// Parse any number of statements, including zero.
    pub fn parse_statements(&mut self) -> Result<Vec<Statement>> {
        let mut stmts = Vec::new();

        loop {
            // Allow empty statements.
            while self.consume_token(&Token::SemiColon) {}

            if self.peek().is_none() {
                break;
            }

            stmts.push(self.parse_statement()?);

            // Statements must be delimited by semicolons.
            if self.peek().is_some() && !self.consume_token(&Token::SemiColon) {
                let tok = self.peek().map(|t| t.token.to_string()).unwrap_or_default();
                return Err(ParseError::new(format!(
                    "Expected end of statement, found '{tok}'"
                )));
            }
        }

        Ok(stmts)
    }

    pub fn parse_statement(&mut self) -> Result<Statement> {
        let tok = match self.peek() {
            Some(tok) => tok,
            None => return Err(ParseError::new("Empty SQL statement")),
        };

        let keyword = match &tok.token {
            Token::Word(word) => match word.keyword {
                Some(k) => k,
                None => {
                    return Err(ParseError::new(format!(
                        "Expected a keyword, got {}",
                        word.value,
                    )));
                }
            },
            other => {
                return Err(ParseError::new(format!(
                    "Expected a SQL statement, got {other}"
                )));
            }
        };

        match keyword {
            Keyword::SELECT => Ok(Statement::Select(AstParseable::parse(self)?)),
            Keyword::INSERT => Ok(Statement::Insert(AstParseable::parse(self)?)),
            Keyword::DELETE => Ok(Statement::Delete(AstParseable::parse(self)?)),
            Keyword::BEGIN | Keyword::START => {
                Ok(Statement::BeginTransaction(AstParseable::parse(self)?))
            }
            Keyword::COMMIT => {
                self.next();
                self.parse_one_of_keywords(&[Keyword::TRANSACTION, Keyword::WORK]);
                Ok(Statement::Commit)
            }
            Keyword::ROLLBACK => {
                self.next();
                self.parse_one_of_keywords(&[Keyword::TRANSACTION, Keyword::WORK]);
                Ok(Statement::Rollback)
            }
            Keyword::RELEASE => {
                self.next();
                self.parse_keyword(Keyword::SAVEPOINT);
                Ok(Statement::ReleaseSavepoint(AstParseable::parse(self)?))
            }
            Keyword::SHOW => {
                self.next();
                self.expect_keyword(Keyword::TRANSACTION)?;
                self.expect_keyword(Keyword::STATUS)?;
                Ok(Statement::ShowTransactionStatus)
            }
            other => Err(ParseError::new(format!("Unexpected keyword: {other:?}"))),
        }
    }

    /// Parse a single keyword.
    pub fn parse_keyword(&mut self, keyword: Keyword) -> bool {
        let idx = self.idx;
        if let Some(tok) = self.next() {
            if tok.is_keyword(keyword) {
                return true;
            }
        }

        // Keyword doesn't match. Reset index and return.
        self.idx = idx;
        false
    }

    /// Parse an exact sequence of keywords.
    ///
    /// If the sequence doesn't match, idx is not changed, and false is
    /// returned.
    pub fn parse_keyword_sequence(&mut self, keywords: &[Keyword]) -> bool {
        let idx = self.idx;
        for keyword in keywords {
            if let Some(tok) = self.next() {
                if tok.is_keyword(*keyword) {
                    continue;
                }
            }

            // Keyword doesn't match. Reset index and return.
            self.idx = idx;
            return false;
        }
        true
    }

    /// Parse any of the provided keywords, returning which keyword was parsed.
    pub fn parse_one_of_keywords(&mut self, keywords: &[Keyword]) -> Option<Keyword> {
        let idx = self.idx;
        let kw = self.next()?.keyword();

        if let Some(kw) = kw {
            if keywords.contains(&kw) {
                return Some(kw);
            }
        }

        // No matches, reset index.
        self.idx = idx;
        None
    }

    pub fn expect_keyword(&mut self, keyword: Keyword) -> Result<()> {
        if self.parse_keyword(keyword) {
            return Ok(());
        }
        Err(ParseError::new(format!(
            "Expected keyword {keyword:?}, found {}",
            self.describe_next()
        )))
    }

    /// Consume the next token if it matches expected.
    pub fn consume_token(&mut self, expected: &Token) -> bool {
        let idx = self.idx;
        if let Some(tok) = self.next() {
            if &tok.token == expected {
                return true;
            }
        }
        self.idx = idx;
        false
    }

    pub fn expect_token(&mut self, expected: &Token) -> Result<()> {
        if self.consume_token(expected) {
            return Ok(());
        }
        Err(ParseError::new(format!(
            "Expected '{expected}', found {}",
            self.describe_next()
        )))
    }

    /// Parse a comma separated list of values using the provided function.
    pub fn parse_comma_separated<T>(
        &mut self,
        mut f: impl FnMut(&mut Parser) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut values = vec![f(self)?];
        while self.consume_token(&Token::Comma) {
            values.push(f(self)?);
        }
        Ok(values)
    }

    /// Get the next non-whitespace token.
    pub fn next(&mut self) -> Option<&TokenWithLocation> {
        loop {
            if self.idx >= self.toks.len() {
                return None;
            }

            let tok = &self.toks[self.idx];
            self.idx += 1;

            if matches!(&tok.token, Token::Whitespace) {
                continue;
            }

            return Some(tok);
        }
    }

    /// Get the next non-whitespace token without advancing.
    pub fn peek(&self) -> Option<&TokenWithLocation> {
        self.peek_nth(0)
    }

    /// Get the nth next non-whitespace token without advancing.
    pub fn peek_nth(&self, n: usize) -> Option<&TokenWithLocation> {
        self.toks[self.idx..]
            .iter()
            .filter(|t| !matches!(t.token, Token::Whitespace))
            .nth(n)
    }

    fn describe_next(&self) -> String {
        match self.peek() {
            Some(tok) => format!("'{}' at line {}, column {}", tok.token, tok.line, tok.col),
            None => "end of statement".to_string(),
        }
    }
}
