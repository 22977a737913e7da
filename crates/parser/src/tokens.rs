use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use crate::errors::{ParseError, Result};
use crate::keywords::{Keyword, keyword_from_str};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub value: String,
    /// Quote character if this was a quoted identifier.
    pub quote: Option<char>,
    /// Keyword if this word matched one. Always `None` for quoted words.
    pub keyword: Option<Keyword>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(Word),
    SingleQuotedString(String),
    /// Unparsed number.
    Number(String),
    /// Positional placeholder, e.g. `$1`.
    Placeholder(usize),
    /// Whitespace, including comments.
    Whitespace,
    LeftParen,
    RightParen,
    Comma,
    SemiColon,
    Period,
    Eq,
    Neq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Mul,
    Div,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Word(w) => match w.quote {
                Some(q) => write!(f, "{q}{}{q}", w.value),
                None => write!(f, "{}", w.value),
            },
            Self::SingleQuotedString(s) => write!(f, "'{s}'"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Placeholder(n) => write!(f, "${n}"),
            Self::Whitespace => write!(f, " "),
            Self::LeftParen => write!(f, "("),
            Self::RightParen => write!(f, ")"),
            Self::Comma => write!(f, ","),
            Self::SemiColon => write!(f, ";"),
            Self::Period => write!(f, "."),
            Self::Eq => write!(f, "="),
            Self::Neq => write!(f, "<>"),
            Self::Lt => write!(f, "<"),
            Self::LtEq => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::GtEq => write!(f, ">="),
            Self::Plus => write!(f, "+"),
            Self::Minus => write!(f, "-"),
            Self::Mul => write!(f, "*"),
            Self::Div => write!(f, "/"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenWithLocation {
    pub token: Token,
    /// Zero-indexed line the token starts on.
    pub line: usize,
    /// Zero-indexed column the token starts on.
    pub col: usize,
}

impl TokenWithLocation {
    pub fn is_keyword(&self, other: Keyword) -> bool {
        self.keyword() == Some(other)
    }

    pub fn keyword(&self) -> Option<Keyword> {
        match &self.token {
            Token::Word(w) => w.keyword,
            _ => None,
        }
    }
}

#[derive(Debug)]
struct State<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    col: usize,
}

impl State<'_> {
    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            s.push(c);
            self.next();
        }
        s
    }

    fn error(&self, msg: impl Into<String>) -> ParseError {
        ParseError::Tokenize {
            msg: msg.into(),
            line: self.line,
            col: self.col,
        }
    }
}

#[derive(Debug)]
pub struct Tokenizer<'a> {
    state: State<'a>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(query: &'a str) -> Self {
        Tokenizer {
            state: State {
                chars: query.chars().peekable(),
                line: 0,
                col: 0,
            },
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<TokenWithLocation>> {
        let mut toks = Vec::new();
        loop {
            let (line, col) = (self.state.line, self.state.col);
            let token = match self.next_token()? {
                Some(token) => token,
                None => break,
            };
            toks.push(TokenWithLocation { token, line, col });
        }
        Ok(toks)
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        let c = match self.state.peek() {
            Some(c) => c,
            None => return Ok(None),
        };

        let tok = match c {
            c if c.is_whitespace() => {
                self.state.take_while(|c| c.is_whitespace());
                Token::Whitespace
            }
            '\'' => {
                self.state.next();
                Token::SingleQuotedString(self.take_quoted('\'')?)
            }
            '"' => {
                self.state.next();
                let value = self.take_quoted('"')?;
                Token::Word(Word {
                    value,
                    quote: Some('"'),
                    keyword: None,
                })
            }
            '0'..='9' => Token::Number(self.state.take_while(|c| c.is_ascii_digit() || c == '.')),
            '$' => {
                self.state.next();
                let digits = self.state.take_while(|c| c.is_ascii_digit());
                let idx = match digits.parse::<usize>() {
                    Ok(idx) if idx > 0 => idx,
                    _ => return Err(self.state.error("Expected placeholder index after '$'")),
                };
                Token::Placeholder(idx)
            }
            '-' => {
                self.state.next();
                if self.state.peek() == Some('-') {
                    // Line comment.
                    self.state.take_while(|c| c != '\n');
                    Token::Whitespace
                } else {
                    Token::Minus
                }
            }
            '!' => {
                self.state.next();
                if self.state.peek() == Some('=') {
                    self.state.next();
                    Token::Neq
                } else {
                    return Err(self.state.error("Expected '=' after '!'"));
                }
            }
            '<' => {
                self.state.next();
                match self.state.peek() {
                    Some('=') => {
                        self.state.next();
                        Token::LtEq
                    }
                    Some('>') => {
                        self.state.next();
                        Token::Neq
                    }
                    _ => Token::Lt,
                }
            }
            '>' => {
                self.state.next();
                if self.state.peek() == Some('=') {
                    self.state.next();
                    Token::GtEq
                } else {
                    Token::Gt
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let value = self.state.take_while(|c| c.is_alphanumeric() || c == '_');
                let keyword = keyword_from_str(&value);
                Token::Word(Word {
                    value,
                    quote: None,
                    keyword,
                })
            }
            other => {
                let tok = match other {
                    '(' => Token::LeftParen,
                    ')' => Token::RightParen,
                    ',' => Token::Comma,
                    ';' => Token::SemiColon,
                    '.' => Token::Period,
                    '=' => Token::Eq,
                    '+' => Token::Plus,
                    '*' => Token::Mul,
                    '/' => Token::Div,
                    other => return Err(self.state.error(format!("Unexpected character '{other}'"))),
                };
                self.state.next();
                tok
            }
        };

        Ok(Some(tok))
    }

    /// Read until the closing quote. A doubled quote character is an escaped
    /// quote.
    ///
    /// Assumes the opening quote has already been consumed.
    fn take_quoted(&mut self, quote: char) -> Result<String> {
        let mut s = String::new();
        loop {
            match self.state.next() {
                Some(c) if c == quote => {
                    if self.state.peek() == Some(quote) {
                        self.state.next();
                        s.push(quote);
                    } else {
                        return Ok(s);
                    }
                }
                Some(c) => s.push(c),
                None => return Err(self.state.error("Unterminated quoted string")),
            }
        }
    }
}
