pub type Result<T, E = ParseError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Failed to tokenize at line {line}, column {col}: {msg}")]
    Tokenize {
        msg: String,
        line: usize,
        col: usize,
    },

    #[error("{0}")]
    Parse(String),

    #[error("Expected exactly one statement, got {0}")]
    ExpectedOneStatement(usize),
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        ParseError::Parse(msg.into())
    }
}
