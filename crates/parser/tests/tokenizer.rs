use parser::keywords::Keyword;
use parser::tokens::{Token, TokenWithLocation, Tokenizer, Word};

#[test]
fn tokenize_simple_string() {
    let toks = Tokenizer::new("select 'hello'").tokenize().unwrap();
    let expected = vec![
        TokenWithLocation {
            token: Token::Word(Word {
                value: "select".to_string(),
                quote: None,
                keyword: Some(Keyword::SELECT),
            }),
            line: 0,
            col: 0,
        },
        TokenWithLocation {
            token: Token::Whitespace,
            line: 0,
            col: 6,
        },
        TokenWithLocation {
            token: Token::SingleQuotedString("hello".to_string()),
            line: 0,
            col: 7,
        },
    ];
    assert_eq!(expected, toks);
}

#[test]
fn tokenize_multiline_locations() {
    let toks = Tokenizer::new("select *\nfrom kv;").tokenize().unwrap();
    let locs: Vec<_> = toks
        .iter()
        .filter(|t| t.token != Token::Whitespace)
        .map(|t| (t.token.to_string(), t.line, t.col))
        .collect();
    assert_eq!(
        vec![
            ("select".to_string(), 0, 0),
            ("*".to_string(), 0, 7),
            ("from".to_string(), 1, 0),
            ("kv".to_string(), 1, 5),
            (";".to_string(), 1, 7),
        ],
        locs
    );
}

#[test]
fn tokenize_placeholders() {
    let toks: Vec<_> = Tokenizer::new("$1+$12")
        .tokenize()
        .unwrap()
        .into_iter()
        .map(|t| t.token)
        .collect();
    assert_eq!(
        vec![Token::Placeholder(1), Token::Plus, Token::Placeholder(12)],
        toks
    );
}

#[test]
fn tokenize_quoted_word_is_not_keyword() {
    let toks = Tokenizer::new(r#""select""#).tokenize().unwrap();
    assert_eq!(
        Token::Word(Word {
            value: "select".to_string(),
            quote: Some('"'),
            keyword: None,
        }),
        toks[0].token
    );
}
