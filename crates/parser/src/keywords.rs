/// Try to get a keyword from a string, ignoring string casing.
pub fn keyword_from_str(s: &str) -> Option<Keyword> {
    let s = unicase::Ascii::new(s);
    let idx = match KEYWORD_STRINGS.binary_search(&s) {
        Ok(idx) => idx,
        Err(_) => return None,
    };
    Some(ALL_KEYWORDS[idx])
}

/// Generate an enum of keywords.
///
/// Keywords must be listed in alphabetical order, lookups binary search the
/// generated string list.
macro_rules! define_keywords {
    ($($ident:ident),*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Keyword {
            $($ident),*
        }

        pub const ALL_KEYWORDS: &[Keyword] = &[
            $(Keyword::$ident),*
        ];

        pub const KEYWORD_STRINGS: &[unicase::Ascii<&str>] = &[
            $(unicase::Ascii::new(stringify!($ident)),)*
        ];
    };
}

#[rustfmt::skip]
define_keywords!(
    AND,
    AS,
    BEGIN,
    COMMIT,
    COMMITTED,
    DELETE,
    FALSE,
    FROM,
    HIGH,
    INSERT,
    INTO,
    ISOLATION,
    LEVEL,
    LOW,
    NORMAL,
    NOT,
    NULL,
    ONLY,
    OR,
    PRIORITY,
    READ,
    RELEASE,
    ROLLBACK,
    SAVEPOINT,
    SELECT,
    SERIALIZABLE,
    SHOW,
    SNAPSHOT,
    START,
    STATUS,
    TRANSACTION,
    TRUE,
    VALUES,
    WHERE,
    WORK,
    WRITE
);

/// Keywords that can't be used as a bare column alias.
pub const RESERVED_FOR_COLUMN_ALIAS: &[Keyword] = &[Keyword::FROM, Keyword::WHERE];
