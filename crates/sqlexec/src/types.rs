//! Values produced and consumed by statement execution.
use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
}

pub type Datums = Vec<Datum>;

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Datum::Null => DataType::Unknown,
            Datum::Bool(_) => DataType::Bool,
            Datum::Int(_) => DataType::Int,
            Datum::String(_) => DataType::String,
        }
    }

    /// Compare two non-null datums of the same type.
    ///
    /// Returns `None` if either side is null or the types differ.
    pub fn compare(&self, other: &Datum) -> Option<Ordering> {
        match (self, other) {
            (Datum::Bool(a), Datum::Bool(b)) => Some(a.cmp(b)),
            (Datum::Int(a), Datum::Int(b)) => Some(a.cmp(b)),
            (Datum::String(a), Datum::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Bool(v) => write!(f, "{v}"),
            Datum::Int(v) => write!(f, "{v}"),
            Datum::String(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Datum {
    fn from(value: i64) -> Self {
        Datum::Int(value)
    }
}

impl From<bool> for Datum {
    fn from(value: bool) -> Self {
        Datum::Bool(value)
    }
}

impl From<&str> for Datum {
    fn from(value: &str) -> Self {
        Datum::String(value.to_string())
    }
}

impl From<String> for Datum {
    fn from(value: String) -> Self {
        Datum::String(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Type could not be determined, e.g. a column containing only nulls.
    Unknown,
    Bool,
    Int,
    String,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Unknown => write!(f, "unknown"),
            DataType::Bool => write!(f, "bool"),
            DataType::Int => write!(f, "int"),
            DataType::String => write!(f, "string"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultColumn {
    pub name: String,
    pub typ: DataType,
}

impl ResultColumn {
    pub fn new(name: impl Into<String>, typ: DataType) -> Self {
        ResultColumn {
            name: name.into(),
            typ,
        }
    }
}

pub type ResultColumns = Vec<ResultColumn>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_mismatched_types() {
        assert_eq!(None, Datum::Int(1).compare(&Datum::from("1")));
        assert_eq!(None, Datum::Null.compare(&Datum::Null));
        assert_eq!(
            Some(Ordering::Less),
            Datum::Int(1).compare(&Datum::Int(2))
        );
    }

    #[test]
    fn datum_json() {
        let s = serde_json::to_string(&Datum::from("hello")).unwrap();
        assert_eq!(r#"{"String":"hello"}"#, s);
        let d: Datum = serde_json::from_str(&s).unwrap();
        assert_eq!(Datum::from("hello"), d);
    }
}
