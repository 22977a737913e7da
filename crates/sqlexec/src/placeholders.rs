use crate::errors::{ExecError, Result};
use crate::types::Datum;

/// Values bound to the positional placeholders of a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceholderInfo {
    values: Vec<Datum>,
}

impl PlaceholderInfo {
    pub fn new(values: Vec<Datum>) -> Self {
        PlaceholderInfo { values }
    }

    /// Get the value for placeholder `$idx`. Placeholders are one-indexed.
    pub fn get(&self, idx: usize) -> Result<&Datum> {
        idx.checked_sub(1)
            .and_then(|idx| self.values.get(idx))
            .ok_or_else(|| {
                ExecError::QueryExecution(format!("no value provided for placeholder: ${idx}"))
            })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
