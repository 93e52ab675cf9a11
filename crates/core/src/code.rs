//! Tracked code type and normalization.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A tracked identifier (typically a barcode), trimmed and length-checked.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Code(String);

impl Code {
    /// Parse a raw input string.
    ///
    /// Surrounding whitespace is removed. Empty codes and codes longer than
    /// [`crate::MAX_CODE_LEN`] characters are rejected.
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(crate::Error::InvalidCode("code is empty".to_string()));
        }
        let len = trimmed.chars().count();
        if len > crate::MAX_CODE_LEN {
            return Err(crate::Error::InvalidCode(format!(
                "code is {len} characters long (max {})",
                crate::MAX_CODE_LEN
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Normalize a batch of raw inputs, dropping blank entries.
    ///
    /// Order and repeats are preserved; the caller decides how repeats are
    /// classified. Over-long entries are still an error.
    pub fn parse_batch<I, S>(raw: I) -> crate::Result<Vec<Self>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter()
            .filter(|s| !s.as_ref().trim().is_empty())
            .map(|s| Self::parse(s.as_ref()))
            .collect()
    }

    /// Get the code string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for Code {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<Code> for String {
    fn from(code: Code) -> Self {
        code.0
    }
}

impl AsRef<str> for Code {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code({})", self.0)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
