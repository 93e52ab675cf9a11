//! Scan event outcomes as persisted in the scan history.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome recorded for a scan attempt that reached the registry.
///
/// Suppressed duplicates never reach the history, so there is no variant for them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanResult {
    /// The code is registered and its counter was incremented.
    Success,
    /// The code is not registered.
    Unknown,
}

impl ScanResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for ScanResult {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "success" => Ok(Self::Success),
            "unknown" => Ok(Self::Unknown),
            other => Err(crate::Error::InvalidScanResult(other.to_string())),
        }
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
