//! Classification of an ingestion batch into new and already-known codes.

use serde::Serialize;
use std::collections::HashSet;
use tally_core::Code;

/// Outcome of an ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub batch_id: String,
    pub new_count: usize,
    pub known_count: usize,
    /// First occurrences of codes that had no registry entry.
    pub new_codes: Vec<String>,
    /// Occurrences of codes that were registered, or appeared earlier in the batch.
    pub known_codes: Vec<String>,
}

/// Distinct codes in first-occurrence order.
pub fn distinct_codes(codes: &[Code]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(codes.len());
    codes
        .iter()
        .map(Code::as_str)
        .filter(|code| seen.insert(*code))
        .map(str::to_string)
        .collect()
}

/// A classified batch, ready to be written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestPlan {
    /// Every occurrence in input order; each one bumps the upload count.
    pub codes: Vec<String>,
    pub new_codes: Vec<String>,
    pub known_codes: Vec<String>,
}

impl IngestPlan {
    /// Classify `codes` against the registry state before the write.
    ///
    /// `registered` answers whether a code already has an entry. The first
    /// occurrence of an unregistered code is new; any later occurrence in
    /// the same batch is known.
    pub fn classify<F>(codes: Vec<Code>, registered: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        let mut seen = HashSet::with_capacity(codes.len());
        let mut plan = Self {
            codes: Vec::with_capacity(codes.len()),
            ..Self::default()
        };

        for code in codes {
            let code = code.into_string();
            let first_time = seen.insert(code.clone());
            if first_time && !registered(&code) {
                plan.new_codes.push(code.clone());
            } else {
                plan.known_codes.push(code.clone());
            }
            plan.codes.push(code);
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn into_report(self, batch_id: impl Into<String>) -> IngestReport {
        IngestReport {
            batch_id: batch_id.into(),
            new_count: self.new_codes.len(),
            known_count: self.known_codes.len(),
            new_codes: self.new_codes,
            known_codes: self.known_codes,
        }
    }
}
