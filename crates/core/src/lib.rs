//! Core domain types and shared logic for the Tally scan validator.
//!
//! This crate defines the data model used across all other crates:
//! - Tracked codes and their normalization rules
//! - Scan event outcomes
//! - The clock abstraction (monotonic + fixed-offset wall time)
//! - Configuration shared by the registry, engine and binary

pub mod clock;
pub mod code;
pub mod config;
pub mod error;
pub mod scan;

pub use clock::{Clock, ManualClock, ScanTime, SystemClock};
pub use code::Code;
pub use error::{Error, Result};
pub use scan::ScanResult;

/// Maximum accepted code length, in characters.
pub const MAX_CODE_LEN: usize = 100;

/// Default page size for registry listings.
pub const DEFAULT_LIST_LIMIT: u32 = 500;

/// Default number of scan events returned by history queries.
pub const DEFAULT_HISTORY_LIMIT: u32 = 10;
