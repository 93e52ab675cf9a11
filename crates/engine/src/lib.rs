//! Scan validation engine for Tally.
//!
//! The engine sits between a scanner and the registry store:
//! - [`DebounceGuard`] rejects fast repeats of one code in-process
//! - [`ExistenceCache`] answers "is this code tracked?" from memory
//! - [`ScanValidator`] runs the full classification and keeps counters and
//!   history consistent under concurrent traffic
//!
//! Each process owns its own ledger and cache. Several processes sharing one
//! registry agree eventually (after the cache TTL), not instantly.

pub mod cache;
pub mod debounce;
pub mod error;
pub mod ingest;
mod locks;
pub mod metrics;
pub mod validator;

pub use cache::{CacheStatus, ExistenceCache};
pub use debounce::{Admission, DebounceGuard};
pub use error::{EngineError, EngineResult};
pub use ingest::{IngestPlan, IngestReport};
pub use metrics::gather_metrics;
pub use validator::{ScanKind, ScanOutcome, ScanValidator};
