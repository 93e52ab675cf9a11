//! Repository traits for registry operations.

pub mod codes;
pub mod ingestion;
pub mod scans;

pub use codes::CodeRepo;
pub use ingestion::IngestionRepo;
pub use scans::ScanEventRepo;
