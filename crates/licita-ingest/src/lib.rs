//! Concurrent ingestion of snapshot directories and the consumers that run on it.

mod cancel;
mod error;

pub mod audit;
pub mod history;
pub mod pool;
pub mod registry;
pub mod tombstones;

#[cfg(test)]
mod testutil;

pub use audit::{NoticeAudit, NoticeReport};
pub use cancel::CancelToken;
pub use error::IngestError;
pub use history::{HistoryExtractor, TenderHistory, history_file_name};
pub use pool::{Admission, ScanStats, UnitHandler, WorkerPool};
pub use registry::{CpvFilter, OrgAggregator, OrgRegistry, OrganizationRecord};
pub use tombstones::TombstoneTally;

use licita_core::{ScanConfig, SnapshotFile, list_snapshots};

/// Snapshots of the configured directory, newest first.
pub fn snapshot_files(config: &ScanConfig) -> Result<Vec<SnapshotFile>, IngestError> {
    let naming = config.naming()?;
    Ok(list_snapshots(&config.snapshot_dir, &naming)?)
}
