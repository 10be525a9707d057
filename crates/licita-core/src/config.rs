//! Scan configuration, loadable from a JSON file.

use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::FeedError;
use crate::snapshot::SnapshotNaming;

/// Which timestamp of an observation counts as the organization's last action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecencySource {
    /// The entry's `updated` stamp.
    #[default]
    Updated,
    /// Issue date of the first contract notice, falling back to `updated`.
    ContractNotice,
}

/// How `tenders_count` is accumulated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountPolicy {
    /// Distinct entry IDs per organization.
    #[default]
    DistinctEntries,
    /// Every qualifying observation, including the same tender across snapshots.
    Observations,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub snapshot_dir: PathBuf,
    pub output_dir: PathBuf,
    pub workers: usize,
    /// Bounded queue between the lister and the workers; `0` means twice the workers.
    pub queue_capacity: usize,
    pub file_prefix: String,
    pub file_extension: String,
    /// IANA zone of the timestamps embedded in snapshot names.
    pub snapshot_timezone: String,
    /// CPV prefixes an entry must match; empty admits every entry.
    pub cpv_prefixes: Vec<String>,
    pub recency: RecencySource,
    pub count_policy: CountPolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let naming = SnapshotNaming::default();
        Self {
            snapshot_dir: PathBuf::from("snapshots"),
            output_dir: PathBuf::from("out"),
            workers: 8,
            queue_capacity: 0,
            file_prefix: naming.prefix,
            file_extension: naming.extension,
            snapshot_timezone: naming.timezone.name().to_string(),
            cpv_prefixes: vec!["091".into()],
            recency: RecencySource::default(),
            count_policy: CountPolicy::default(),
        }
    }
}

impl ScanConfig {
    /// Load from a JSON file; absent keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, FeedError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn naming(&self) -> Result<SnapshotNaming, FeedError> {
        let timezone: Tz = self
            .snapshot_timezone
            .parse()
            .map_err(|_| FeedError::InvalidTimezone(self.snapshot_timezone.clone()))?;
        Ok(SnapshotNaming {
            prefix: self.file_prefix.clone(),
            extension: self.file_extension.trim_start_matches('.').to_string(),
            timezone,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers.max(1)
    }

    pub fn queue_capacity(&self) -> usize {
        if self.queue_capacity == 0 {
            self.workers() * 2
        } else {
            self.queue_capacity
        }
    }
}
