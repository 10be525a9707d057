//! Snapshot files on disk and their ordering.
//!
//! Snapshot names carry a local wall-clock timestamp and an optional
//! sequence: `<prefix>_<YYYYMMDD>_<HHMMSS>[_<seq>].<ext>`. Listing returns
//! the newest snapshot first so consumers can stop once they reach data
//! older than they care about.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use tracing::{debug, trace, warn};

use crate::FeedError;

static STAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(\d{8})_(\d{6})(?:_(\d+))?$").expect("static regex"));

/// How snapshot files are named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotNaming {
    pub prefix: String,
    /// Without the leading dot.
    pub extension: String,
    /// Zone of the wall-clock stamp embedded in the name.
    pub timezone: Tz,
}

impl Default for SnapshotNaming {
    fn default() -> Self {
        Self {
            prefix: "licitacionesPerfilesContratanteCompleto3".into(),
            extension: "atom".into(),
            timezone: chrono_tz::Europe::Madrid,
        }
    }
}

impl SnapshotNaming {
    /// File name for a snapshot taken at `at`.
    pub fn file_name(&self, at: DateTime<Utc>, sequence: Option<u32>) -> String {
        let local = at.with_timezone(&self.timezone);
        let stamp = local.format("%Y%m%d_%H%M%S");
        match sequence {
            Some(seq) => format!("{}_{stamp}_{seq}.{}", self.prefix, self.extension),
            None => format!("{}_{stamp}.{}", self.prefix, self.extension),
        }
    }

    /// Local midnight of `date` in the snapshot zone, so a calendar date
    /// compares against file stamps on the same wall clock.
    pub fn start_of_day(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let midnight = date.and_hms_opt(0, 0, 0)?;
        self.timezone
            .from_local_datetime(&midnight)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Parse a file name into its timestamp and sequence.
    ///
    /// Names with another extension, or whose stem carries no stamp, are
    /// not snapshots. A name that matches the pattern but not the calendar
    /// (`20241399`) is also rejected.
    pub fn parse(&self, file_name: &str) -> Option<(DateTime<Utc>, Option<u32>)> {
        let (stem, ext) = file_name.rsplit_once('.')?;
        if !ext.eq_ignore_ascii_case(&self.extension) {
            return None;
        }
        let caps = STAMP.captures(stem)?;
        let naive =
            NaiveDateTime::parse_from_str(&format!("{}{}", &caps[1], &caps[2]), "%Y%m%d%H%M%S")
                .ok()?;
        // Ambiguous wall-clock times (DST fall-back) take the earlier instant.
        let local = self.timezone.from_local_datetime(&naive).earliest()?;
        let sequence = match caps.get(3) {
            Some(m) => Some(m.as_str().parse().ok()?),
            None => None,
        };
        Some((local.with_timezone(&Utc), sequence))
    }
}

/// The snapshot behind one directory entry, if it is one.
///
/// An entry that cannot be read is logged and skipped.
fn snapshot_entry(
    dirent: std::io::Result<std::fs::DirEntry>,
    naming: &SnapshotNaming,
) -> Option<SnapshotFile> {
    let dirent = match dirent {
        Ok(dirent) => dirent,
        Err(e) => {
            warn!(error = %e, "skipping unreadable directory entry");
            return None;
        }
    };
    if dirent.file_type().is_ok_and(|t| t.is_dir()) {
        return None;
    }
    let name = dirent.file_name();
    let Some(name) = name.to_str() else {
        trace!(name = ?dirent.file_name(), "skipping non-UTF-8 name");
        return None;
    };
    if !name.starts_with(&naming.prefix) {
        return None;
    }
    match naming.parse(name) {
        Some((timestamp, sequence)) => Some(SnapshotFile {
            path: dirent.path(),
            timestamp,
            sequence,
        }),
        None => {
            trace!(name, "skipping non-snapshot file");
            None
        }
    }
}

/// One snapshot file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub sequence: Option<u32>,
}

impl SnapshotFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Newest first; same instant by sequence ascending (missing first), then name.
    pub fn newest_first(a: &Self, b: &Self) -> Ordering {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.sequence.cmp(&b.sequence))
            .then_with(|| a.path.file_name().cmp(&b.path.file_name()))
    }
}

/// List the snapshots in `dir`, newest first.
///
/// Non-matching names and subdirectories are skipped. Only a directory that
/// cannot be read at all is an error.
pub fn list_snapshots(dir: &Path, naming: &SnapshotNaming) -> Result<Vec<SnapshotFile>, FeedError> {
    let mut files: Vec<SnapshotFile> = std::fs::read_dir(dir)
        .map_err(|source| FeedError::DirectoryUnreadable {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|dirent| snapshot_entry(dirent, naming))
        .collect();
    files.sort_by(SnapshotFile::newest_first);
    debug!(dir = %dir.display(), count = files.len(), "listed snapshots");
    Ok(files)
}
