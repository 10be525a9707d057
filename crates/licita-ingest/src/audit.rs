//! Notice-type audit: which publication notices occur across the corpus,
//! and under which folder statuses.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use licita_core::{Entry, SnapshotFile};
use tracing::info;

use crate::IngestError;
use crate::pool::UnitHandler;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoticeTypeStats {
    pub occurrences: u64,
    /// File name of the snapshot where the notice type first turned up.
    pub first_file: String,
    /// Folder status code → occurrences alongside this notice type.
    pub by_status: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
struct AuditState {
    seen: HashSet<String>,
    table: BTreeMap<String, NoticeTypeStats>,
}

/// Pool consumer tabulating notice types over distinct entries.
///
/// Each entry ID is counted once, at the first occurrence any worker reaches.
#[derive(Debug, Default)]
pub struct NoticeAudit {
    state: Mutex<AuditState>,
}

impl NoticeAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, file_name: &str, entry: &Entry) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.seen.insert(entry.id.clone()) {
            return;
        }
        let status = &entry.contract.status_code.value;
        for notice in &entry.contract.notices {
            let stats = state
                .table
                .entry(notice.notice_type.value.clone())
                .or_insert_with(|| NoticeTypeStats {
                    first_file: file_name.to_string(),
                    ..NoticeTypeStats::default()
                });
            stats.occurrences += 1;
            *stats.by_status.entry(status.clone()).or_default() += 1;
        }
    }

    pub fn into_report(self) -> NoticeReport {
        let state = self
            .state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        NoticeReport {
            distinct_entries: state.seen.len(),
            notice_types: state.table,
        }
    }
}

impl UnitHandler for NoticeAudit {
    type Unit = Entry;

    fn handle(&self, file: &SnapshotFile, entry: Entry) {
        self.observe(&file.file_name(), &entry);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoticeReport {
    pub distinct_entries: usize,
    pub notice_types: BTreeMap<String, NoticeTypeStats>,
}

impl NoticeReport {
    /// One line per notice type, then its status sub-counts indented.
    pub fn write_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        for (code, stats) in &self.notice_types {
            let code = if code.is_empty() { "(none)" } else { code.as_str() };
            writeln!(w, "{code}: {} {}", stats.occurrences, stats.first_file)?;
            for (status, n) in &stats.by_status {
                let status = if status.is_empty() { "(none)" } else { status.as_str() };
                writeln!(w, "  {status}: {n}")?;
            }
            writeln!(w)?;
        }
        Ok(())
    }

    pub fn publish(&self, path: &Path) -> Result<(), IngestError> {
        licita_core::publish_atomically(path, |w| self.write_text(w)).map_err(|source| {
            IngestError::OutputWrite {
                path: path.to_path_buf(),
                source,
            }
        })?;
        info!(
            path = %path.display(),
            notice_types = self.notice_types.len(),
            entries = self.distinct_entries,
            "notice audit written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use licita_core::EntryDecoder;

    use super::*;
    use crate::testutil::{EntryXml, feed_document, utc, write_snapshot};
    use crate::{CancelToken, WorkerPool};

    fn entries(xml: &[EntryXml]) -> Vec<Entry> {
        let doc = feed_document(xml, &[]);
        EntryDecoder::new(doc.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn counts_each_entry_once() {
        let audit = NoticeAudit::new();
        let batch = entries(&[
            EntryXml::new("a", "2025-01-01T00:00:00Z")
                .status("PUB")
                .notice("DOC_CN", "2025-01-01"),
            EntryXml::new("b", "2025-01-02T00:00:00Z")
                .status("ADJ")
                .notice("DOC_CN", "2025-01-02")
                .notice("DOC_CAN_ADJ", "2025-02-02"),
        ]);
        for e in &batch {
            audit.observe("snap_1.atom", e);
        }
        // Re-seen in an older snapshot at a later stage: ignored.
        let later = entries(&[EntryXml::new("a", "2025-03-01T00:00:00Z")
            .status("RES")
            .notice("DOC_CN", "2025-01-01")
            .notice("DOC_CAN_ADJ", "2025-03-01")]);
        audit.observe("snap_0.atom", &later[0]);

        let report = audit.into_report();
        assert_eq!(report.distinct_entries, 2);
        let cn = &report.notice_types["DOC_CN"];
        assert_eq!(cn.occurrences, 2);
        assert_eq!(cn.first_file, "snap_1.atom");
        assert_eq!(cn.by_status["PUB"], 1);
        assert_eq!(cn.by_status["ADJ"], 1);
        let adj = &report.notice_types["DOC_CAN_ADJ"];
        assert_eq!(adj.occurrences, 1);
        assert!(!adj.by_status.contains_key("RES"));
    }

    #[test]
    fn report_text_layout() {
        let audit = NoticeAudit::new();
        for e in entries(&[EntryXml::new("a", "2025-01-01T00:00:00Z")
            .status("EV")
            .notice("DOC_CN", "2025-01-01")])
        {
            audit.observe("f.atom", &e);
        }
        let mut out = Vec::new();
        audit.into_report().write_text(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "DOC_CN: 1 f.atom\n  EV: 1\n\n");
    }

    #[test]
    fn dedups_across_files_in_pool() {
        let dir = tempfile::tempdir().unwrap();
        let body = feed_document(
            &[EntryXml::new("same", "2025-01-01T00:00:00Z").notice("DOC_CN", "2025-01-01")],
            &[],
        );
        let files: Vec<_> = (1..=4)
            .map(|d| write_snapshot(dir.path(), utc(2025, 1, d), None, &body))
            .collect();
        let audit = NoticeAudit::new();
        WorkerPool::new(3, 2).run(files, &audit, &CancelToken::new());
        let report = audit.into_report();
        assert_eq!(report.distinct_entries, 1);
        assert_eq!(report.notice_types["DOC_CN"].occurrences, 1);
    }
}
