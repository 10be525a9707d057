//! Full publication history of a single tender.
//!
//! Snapshots are scanned newest first. Once a worker is handed a snapshot
//! taken before the tender existed, no older snapshot can contain it, so the
//! scan is cancelled instead of exhausting the directory.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use licita_core::{Fragment, SnapshotFile};
use tracing::{debug, info};

use crate::IngestError;
use crate::pool::{Admission, UnitHandler};

/// Pool consumer collecting the verbatim fragments of one entry ID.
#[derive(Debug)]
pub struct HistoryExtractor {
    reference_id: String,
    created_at: DateTime<Utc>,
    fragments: Mutex<Vec<Vec<u8>>>,
}

impl HistoryExtractor {
    pub fn new(reference_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            reference_id: reference_id.into(),
            created_at,
            fragments: Mutex::new(Vec::new()),
        }
    }

    pub fn into_history(self) -> TenderHistory {
        TenderHistory {
            reference_id: self.reference_id,
            fragments: self
                .fragments
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

impl UnitHandler for HistoryExtractor {
    type Unit = Fragment;

    fn admit(&self, file: &SnapshotFile) -> Admission {
        if file.timestamp < self.created_at {
            debug!(
                file = %file.file_name(),
                snapshot = %file.timestamp,
                created_at = %self.created_at,
                "snapshot predates the tender"
            );
            Admission::Stop
        } else {
            Admission::Decode
        }
    }

    fn handle(&self, file: &SnapshotFile, fragment: Fragment) {
        if fragment.id != self.reference_id {
            return;
        }
        debug!(file = %file.file_name(), bytes = fragment.bytes.len(), "history fragment found");
        self.fragments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fragment.bytes);
    }
}

/// Collected fragments, in the order workers found them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenderHistory {
    pub reference_id: String,
    pub fragments: Vec<Vec<u8>>,
}

impl TenderHistory {
    /// Every fragment concatenated in collection order.
    pub fn document(&self) -> Vec<u8> {
        self.fragments.concat()
    }

    /// Publish the document under [`history_file_name`] in `dir`.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf, IngestError> {
        let path = dir.join(history_file_name(&self.reference_id));
        let output_write = |source| IngestError::OutputWrite {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(dir).map_err(output_write)?;
        licita_core::publish_atomically(&path, |w| w.write_all(&self.document()))
            .map_err(output_write)?;
        info!(
            path = %path.display(),
            fragments = self.fragments.len(),
            "tender history written"
        );
        Ok(path)
    }
}

/// Deterministic file name for a reference ID: scheme dropped, path
/// separators turned into `_`, dots removed.
pub fn history_file_name(reference_id: &str) -> String {
    let rest = reference_id
        .split_once("://")
        .map_or(reference_id, |(_, rest)| rest);
    let mut name: String = rest
        .chars()
        .filter(|c| *c != '.')
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect();
    if name.is_empty() {
        name.push_str("history");
    }
    name.push_str(".xml");
    name
}

#[cfg(test)]
mod tests {
    use licita_core::{Entry, EntryDecoder, FragmentDecoder};

    use super::*;
    use crate::testutil::{EntryXml, feed_document, utc, write_snapshot};
    use crate::{CancelToken, WorkerPool};

    const TARGET: &str = "https://contrataciondelestado.es/sindicacion/licitacion/42";
    const MARKER: &str = "https://contrataciondelestado.es/sindicacion/licitacion/marker";

    #[test]
    fn file_name_is_sanitized() {
        assert_eq!(
            history_file_name(TARGET),
            "contrataciondelestadoes_sindicacion_licitacion_42.xml"
        );
        assert_eq!(history_file_name(r"a\b.c"), "a_bc.xml");
        assert_eq!(history_file_name(""), "history.xml");
    }

    #[test]
    fn stops_before_snapshots_older_than_creation() {
        let dir = tempfile::tempdir().unwrap();
        let d0 = utc(2025, 3, 10);
        let day = chrono::Duration::days(1);

        let target = EntryXml::new(TARGET, "2025-03-10T00:00:00Z");
        let mut files = Vec::new();
        for offset in [1i32, 0, -1, -2, -3] {
            let at = d0 + day * offset;
            let entries = match offset {
                // Only the D-2 snapshot holds the marker, and with the same ID.
                -2 => vec![EntryXml::new(TARGET, "2025-03-08T00:00:00Z").status(MARKER)],
                o if o >= 0 => vec![target.clone().status(&format!("S{o}"))],
                _ => vec![EntryXml::new("other", "2025-03-01T00:00:00Z")],
            };
            files.push(write_snapshot(
                dir.path(),
                at,
                None,
                &feed_document(&entries, &[]),
            ));
        }

        for workers in [1, 4] {
            let extractor = HistoryExtractor::new(TARGET, d0);
            let cancel = CancelToken::new();
            let stats = WorkerPool::new(workers, 2).run(files.clone(), &extractor, &cancel);
            let history = extractor.into_history();

            assert!(stats.stopped_early);
            assert!(cancel.is_cancelled());
            // D+1 and D0 only; D-1 and older are never opened.
            assert_eq!(stats.files_decoded, 2, "workers={workers}");
            assert_eq!(history.fragments.len(), 2, "workers={workers}");
            let doc = String::from_utf8(history.document()).unwrap();
            assert!(doc.contains("S1"));
            assert!(doc.contains("S0"));
            assert!(!doc.contains(MARKER));
        }
    }

    #[test]
    fn fragments_match_structured_decode() {
        let dir = tempfile::tempdir().unwrap();
        let body = feed_document(
            &[
                EntryXml::new("other", "2025-01-01T00:00:00Z"),
                EntryXml::new(TARGET, "2025-03-10T09:30:00+01:00").contact("a&amp;b@x.es", ""),
            ],
            &[],
        );
        let file = write_snapshot(dir.path(), utc(2025, 3, 11), None, &body);

        let extractor = HistoryExtractor::new(TARGET, utc(2025, 1, 1));
        WorkerPool::new(1, 1).run(vec![file], &extractor, &CancelToken::new());
        let history = extractor.into_history();
        assert_eq!(history.fragments.len(), 1);

        let structured: Entry = EntryDecoder::new(body.as_bytes())
            .map(Result::unwrap)
            .find(|e| e.id == TARGET)
            .unwrap();
        let reparsed: Entry = EntryDecoder::new(history.fragments[0].as_slice())
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(reparsed.id, structured.id);
        assert_eq!(reparsed.updated, structured.updated);

        // The captured bytes appear verbatim in the source document.
        let fragment = std::str::from_utf8(&history.fragments[0]).unwrap();
        assert!(body.contains(fragment));
        assert!(fragment.contains("a&amp;b@x.es"));
        let again: Vec<_> = FragmentDecoder::new(body.as_bytes())
            .map(Result::unwrap)
            .filter(|f| f.id == TARGET)
            .collect();
        assert_eq!(again[0].bytes, history.fragments[0]);
    }

    #[test]
    fn writes_concatenated_document() {
        let dir = tempfile::tempdir().unwrap();
        let history = TenderHistory {
            reference_id: TARGET.into(),
            fragments: vec![b"<entry>1</entry>".to_vec(), b"<entry>2</entry>".to_vec()],
        };
        let out = dir.path().join("out");
        let path = history.write_to_dir(&out).unwrap();
        assert_eq!(path.file_name().unwrap(), history_file_name(TARGET).as_str());
        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            "<entry>1</entry><entry>2</entry>"
        );
    }
}
