//! Fixed-size worker pool over a newest-first list of snapshot files.
//!
//! A feeder on the calling thread pushes files into a bounded queue; each
//! worker opens one file at a time, decodes it with a fresh decoder, and
//! hands every unit to the consumer. The pool itself is the same for every
//! consumer; only the [`UnitHandler`] changes.

use std::fs::File;
use std::thread;
use std::time::Instant;

use crossbeam_channel::bounded;
use licita_core::{DecodeSummary, DecodedUnit, ScanConfig, SnapshotFile};
use tracing::{debug, info, warn};

use crate::{CancelToken, IngestError};

/// What a handler wants done with a file before it is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Decode,
    Skip,
    /// Cancel the whole scan; this file and every later one are left undecoded.
    Stop,
}

/// Per-unit consumer driven by the pool. Called concurrently from every worker.
pub trait UnitHandler: Sync {
    type Unit: DecodedUnit;

    fn admit(&self, _file: &SnapshotFile) -> Admission {
        Admission::Decode
    }

    fn handle(&self, file: &SnapshotFile, unit: Self::Unit);
}

/// Counters for one pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Files taken off the queue.
    pub files_seen: usize,
    pub files_decoded: usize,
    pub files_failed: usize,
    pub units: usize,
    /// Units skipped because their own structure was unusable.
    pub dropped: usize,
    pub stopped_early: bool,
}

impl ScanStats {
    fn absorb(&mut self, other: ScanStats) {
        self.files_seen += other.files_seen;
        self.files_decoded += other.files_decoded;
        self.files_failed += other.files_failed;
        self.units += other.units;
        self.dropped += other.dropped;
        self.stopped_early |= other.stopped_early;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    workers: usize,
    queue_capacity: usize,
}

impl WorkerPool {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers: workers.max(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.workers(), config.queue_capacity())
    }

    /// Decode `files` in order of dispatch and block until every worker is done.
    ///
    /// The handler's state is complete once this returns.
    pub fn run<H: UnitHandler>(
        &self,
        files: Vec<SnapshotFile>,
        handler: &H,
        cancel: &CancelToken,
    ) -> ScanStats {
        let started = Instant::now();
        let total_files = files.len();
        let (tx, rx) = bounded::<SnapshotFile>(self.queue_capacity);

        let mut stats = thread::scope(|scope| {
            let handles: Vec<_> = (0..self.workers)
                .map(|worker| {
                    let rx = rx.clone();
                    scope.spawn(move || {
                        let mut stats = ScanStats::default();
                        while !cancel.is_cancelled() {
                            // A file already dequeued is still offered to the handler.
                            let Ok(file) = rx.recv() else { break };
                            stats.files_seen += 1;
                            match handler.admit(&file) {
                                Admission::Decode => {}
                                Admission::Skip => continue,
                                Admission::Stop => {
                                    info!(worker, file = %file.file_name(), "stop condition reached, cancelling scan");
                                    stats.stopped_early = true;
                                    cancel.cancel();
                                    break;
                                }
                            }
                            match decode_file(&file, handler) {
                                Ok(summary) => {
                                    stats.files_decoded += 1;
                                    stats.units += summary.units;
                                    stats.dropped += summary.dropped;
                                }
                                Err(e) => {
                                    warn!(worker, error = %e, source = ?std::error::Error::source(&e), "file abandoned");
                                    stats.files_failed += 1;
                                }
                            }
                        }
                        stats
                    })
                })
                .collect();
            drop(rx);

            // Feeder: once every worker has exited, send fails and feeding ends.
            for file in files {
                if cancel.is_cancelled() || tx.send(file).is_err() {
                    break;
                }
            }
            drop(tx);

            let mut stats = ScanStats::default();
            for handle in handles {
                match handle.join() {
                    Ok(worker_stats) => stats.absorb(worker_stats),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            stats
        });
        stats.stopped_early |= cancel.is_cancelled();

        info!(
            kind = H::Unit::KIND,
            files = total_files,
            seen = stats.files_seen,
            decoded = stats.files_decoded,
            failed = stats.files_failed,
            units = stats.units,
            stopped_early = stats.stopped_early,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scan finished"
        );
        stats
    }
}

fn decode_file<H: UnitHandler>(
    file: &SnapshotFile,
    handler: &H,
) -> Result<DecodeSummary, IngestError> {
    let started = Instant::now();
    let source = File::open(&file.path).map_err(|source| IngestError::FileUnreadable {
        path: file.path.clone(),
        source,
    })?;
    let summary = H::Unit::decode_all(source, &mut |unit| handler.handle(file, unit)).map_err(
        |source| IngestError::MalformedXmlStream {
            path: file.path.clone(),
            source,
        },
    )?;
    debug!(
        file = %file.file_name(),
        units = summary.units,
        dropped = summary.dropped,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "file decoded"
    );
    Ok(summary)
}
