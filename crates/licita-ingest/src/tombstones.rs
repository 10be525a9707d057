//! Withdrawn entries (`deleted-entry`) tallied by reason.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::sync::{Mutex, PoisonError};

use licita_core::{SnapshotFile, Tombstone};

use crate::pool::UnitHandler;

#[derive(Debug, Default)]
struct TallyState {
    seen: HashSet<String>,
    by_reason: BTreeMap<String, u64>,
}

/// Pool consumer counting distinct withdrawn references per comment type.
#[derive(Debug, Default)]
pub struct TombstoneTally {
    state: Mutex<TallyState>,
}

impl TombstoneTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, tombstone: &Tombstone) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.seen.insert(tombstone.reference.clone()) {
            *state
                .by_reason
                .entry(tombstone.comment_type.clone())
                .or_default() += 1;
        }
    }

    /// Distinct references and counts per reason.
    pub fn finish(self) -> (usize, BTreeMap<String, u64>) {
        let state = self
            .state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        (state.seen.len(), state.by_reason)
    }
}

impl UnitHandler for TombstoneTally {
    type Unit = Tombstone;

    fn handle(&self, _file: &SnapshotFile, tombstone: Tombstone) {
        self.observe(&tombstone);
    }
}

pub fn write_tally(by_reason: &BTreeMap<String, u64>, w: &mut dyn Write) -> std::io::Result<()> {
    for (reason, n) in by_reason {
        let reason = if reason.is_empty() { "(none)" } else { reason.as_str() };
        writeln!(w, "{reason}: {n}")?;
    }
    Ok(())
}
