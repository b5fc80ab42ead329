//! In-memory stores.
//!
//! These are the reference implementations of `SummaryStore` and `RawLog`.
//! Both are cheap handles over shared state: clone one, hand the clone to a
//! session, and read results back through the original.
//!
//! ## Limitations
//!
//! - **No persistence**: everything is lost when the last handle drops.
//! - **No failure modes**: writes always succeed, so the retry path of
//!   `Persistence` is never exercised through these stores.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::ParticipantId;
use crate::summary::SummaryRow;
use crate::{Error, Result};
use super::{RawLog, RawRecord, SummaryStore};

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory summary rows keyed by participant.
#[derive(Clone, Default)]
pub struct MemoryStore {
    rows: Arc<RwLock<HashMap<ParticipantId, SummaryRow>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, participant: ParticipantId) -> Option<SummaryRow> {
        self.rows.read().get(&participant).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl SummaryStore for MemoryStore {
    fn participant_ids(&self) -> Result<HashSet<ParticipantId>> {
        Ok(self.rows.read().keys().copied().collect())
    }

    fn upsert(&mut self, row: &SummaryRow) -> Result<()> {
        self.rows.write().insert(row.participant, row.clone());
        Ok(())
    }
}

// ============================================================================
// MemoryRawLog
// ============================================================================

/// In-memory selection log.
#[derive(Clone, Default)]
pub struct MemoryRawLog {
    records: Arc<RwLock<Vec<RawRecord>>>,
}

impl MemoryRawLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every logged record, in append order.
    pub fn records(&self) -> Vec<RawRecord> {
        self.records.read().clone()
    }
}

impl RawLog for MemoryRawLog {
    fn append(&mut self, record: &RawRecord) -> Result<()> {
        self.records.write().push(record.clone());
        Ok(())
    }

    fn backfill(&mut self, record: &RawRecord) -> Result<()> {
        let mut records = self.records.write();
        let slot = records
            .iter_mut()
            .rev()
            .find(|r| r.participant == record.participant && r.event.seq == record.event.seq)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "selection #{} for {}",
                    record.event.seq, record.participant
                ))
            })?;
        *slot = record.clone();
        Ok(())
    }
}
