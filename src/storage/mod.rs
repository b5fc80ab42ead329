//! # Storage Contracts
//!
//! Two stores sit behind the session:
//!
//! | Store | Shape | Write pattern |
//! |-------|-------|---------------|
//! | `SummaryStore` | one row per participant | whole row rewritten on every selection |
//! | `RawLog` | one row per selection | appended, then backfilled once with the reveal latency |
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryStore` / `MemoryRawLog` | `memory` | In-memory, for testing/embedding |
//! | `CsvSummaryStore` / `CsvRawLog` | `csv` | Comma-separated files on disk |
//!
//! `Persistence` wraps a pair of stores and turns write failures into
//! queued retries so a flaky disk never halts a session.

pub mod memory;
pub mod csv;
pub mod table;

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{ParticipantId, SelectionEvent, SessionStamp};
use crate::summary::SummaryRow;
use crate::{Error, Result};

pub use memory::{MemoryRawLog, MemoryStore};
pub use self::csv::{CsvRawLog, CsvSummaryStore};

// ============================================================================
// RawRecord
// ============================================================================

/// One raw-log row: who, when, and what was selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub stamp: SessionStamp,
    pub participant: ParticipantId,
    pub event: SelectionEvent,
}

impl RawRecord {
    pub const HEADER: [&'static str; 9] = [
        "startDate",
        "startTime",
        "subject",
        "gridNum",
        "categoryNum",
        "labelStim",
        "labelLatency",
        "contentStim",
        "contentLatency",
    ];

    /// Written in place of the reveal latency until it is known.
    pub const PENDING: &'static str = "NA";

    pub fn to_cells(&self) -> Vec<String> {
        vec![
            self.stamp.date_string(),
            self.stamp.time_string(),
            self.participant.to_string(),
            self.event.grid.to_string(),
            self.event.category.to_string(),
            self.event.label.clone(),
            self.event.selection_latency_ms.to_string(),
            self.event.content.clone(),
            self.event
                .reveal_latency_ms
                .map_or_else(|| Self::PENDING.to_string(), |ms| ms.to_string()),
        ]
    }

    /// Whether a stored row describes the same selection as this record:
    /// same participant, grid and label.
    pub fn matches_cells(&self, cells: &[String]) -> bool {
        cells.len() >= 6
            && cells[2] == self.participant.to_string()
            && cells[3] == self.event.grid.to_string()
            && cells[5] == self.event.label
    }
}

// ============================================================================
// Store traits
// ============================================================================

/// Per-participant summary rows.
pub trait SummaryStore {
    /// Every participant identifier already present.
    fn participant_ids(&self) -> Result<HashSet<ParticipantId>>;

    /// Insert the row, or replace the stored row with the same participant.
    fn upsert(&mut self, row: &SummaryRow) -> Result<()>;
}

/// Append-only selection log with a single in-place backfill per row.
pub trait RawLog {
    fn append(&mut self, record: &RawRecord) -> Result<()>;

    /// Replace the most recent row for the same selection with `record`.
    fn backfill(&mut self, record: &RawRecord) -> Result<()>;
}

// ============================================================================
// Persistence
// ============================================================================

#[derive(Debug, Clone)]
enum RawWrite {
    Append(RawRecord),
    Backfill(RawRecord),
}

/// A summary store and a raw log, with write failures queued for retry.
///
/// Failed summary writes keep only the newest row, since each row
/// supersedes the last. Failed raw writes are replayed in order before any
/// newer raw write is attempted.
pub struct Persistence<S: SummaryStore, L: RawLog> {
    summary: S,
    raw: L,
    pending_summary: Option<SummaryRow>,
    pending_raw: VecDeque<RawWrite>,
}

impl<S: SummaryStore, L: RawLog> Persistence<S, L> {
    pub fn new(summary: S, raw: L) -> Self {
        Self {
            summary,
            raw,
            pending_summary: None,
            pending_raw: VecDeque::new(),
        }
    }

    pub fn summary_store(&self) -> &S {
        &self.summary
    }

    pub fn raw_log(&self) -> &L {
        &self.raw
    }

    /// Number of writes waiting for a retry.
    pub fn pending(&self) -> usize {
        self.pending_raw.len() + usize::from(self.pending_summary.is_some())
    }

    /// Identifiers already in the summary store. An unreadable store counts
    /// as empty.
    pub fn existing_participants(&self) -> HashSet<ParticipantId> {
        self.summary.participant_ids().unwrap_or_else(|e| {
            debug!(error = %e, "summary store unreadable, assuming no participants");
            HashSet::new()
        })
    }

    /// Log a new selection and persist the row it produced.
    pub fn record_selection(&mut self, record: RawRecord, row: &SummaryRow) {
        self.push_raw(RawWrite::Append(record));
        self.pending_summary = Some(row.clone());
        self.drain();
    }

    /// Backfill the reveal latency of an already logged selection.
    pub fn record_reveal(&mut self, record: RawRecord) {
        // An append still waiting in the queue can simply carry the
        // completed record.
        let queued = self.pending_raw.iter_mut().rev().find_map(|w| match w {
            RawWrite::Append(r) if r.event.seq == record.event.seq => Some(r),
            _ => None,
        });
        match queued {
            Some(r) => *r = record,
            None => self.push_raw(RawWrite::Backfill(record)),
        }
        self.drain();
    }

    /// Retry everything pending. Returns true when nothing is left.
    pub fn flush(&mut self) -> bool {
        self.drain();
        self.pending() == 0
    }

    fn push_raw(&mut self, write: RawWrite) {
        self.pending_raw.push_back(write);
    }

    fn drain(&mut self) {
        while let Some(write) = self.pending_raw.front() {
            let result = match write {
                RawWrite::Append(r) => self.raw.append(r),
                RawWrite::Backfill(r) => self.raw.backfill(r),
            };
            match result {
                Ok(()) => {
                    self.pending_raw.pop_front();
                }
                Err(Error::NotFound(what)) => {
                    warn!(%what, "raw log row to backfill is gone, dropping the update");
                    self.pending_raw.pop_front();
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        queued = self.pending_raw.len(),
                        "raw log write failed, will retry"
                    );
                    break;
                }
            }
        }

        if let Some(row) = &self.pending_summary {
            match self.summary.upsert(row) {
                Ok(()) => self.pending_summary = None,
                Err(e) => warn!(
                    error = %e,
                    participant = %row.participant,
                    "summary write failed, will retry"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CategoryId;
    use chrono::{NaiveDate, NaiveTime};
    use std::cell::Cell;
    use std::rc::Rc;

    fn stamp() -> SessionStamp {
        SessionStamp {
            date: NaiveDate::from_ymd_opt(2025, 1, 4).unwrap(),
            time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        }
    }

    fn record(seq: u64, reveal: Option<u64>) -> RawRecord {
        RawRecord {
            stamp: stamp(),
            participant: ParticipantId(200_000),
            event: SelectionEvent {
                seq,
                grid: 1,
                category: CategoryId(1),
                label: format!("L{seq}"),
                content: "content, with comma".into(),
                selection_latency_ms: 420,
                reveal_latency_ms: reveal,
            },
        }
    }

    fn row() -> SummaryRow {
        let categories = [CategoryId(1), CategoryId(2)];
        SummaryRow::new(ParticipantId(200_000), stamp(), 1, &categories, CategoryId(1)).unwrap()
    }

    /// Raw log that fails while `down` is set.
    struct FlakyLog {
        down: Rc<Cell<bool>>,
        inner: MemoryRawLog,
    }

    impl RawLog for FlakyLog {
        fn append(&mut self, record: &RawRecord) -> Result<()> {
            if self.down.get() {
                return Err(Error::Io(std::io::Error::other("disk unavailable")));
            }
            self.inner.append(record)
        }

        fn backfill(&mut self, record: &RawRecord) -> Result<()> {
            if self.down.get() {
                return Err(Error::Io(std::io::Error::other("disk unavailable")));
            }
            self.inner.backfill(record)
        }
    }

    #[test]
    fn test_raw_cells() {
        let cells = record(1, None).to_cells();
        assert_eq!(cells.len(), RawRecord::HEADER.len());
        assert_eq!(cells[2], "200000");
        assert_eq!(cells[6], "420");
        assert_eq!(cells[8], "NA");
        assert_eq!(record(1, Some(900)).to_cells()[8], "900");
        assert!(record(1, Some(900)).matches_cells(&cells));
    }

    #[test]
    fn test_failed_writes_are_retried_in_order() {
        let down = Rc::new(Cell::new(true));
        let log = MemoryRawLog::new();
        let mut p = Persistence::new(
            MemoryStore::new(),
            FlakyLog { down: down.clone(), inner: log.clone() },
        );

        p.record_selection(record(1, None), &row());
        p.record_reveal(record(1, Some(700)));
        p.record_selection(record(2, None), &row());
        assert_eq!(p.pending(), 2);
        assert!(log.records().is_empty());

        down.set(false);
        assert!(p.flush());
        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event.reveal_latency_ms, Some(700));
        assert_eq!(records[1].event.seq, 2);
        assert!(records[1].event.is_pending());
    }

    #[test]
    fn test_summary_written_alongside_raw() {
        let store = MemoryStore::new();
        let mut p = Persistence::new(store.clone(), MemoryRawLog::new());
        p.record_selection(record(1, None), &row());
        assert_eq!(p.pending(), 0);
        assert!(store.get(ParticipantId(200_000)).is_some());
    }
}
