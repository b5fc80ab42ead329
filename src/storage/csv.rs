//! Comma-separated file stores.
//!
//! ```text
//! SelectIntTask_SummaryData.csv   header + one row per participant, rewritten whole
//! SelectIntTask_RawData.csv       header + one row per selection, appended
//! ```
//!
//! Whole-file rewrites go through `table::write_atomic`, so a crash mid-write
//! leaves the previous version in place.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::model::ParticipantId;
use crate::summary::SummaryRow;
use crate::{Error, Result};
use super::table::{self, Row};
use super::{RawLog, RawRecord, SummaryStore};

/// Read a table, treating a missing file as empty.
fn read_or_empty(path: &Path) -> Result<Vec<Row>> {
    match table::read(path) {
        Ok(rows) => Ok(rows),
        Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

// ============================================================================
// CsvSummaryStore
// ============================================================================

/// Summary rows in a single comma-separated file.
#[derive(Debug, Clone)]
pub struct CsvSummaryStore {
    path: PathBuf,
}

impl CsvSummaryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Subject column of a summary or raw row.
fn subject_of(cells: &[String]) -> Option<ParticipantId> {
    let cell = cells.get(2)?.trim();
    if cell.is_empty() || !cell.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    cell.parse().ok().map(ParticipantId)
}

/// Participants other than `current` whose stored rows do not have one
/// cell per column of `header`.
fn misaligned(header: &[String], body: &[Row], current: ParticipantId) -> Vec<ParticipantId> {
    body.iter()
        .filter(|r| r.len() != header.len())
        .filter_map(|r| subject_of(r))
        .filter(|&id| id != current)
        .collect()
}

impl SummaryStore for CsvSummaryStore {
    fn participant_ids(&self) -> Result<HashSet<ParticipantId>> {
        let rows = read_or_empty(&self.path)?;
        Ok(rows.iter().skip(1).filter_map(|r| subject_of(r)).collect())
    }

    fn upsert(&mut self, row: &SummaryRow) -> Result<()> {
        let mut rows = read_or_empty(&self.path)?;
        let header = row.header();
        if let Some(existing) = rows.first() {
            if *existing != header {
                let stale = misaligned(&header, &rows[1..], row.participant);
                warn!(
                    path = %self.path.display(),
                    existing = existing.len(),
                    current = header.len(),
                    ?stale,
                    "summary header differs from this session's layout, rewriting it; \
                     rows of the listed participants no longer match it"
                );
            }
        }

        let mut body: Vec<Row> = if rows.is_empty() { Vec::new() } else { rows.split_off(1) };
        let cells = row.to_cells();
        let mut placed = false;
        body.retain_mut(|r| {
            if subject_of(r) != Some(row.participant) {
                return true;
            }
            if placed {
                return false;
            }
            *r = cells.clone();
            placed = true;
            true
        });
        if !placed {
            body.push(cells);
        }

        let mut out = table::format_row(&header);
        out.push_str(&table::format(&body));
        table::write_atomic(&self.path, &out)?;
        debug!(
            path = %self.path.display(),
            participant = %row.participant,
            rows = body.len(),
            "summary rewritten"
        );
        Ok(())
    }
}

// ============================================================================
// CsvRawLog
// ============================================================================

/// Selection log in a single comma-separated file.
#[derive(Debug, Clone)]
pub struct CsvRawLog {
    path: PathBuf,
}

impl CsvRawLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RawLog for CsvRawLog {
    fn append(&mut self, record: &RawRecord) -> Result<()> {
        let is_new = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut out = String::new();
        if is_new {
            out.push_str(&table::format_row(&RawRecord::HEADER));
        }
        out.push_str(&table::format_row(&record.to_cells()));
        file.write_all(out.as_bytes())?;
        Ok(())
    }

    fn backfill(&mut self, record: &RawRecord) -> Result<()> {
        let mut rows = read_or_empty(&self.path)?;
        let slot = rows
            .iter_mut()
            .skip(1)
            .rev()
            .find(|r| record.matches_cells(r));
        match slot {
            Some(r) => *r = record.to_cells(),
            None => {
                // The pending row is gone (file moved or truncated mid-session);
                // keep the completed selection rather than losing it.
                warn!(
                    path = %self.path.display(),
                    seq = record.event.seq,
                    "pending raw row missing, appending completed row"
                );
                return self.append(record);
            }
        }
        table::write_atomic(&self.path, &table::format(&rows))
    }
}
