//! # Summary Aggregation
//!
//! Per-participant selection counts for every (grid, category) pair, the
//! running category totals, and the bias indices derived from them.
//!
//! The table is fixed-size: it is allocated for every grid the session can
//! present and every category in the stimulus pool before the first
//! selection, so a session that stops early still produces a complete row.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{CategoryId, ParticipantId, SelectionEvent, SessionStamp};
use crate::{Error, Result};

// ============================================================================
// BiasIndex
// ============================================================================

/// Proportion of selections that fell on the target category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BiasIndex {
    /// No selections yet, so the ratio has no denominator.
    Undefined,
    Ratio(f64),
}

impl BiasIndex {
    /// Written in place of a ratio when it is undefined.
    pub const SENTINEL: &'static str = "NA";

    pub fn from_counts(target: u32, total: u32) -> Self {
        if total == 0 {
            BiasIndex::Undefined
        } else {
            BiasIndex::Ratio(target as f64 / total as f64)
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            BiasIndex::Undefined => None,
            BiasIndex::Ratio(r) => Some(*r),
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, BiasIndex::Ratio(_))
    }
}

impl fmt::Display for BiasIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BiasIndex::Undefined => f.write_str(Self::SENTINEL),
            BiasIndex::Ratio(r) => write!(f, "{r:.4}"),
        }
    }
}

// ============================================================================
// SummaryRow
// ============================================================================

/// One participant's summary: a `grids × categories` count table plus
/// cumulative category totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub participant: ParticipantId,
    pub stamp: SessionStamp,
    categories: Vec<CategoryId>,
    target: CategoryId,
    grids: usize,
    /// Row-major by grid: `counts[(grid - 1) * categories.len() + k]`.
    counts: Vec<u32>,
    totals: Vec<u32>,
    /// Sequence number of the last applied event.
    last_seq: u64,
}

impl SummaryRow {
    /// A zeroed row covering grids `1..=grids` and the given categories.
    pub fn new(
        participant: ParticipantId,
        stamp: SessionStamp,
        grids: usize,
        categories: &[CategoryId],
        target: CategoryId,
    ) -> Result<Self> {
        let mut categories = categories.to_vec();
        categories.sort();
        categories.dedup();
        if !categories.contains(&target) {
            return Err(Error::InvalidConfig(format!(
                "target category {target} is not one of the stimulus categories"
            )));
        }
        let k = categories.len();
        Ok(Self {
            participant,
            stamp,
            categories,
            target,
            grids,
            counts: vec![0; grids * k],
            totals: vec![0; k],
            last_seq: 0,
        })
    }

    pub fn grid_count(&self) -> usize {
        self.grids
    }

    pub fn categories(&self) -> &[CategoryId] {
        &self.categories
    }

    pub fn target(&self) -> CategoryId {
        self.target
    }

    fn category_slot(&self, category: CategoryId) -> Option<usize> {
        self.categories.binary_search(&category).ok()
    }

    fn cell(&self, grid: usize, category: CategoryId) -> Option<usize> {
        if grid == 0 || grid > self.grids {
            return None;
        }
        let k = self.category_slot(category)?;
        Some((grid - 1) * self.categories.len() + k)
    }

    /// Selections of `category` in `grid`; `None` outside the table.
    pub fn count(&self, grid: usize, category: CategoryId) -> Option<u32> {
        self.cell(grid, category).map(|i| self.counts[i])
    }

    /// All selections in `grid`.
    pub fn grid_total(&self, grid: usize) -> u32 {
        if grid == 0 || grid > self.grids {
            return 0;
        }
        let k = self.categories.len();
        self.counts[(grid - 1) * k..grid * k].iter().sum()
    }

    /// Cumulative selections of `category` across all grids.
    pub fn category_total(&self, category: CategoryId) -> u32 {
        self.category_slot(category).map_or(0, |k| self.totals[k])
    }

    /// Every selection recorded so far.
    pub fn selections(&self) -> u32 {
        self.totals.iter().sum()
    }

    pub fn grid_bias(&self, grid: usize) -> BiasIndex {
        let target = self.count(grid, self.target).unwrap_or(0);
        BiasIndex::from_counts(target, self.grid_total(grid))
    }

    pub fn cumulative_bias(&self) -> BiasIndex {
        BiasIndex::from_counts(self.category_total(self.target), self.selections())
    }

    /// The row after `event`. The receiver is left untouched.
    ///
    /// Rejects events outside the table and events whose sequence number
    /// was already applied.
    pub fn apply(&self, event: &SelectionEvent) -> Result<SummaryRow> {
        if event.seq <= self.last_seq {
            return Err(Error::InvalidEvent(format!(
                "selection #{} already applied (last #{})",
                event.seq, self.last_seq
            )));
        }
        let cell = self.cell(event.grid, event.category).ok_or_else(|| {
            Error::InvalidEvent(format!(
                "grid {} / category {} is outside the summary table",
                event.grid, event.category
            ))
        })?;
        // `cell` succeeded, so the category has a slot.
        let k = cell % self.categories.len();

        let mut next = self.clone();
        next.counts[cell] += 1;
        next.totals[k] += 1;
        next.last_seq = event.seq;
        Ok(next)
    }

    // ========================================================================
    // Tabular form
    // ========================================================================

    /// Column names, in the order [`SummaryRow::to_cells`] writes them.
    pub fn header(&self) -> Vec<String> {
        let mut head: Vec<String> =
            ["startDate", "startTime", "subject"].into_iter().map(String::from).collect();
        for g in 1..=self.grids {
            for c in &self.categories {
                head.push(format!("Grid{g}_Category{c}_Subtotal"));
            }
        }
        for g in 1..=self.grids {
            head.push(format!("Grid{g}_BiasIndex"));
        }
        for c in &self.categories {
            head.push(format!("Category{c}_Total"));
        }
        head.push("BiasIndex_Total".to_string());
        head
    }

    pub fn to_cells(&self) -> Vec<String> {
        let mut cells = vec![
            self.stamp.date_string(),
            self.stamp.time_string(),
            self.participant.to_string(),
        ];
        cells.extend(self.counts.iter().map(u32::to_string));
        cells.extend((1..=self.grids).map(|g| self.grid_bias(g).to_string()));
        cells.extend(self.totals.iter().map(u32::to_string));
        cells.push(self.cumulative_bias().to_string());
        cells
    }
}

// ============================================================================
// SummaryAggregator
// ============================================================================

/// Owns the current row and advances it one event at a time.
#[derive(Debug, Clone)]
pub struct SummaryAggregator {
    row: SummaryRow,
}

impl SummaryAggregator {
    pub fn new(row: SummaryRow) -> Self {
        Self { row }
    }

    pub fn row(&self) -> &SummaryRow {
        &self.row
    }

    /// Fold one selection into the row.
    pub fn apply(&mut self, event: &SelectionEvent) -> Result<&SummaryRow> {
        self.row = self.row.apply(event)?;
        Ok(&self.row)
    }
}
