//! # Grid Sampling
//!
//! Slices the presentation sequence into on-screen grids. The sampler owns
//! no cursor: callers pass the cursor in and get the advanced one back.

pub mod layout;

pub use layout::{GridLayout, Position};

use serde::{Deserialize, Serialize};

use crate::model::Stimulus;
use crate::pool::PresentationSequence;
use crate::{Error, Result};

// ============================================================================
// GridSubset
// ============================================================================

/// One placed label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub stimulus: Stimulus,
    pub position: Position,
    pub selected: bool,
}

/// The labels of one grid, in sequence order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSubset {
    /// 1-based grid number.
    pub index: usize,
    cells: Vec<GridCell>,
}

impl GridSubset {
    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Labels not selected yet.
    pub fn remaining(&self) -> usize {
        self.cells.iter().filter(|c| !c.selected).count()
    }

    /// True once every label has been selected.
    pub fn is_complete(&self) -> bool {
        self.cells.iter().all(|c| c.selected)
    }

    pub fn unselected(&self) -> impl Iterator<Item = &GridCell> {
        self.cells.iter().filter(|c| !c.selected)
    }

    /// Mark the first unselected cell carrying `label` as selected and
    /// return its stimulus. `None` if no such cell is left.
    pub fn take(&mut self, label: &str) -> Option<&Stimulus> {
        let cell = self
            .cells
            .iter_mut()
            .find(|c| !c.selected && c.stimulus.label == label)?;
        cell.selected = true;
        Some(&cell.stimulus)
    }
}

// ============================================================================
// GridSampler
// ============================================================================

/// Result of asking for the next grid.
#[derive(Debug, Clone, PartialEq)]
pub enum Draw {
    Grid { subset: GridSubset, cursor: usize },
    Exhausted,
}

/// Cuts fixed-size grids from a sequence and places them on a layout.
#[derive(Debug, Clone)]
pub struct GridSampler {
    grid_size: usize,
    layout: GridLayout,
}

impl GridSampler {
    pub fn new(grid_size: usize, layout: GridLayout) -> Result<Self> {
        if grid_size == 0 {
            return Err(Error::InvalidConfig("grid size must be at least 1".into()));
        }
        if layout.cell_count() < grid_size {
            return Err(Error::InvalidConfig(format!(
                "layout has {} cells but the grid holds {grid_size} labels",
                layout.cell_count()
            )));
        }
        Ok(Self { grid_size, layout })
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Draw the grid starting at `cursor`.
    ///
    /// The last grid may be short; it is never padded. The returned cursor
    /// has advanced by the number of labels actually taken.
    pub fn next(&self, sequence: &PresentationSequence, cursor: usize) -> Draw {
        let items = sequence.items();
        if cursor >= items.len() {
            return Draw::Exhausted;
        }
        let end = (cursor + self.grid_size).min(items.len());
        let cells = items[cursor..end]
            .iter()
            .enumerate()
            .filter_map(|(i, stimulus)| {
                // new() guarantees enough layout cells for a full grid
                let position = self.layout.position(i)?;
                Some(GridCell { stimulus: stimulus.clone(), position, selected: false })
            })
            .collect();
        Draw::Grid {
            subset: GridSubset { index: cursor / self.grid_size + 1, cells },
            cursor: end,
        }
    }
}
