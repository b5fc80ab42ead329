//! Screen layout of a grid: fixed row and column centres.

use serde::{Deserialize, Serialize};

/// Where one cell sits, as fractions of the screen size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub column: usize,
    pub x: f32,
    pub y: f32,
}

/// Row and column centres of the label grid, as fractions of the screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridLayout {
    pub columns: Vec<f32>,
    pub rows: Vec<f32>,
}

impl Default for GridLayout {
    /// 4 × 4, centred in the lower 85% of the screen.
    fn default() -> Self {
        Self {
            columns: vec![0.2, 0.4, 0.6, 0.8],
            rows: vec![0.25, 0.45, 0.65, 0.85],
        }
    }
}

impl GridLayout {
    pub fn cell_count(&self) -> usize {
        self.columns.len() * self.rows.len()
    }

    /// Position of the `index`-th cell, row-major.
    pub fn position(&self, index: usize) -> Option<Position> {
        let width = self.columns.len();
        if width == 0 || index >= self.cell_count() {
            return None;
        }
        let (row, column) = (index / width, index % width);
        Some(Position {
            row,
            column,
            x: self.columns[column],
            y: self.rows[row],
        })
    }

    /// Divider lines between cells: midpoints between adjacent centres.
    pub fn dividers(&self) -> (Vec<f32>, Vec<f32>) {
        let mid = |v: &[f32]| v.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect::<Vec<_>>();
        (mid(&self.columns), mid(&self.rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_positions() {
        let layout = GridLayout::default();
        assert_eq!(layout.cell_count(), 16);
        let first = layout.position(0).unwrap();
        assert_eq!((first.row, first.column, first.x, first.y), (0, 0, 0.2, 0.25));
        let fifth = layout.position(4).unwrap();
        assert_eq!((fifth.row, fifth.column), (1, 0));
        let last = layout.position(15).unwrap();
        assert_eq!((last.row, last.column, last.x, last.y), (3, 3, 0.8, 0.85));
        assert!(layout.position(16).is_none());
    }

    #[test]
    fn test_dividers() {
        let (v, h) = GridLayout::default().dividers();
        assert_eq!(v.len(), 3);
        assert_eq!(h.len(), 3);
        assert!((v[0] - 0.3).abs() < 1e-6);
        assert!((h[2] - 0.75).abs() < 1e-6);
    }
}
