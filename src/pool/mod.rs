//! # Stimulus Pool
//!
//! Turns the rows of the stimulus file into one balanced, shuffled
//! presentation sequence.
//!
//! ```text
//! rows ──group by category──▶ {1: [..], 2: [..]} ──shuffle each──▶
//!   lockstep batches of `quota` per category ──shuffle batch──▶ sequence
//! ```
//!
//! `quota = grid_size / category_count`. Only whole batches are emitted:
//! every category contributes exactly `quota` items to every batch, and the
//! walk stops at the shortest category. Stimuli past
//! `floor(shortest / quota) * quota` in any category are never presented,
//! so stimulus files should be pre-balanced.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::model::{CategoryId, Stimulus};
use crate::storage::table::{self, Row};
use crate::{Error, Result};

// ============================================================================
// PresentationSequence
// ============================================================================

/// The ordered stimuli for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresentationSequence {
    items: Vec<Stimulus>,
}

impl PresentationSequence {
    pub fn new(items: Vec<Stimulus>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Stimulus] {
        &self.items
    }

    /// Number of grids of `grid_size` needed to present every item.
    pub fn grid_count(&self, grid_size: usize) -> usize {
        if grid_size == 0 {
            0
        } else {
            self.items.len().div_ceil(grid_size)
        }
    }

}

// ============================================================================
// StimulusPool
// ============================================================================

/// Stimuli grouped by category, ready to be sequenced.
#[derive(Debug, Clone, Default)]
pub struct StimulusPool {
    groups: BTreeMap<CategoryId, Vec<Stimulus>>,
}

impl StimulusPool {
    pub fn from_stimuli(stimuli: impl IntoIterator<Item = Stimulus>) -> Self {
        let mut groups: BTreeMap<CategoryId, Vec<Stimulus>> = BTreeMap::new();
        let mut seen = HashSet::new();
        for s in stimuli {
            if !seen.insert(s.label.clone()) {
                warn!(
                    label = %s.label,
                    "duplicate label in stimulus file; selections of it are ambiguous"
                );
            }
            groups.entry(s.category).or_default().push(s);
        }
        Self { groups }
    }

    /// Parse a stimulus table (header row first).
    pub fn from_rows(rows: &[Row]) -> Self {
        let Some((header, body)) = rows.split_first() else {
            return Self::default();
        };
        let columns = StimulusColumns::locate(header);
        let mut stimuli = Vec::with_capacity(body.len());
        for (i, row) in body.iter().enumerate() {
            match columns.parse(row) {
                Some(s) => stimuli.push(s),
                // +2: one for the header, one for 1-based lines
                None => warn!(row = i + 2, "skipping malformed stimulus row"),
            }
        }
        Self::from_stimuli(stimuli)
    }

    /// Load the stimulus file. A missing file is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        let rows = table::read(path).map_err(|e| match e {
            Error::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                Error::ConfigurationMissing {
                    resource: "task stimuli".into(),
                    path: path.to_path_buf(),
                }
            }
            other => other,
        })?;
        let pool = Self::from_rows(&rows);
        info!(
            path = %path.display(),
            categories = pool.category_count(),
            stimuli = pool.len(),
            "stimuli loaded"
        );
        Ok(pool)
    }

    /// Distinct categories, ascending.
    pub fn categories(&self) -> Vec<CategoryId> {
        self.groups.keys().copied().collect()
    }

    pub fn category_count(&self) -> usize {
        self.groups.len()
    }

    /// Stimuli in `category`.
    pub fn category_len(&self, category: CategoryId) -> usize {
        self.groups.get(&category).map_or(0, Vec::len)
    }

    /// All stimuli across categories.
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Labels per grid once the grid is cut to whole batches:
    /// `category_count * (grid_size / category_count)`. Equal to
    /// `grid_size` when it divides evenly, 0 when a batch cannot be formed.
    pub fn balanced_grid_size(grid_size: usize, category_count: usize) -> usize {
        match category_count {
            0 => 0,
            k => grid_size / k * k,
        }
    }

    /// Build a balanced presentation sequence.
    ///
    /// `category_count` is the number of categories the task expects. If the
    /// pool holds a different number, some category has no usable stimuli
    /// (or an unexpected one would unbalance every grid) and the sequence is
    /// empty.
    pub fn build<R: Rng + ?Sized>(
        &self,
        grid_size: usize,
        category_count: usize,
        rng: &mut R,
    ) -> PresentationSequence {
        if category_count == 0 || self.groups.len() != category_count {
            warn!(
                expected = category_count,
                found = self.groups.len(),
                "stimulus categories do not match the configured category count"
            );
            return PresentationSequence::default();
        }

        let quota = grid_size / category_count;
        if quota == 0 {
            warn!(grid_size, category_count, "grid too small for one stimulus per category");
            return PresentationSequence::default();
        }

        let mut shuffled: Vec<Vec<Stimulus>> = Vec::with_capacity(category_count);
        for group in self.groups.values() {
            let mut group = group.clone();
            group.shuffle(rng);
            shuffled.push(group);
        }

        let shortest = shuffled.iter().map(Vec::len).min().unwrap_or(0);
        let usable = shortest / quota * quota;
        let dropped = self.len() - usable * category_count;
        if dropped > 0 {
            warn!(
                dropped,
                per_category = usable,
                "unbalanced stimulus file; surplus stimuli will not be presented"
            );
        }

        let mut items = Vec::with_capacity(usable * category_count);
        for group in &mut shuffled {
            group.truncate(usable);
        }
        for start in (0..usable).step_by(quota) {
            let mut batch: Vec<Stimulus> = shuffled
                .iter()
                .flat_map(|group| group[start..start + quota].iter().cloned())
                .collect();
            batch.shuffle(rng);
            items.append(&mut batch);
        }

        debug!(length = items.len(), quota, "presentation sequence built");
        PresentationSequence::new(items)
    }
}

// ============================================================================
// Column location
// ============================================================================

/// Where category, label and content live in a stimulus row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StimulusColumns {
    category: usize,
    label: usize,
    content: usize,
}

impl StimulusColumns {
    /// Item number, category, label, content.
    const POSITIONAL: StimulusColumns = StimulusColumns { category: 1, label: 2, content: 3 };

    fn locate(header: &[String]) -> Self {
        let find = |names: &[&str]| {
            header
                .iter()
                .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };
        match (
            find(&["category", "categorynum"]),
            find(&["label", "labelstim"]),
            find(&["content", "contentstim"]),
        ) {
            (Some(category), Some(label), Some(content)) => Self { category, label, content },
            _ => Self::POSITIONAL,
        }
    }

    fn parse(&self, row: &[String]) -> Option<Stimulus> {
        let category: u32 = row.get(self.category)?.trim().parse().ok()?;
        if category == 0 {
            return None;
        }
        let label = row.get(self.label)?.trim();
        let content = row.get(self.content)?;
        if label.is_empty() {
            return None;
        }
        Some(Stimulus::new(category, label, content.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Draw, GridLayout, GridSampler};
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn pool(per_category: &[(u32, usize)]) -> StimulusPool {
        StimulusPool::from_stimuli(per_category.iter().flat_map(|&(cat, n)| {
            (0..n).map(move |i| {
                Stimulus::new(cat, format!("c{cat}-{i}"), format!("content {cat}/{i}"))
            })
        }))
    }

    fn counts(items: &[Stimulus]) -> BTreeMap<CategoryId, usize> {
        let mut m = BTreeMap::new();
        for s in items {
            *m.entry(s.category).or_insert(0) += 1;
        }
        m
    }

    #[test]
    fn test_balanced_grids() {
        let mut rng = SmallRng::seed_from_u64(3);
        let seq = pool(&[(1, 24), (2, 24)]).build(16, 2, &mut rng);
        assert_eq!(seq.len(), 48);
        for chunk in seq.items().chunks(16) {
            let c = counts(chunk);
            assert_eq!(c[&CategoryId(1)], 8);
            assert_eq!(c[&CategoryId(2)], 8);
        }
    }

    #[test]
    fn test_truncates_to_shortest_whole_batch() {
        let mut rng = SmallRng::seed_from_u64(5);
        // shortest = 13 → one batch of 8 per category
        let seq = pool(&[(1, 13), (2, 30)]).build(16, 2, &mut rng);
        assert_eq!(seq.len(), 16);
        let c = counts(seq.items());
        assert_eq!(c[&CategoryId(1)], 8);
        assert_eq!(c[&CategoryId(2)], 8);
    }

    #[test]
    fn test_uneven_grid_size() {
        let mut rng = SmallRng::seed_from_u64(9);
        // quota = 16 / 3 = 5, batches of 15
        let seq = pool(&[(1, 10), (2, 10), (3, 12)]).build(16, 3, &mut rng);
        assert_eq!(seq.len(), 30);
        assert_eq!(StimulusPool::balanced_grid_size(16, 3), 15);
        assert_eq!(seq.grid_count(15), 2);
    }

    #[test]
    fn test_sampled_grids_stay_balanced_when_size_is_uneven() {
        let mut rng = SmallRng::seed_from_u64(4);
        let seq = pool(&[(1, 10), (2, 10), (3, 10)]).build(16, 3, &mut rng);
        let grid_size = StimulusPool::balanced_grid_size(16, 3);
        let sampler = GridSampler::new(grid_size, GridLayout::default()).unwrap();

        let mut cursor = 0;
        let mut grids = 0;
        while let Draw::Grid { subset, cursor: next } = sampler.next(&seq, cursor) {
            let items: Vec<Stimulus> = subset.cells().iter().map(|c| c.stimulus.clone()).collect();
            assert_eq!(items.len(), 15);
            let c = counts(&items);
            assert!(c.values().all(|&n| n == 5), "grid {}: {:?}", subset.index, c);
            cursor = next;
            grids += 1;
        }
        assert_eq!(grids, 2);
    }

    #[test]
    fn test_balanced_grid_size() {
        assert_eq!(StimulusPool::balanced_grid_size(16, 2), 16);
        assert_eq!(StimulusPool::balanced_grid_size(16, 5), 15);
        assert_eq!(StimulusPool::balanced_grid_size(2, 3), 0);
        assert_eq!(StimulusPool::balanced_grid_size(16, 0), 0);
    }

    #[test]
    fn test_no_duplicates_and_all_from_pool() {
        let mut rng = SmallRng::seed_from_u64(1);
        let p = pool(&[(1, 16), (2, 16)]);
        let seq = p.build(16, 2, &mut rng);
        let labels: HashSet<_> = seq.items().iter().map(|s| s.label.clone()).collect();
        assert_eq!(labels.len(), seq.len());
    }

    #[test]
    fn test_missing_category_yields_empty_sequence() {
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(pool(&[(1, 16)]).build(16, 2, &mut rng).is_empty());
        assert!(pool(&[]).build(16, 2, &mut rng).is_empty());
    }

    #[test]
    fn test_too_few_for_one_batch() {
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(pool(&[(1, 7), (2, 20)]).build(16, 2, &mut rng).is_empty());
    }

    #[test]
    fn test_shuffle_differs_between_runs() {
        let p = pool(&[(1, 40), (2, 40)]);
        let a = p.build(16, 2, &mut SmallRng::seed_from_u64(1));
        let b = p.build(16, 2, &mut SmallRng::seed_from_u64(2));
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_rows_by_header() {
        let rows = table::parse(
            "Label,Content,Category\n\
             Rain,\"Heavy rain, all day\",2\n\
             Sun,Clear skies,1\n\
             Bad,row,x\n",
        )
        .unwrap();
        let p = StimulusPool::from_rows(&rows);
        assert_eq!(p.len(), 2);
        assert_eq!(p.categories(), vec![CategoryId(1), CategoryId(2)]);
        assert_eq!(p.category_len(CategoryId(2)), 1);
    }

    #[test]
    fn test_from_rows_positional() {
        let rows =
            table::parse("Item,Cat,Lab,Con\n1,1,A,alpha\n2,2,B,beta\n3,0,C,gamma\n").unwrap();
        let p = StimulusPool::from_rows(&rows);
        assert_eq!(p.len(), 2);
        assert_eq!(p.category_count(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let err = StimulusPool::load(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, Error::ConfigurationMissing { .. }));
    }
}
