//! SelectionEvent: one label click and its content dismissal.

use serde::{Deserialize, Serialize};

use super::CategoryId;

/// A recorded selection.
///
/// Created when a participant clicks an unselected label. The reveal
/// latency is unknown until the content screen is dismissed; it is filled
/// exactly once via [`SelectionEvent::with_reveal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionEvent {
    /// Monotonic per-session sequence number, starting at 1.
    pub seq: u64,
    /// 1-based grid number.
    pub grid: usize,
    pub category: CategoryId,
    pub label: String,
    pub content: String,
    /// Milliseconds from first display of the grid to the click.
    pub selection_latency_ms: u64,
    /// Milliseconds from content display to dismissal. `None` while pending.
    pub reveal_latency_ms: Option<u64>,
}

impl SelectionEvent {
    pub fn is_pending(&self) -> bool {
        self.reveal_latency_ms.is_none()
    }

    /// Backfill the reveal latency. A second backfill keeps the first value.
    pub fn with_reveal(mut self, latency_ms: u64) -> Self {
        if self.reveal_latency_ms.is_none() {
            self.reveal_latency_ms = Some(latency_ms);
        }
        self
    }
}
