//! Stimulus: one (category, label, content) triple from the stimulus file.

use serde::{Deserialize, Serialize};

/// Content category identifier (1-based, as written in the stimulus file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CategoryId(pub u32);

impl std::fmt::Display for CategoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A selectable label and the content it reveals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stimulus {
    pub category: CategoryId,
    /// Short on-screen token the participant clicks.
    pub label: String,
    /// Text revealed once the label is selected.
    pub content: String,
}

impl Stimulus {
    pub fn new(category: u32, label: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            category: CategoryId(category),
            label: label.into(),
            content: content.into(),
        }
    }
}
