//! On-screen prompt text, loaded from a two-column `Key,Text` table.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use tracing::info;

use crate::storage::table::{self, Row};
use crate::{Error, Result};

/// Every prompt the task shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKey {
    InstructionsTitle,
    InstructionsBody,
    GridPrompt,
    GridAlert,
    ContinueButton,
    EndAlert,
    StartButton,
    ExitButton,
}

impl PromptKey {
    pub const ALL: [PromptKey; 8] = [
        PromptKey::InstructionsTitle,
        PromptKey::InstructionsBody,
        PromptKey::GridPrompt,
        PromptKey::GridAlert,
        PromptKey::ContinueButton,
        PromptKey::EndAlert,
        PromptKey::StartButton,
        PromptKey::ExitButton,
    ];

    /// Key as written in the prompt file.
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKey::InstructionsTitle => "Instructions_Title",
            PromptKey::InstructionsBody => "Instructions_Body",
            PromptKey::GridPrompt => "Grid_Prompt",
            PromptKey::GridAlert => "Grid_Alert",
            PromptKey::ContinueButton => "Continue_Button",
            PromptKey::EndAlert => "End_Alert",
            PromptKey::StartButton => "Start_Button",
            PromptKey::ExitButton => "Exit_Button",
        }
    }

    /// Fallback text for keys the prompt file may leave out.
    pub fn default_text(&self) -> Option<&'static str> {
        match self {
            PromptKey::StartButton => Some("Start Task"),
            PromptKey::ExitButton => Some("Exit Task"),
            _ => None,
        }
    }

    pub fn is_required(&self) -> bool {
        self.default_text().is_none()
    }
}

impl fmt::Display for PromptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loaded prompt text.
#[derive(Debug, Clone, Default)]
pub struct PromptText {
    entries: HashMap<String, String>,
}

impl PromptText {
    pub fn from_pairs<K: Into<String>, V: Into<String>>(
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self {
            entries: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Parse a `Key,Text` table. Columns are found by header name, falling
    /// back to the first two columns.
    pub fn from_rows(rows: &[Row]) -> Self {
        let Some((header, body)) = rows.split_first() else {
            return Self::default();
        };
        let col = |name: &str, fallback: usize| {
            header
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
                .unwrap_or(fallback)
        };
        let (key, text) = (col("key", 0), col("text", 1));
        Self::from_pairs(body.iter().filter_map(|r| {
            let k = r.get(key)?.trim();
            (!k.is_empty()).then(|| (k.to_string(), r.get(text).cloned().unwrap_or_default()))
        }))
    }

    /// Load and validate the prompt file.
    pub fn load(path: &Path) -> Result<Self> {
        let rows = table::read(path).map_err(|e| match e {
            Error::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                Error::ConfigurationMissing {
                    resource: "task prompts".into(),
                    path: path.to_path_buf(),
                }
            }
            other => other,
        })?;
        let prompts = Self::from_rows(&rows);
        prompts.validate()?;
        info!(path = %path.display(), prompts = prompts.entries.len(), "prompts loaded");
        Ok(prompts)
    }

    /// Fail on the first required key that is missing.
    pub fn validate(&self) -> Result<()> {
        match PromptKey::ALL
            .iter()
            .find(|k| k.is_required() && !self.entries.contains_key(k.as_str()))
        {
            Some(k) => Err(Error::MissingPrompt(k.as_str().to_string())),
            None => Ok(()),
        }
    }

    /// Text for `key`, or its default. A required key with no text is a
    /// configuration error, never a blank.
    pub fn get(&self, key: PromptKey) -> Result<&str> {
        self.entries
            .get(key.as_str())
            .map(String::as_str)
            .or_else(|| key.default_text())
            .ok_or_else(|| Error::MissingPrompt(key.as_str().to_string()))
    }
}
