//! Task configuration.
//!
//! Every field has a default matching the stock task files, so an empty
//! JSON object (or no config file at all) is a valid configuration.
//!
//! Environment:
//! - `SELECTINT_CONFIG`: path of a JSON config file.
//! - `SELECTINT_BASE_PATH`: directory relative file paths resolve against
//!   (default `.`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::grid::GridLayout;
use crate::model::CategoryId;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub stimuli_path: PathBuf,
    pub prompts_path: PathBuf,
    pub raw_log_path: PathBuf,
    pub summary_path: PathBuf,
    /// Labels per grid.
    pub grid_size: usize,
    pub layout: GridLayout,
    /// Duration of the blocking transition announcements.
    pub alert_ms: u64,
    /// Category whose share is the bias index. Defaults to the lowest
    /// category in the stimulus file.
    pub target_category: Option<CategoryId>,
    /// Number of categories the stimulus file must contain. Defaults to
    /// however many it does contain.
    pub category_count: Option<usize>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            stimuli_path: PathBuf::from("SelectIntTask_Stimuli.csv"),
            prompts_path: PathBuf::from("SelectIntTask_Instructions.csv"),
            raw_log_path: PathBuf::from("SelectIntTask_RawData.csv"),
            summary_path: PathBuf::from("SelectIntTask_SummaryData.csv"),
            grid_size: 16,
            layout: GridLayout::default(),
            alert_ms: 2500,
            target_category: None,
            category_count: None,
        }
    }
}

impl TaskConfig {
    /// Read a JSON config file. A missing file is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::ConfigurationMissing {
                resource: "task configuration".into(),
                path: path.to_path_buf(),
            },
            _ => Error::Io(e),
        })?;
        let config: TaskConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Build from `SELECTINT_CONFIG` / `SELECTINT_BASE_PATH`.
    pub fn from_env() -> Result<Self> {
        let config = match std::env::var_os("SELECTINT_CONFIG") {
            Some(path) => Self::load(Path::new(&path))?,
            None => Self::default(),
        };
        let base = std::env::var_os("SELECTINT_BASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(config.with_base(&base))
    }

    /// Resolve relative file paths against `base`.
    pub fn with_base(mut self, base: &Path) -> Self {
        for path in [
            &mut self.stimuli_path,
            &mut self.prompts_path,
            &mut self.raw_log_path,
            &mut self.summary_path,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.grid_size == 0 {
            return Err(Error::InvalidConfig("grid_size must be at least 1".into()));
        }
        if self.layout.cell_count() < self.grid_size {
            return Err(Error::InvalidConfig(format!(
                "layout has {} cells but grid_size is {}",
                self.layout.cell_count(),
                self.grid_size
            )));
        }
        if self.category_count == Some(0) {
            return Err(Error::InvalidConfig("category_count must be at least 1".into()));
        }
        Ok(())
    }

    pub fn alert(&self) -> Duration {
        Duration::from_millis(self.alert_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_is_default() {
        let config: TaskConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TaskConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config: TaskConfig =
            serde_json::from_str(
                r#"{
                    "grid_size": 9,
                    "layout": {"columns": [0.3, 0.5, 0.7], "rows": [0.3, 0.5, 0.7]},
                    "target_category": 2
                }"#,
            )
                .unwrap();
        assert_eq!(config.grid_size, 9);
        assert_eq!(config.target_category, Some(CategoryId(2)));
        assert_eq!(config.alert_ms, 2500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_small_layout() {
        let config = TaskConfig { grid_size: 20, ..TaskConfig::default() };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_with_base_only_touches_relative_paths() {
        let config = TaskConfig {
            summary_path: PathBuf::from("/abs/summary.csv"),
            ..TaskConfig::default()
        }
        .with_base(Path::new("/data/task"));
        assert_eq!(config.stimuli_path, PathBuf::from("/data/task/SelectIntTask_Stimuli.csv"));
        assert_eq!(config.summary_path, PathBuf::from("/abs/summary.csv"));
    }

    #[test]
    fn test_load_missing_config() {
        assert!(matches!(
            TaskConfig::load(Path::new("/definitely/not/config.json")),
            Err(Error::ConfigurationMissing { .. })
        ));
    }
}
