pub mod grid;
pub mod memoizer;
pub mod pipeline;
pub mod results;

use crate::data::SplitConfig;
use crate::training::TrainingConfig;
use anyhow::{Context, Result};
use grid::SearchGrid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// When the results table is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistPolicy {
    /// After every appended row
    EachResult,
    /// Once, after the whole grid
    EndOfRun,
    /// After every `n` appended rows, and at the end
    Every(usize),
}

/// Experiment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    /// Seed for splitting, batch shuffling and the architecture search
    pub seed: u64,
    pub batch_size: usize,
    /// Keep only the first `n` subjects of the label table
    pub num_subjects: Option<usize>,
    /// Maximum training epochs
    pub epochs: usize,
    /// Architecture search budget
    pub trials: usize,
    /// Re-run everything and never write the results table
    pub fast_iteration: bool,
    /// Abort the grid on the first failing configuration
    pub strict: bool,
    pub persist: PersistPolicy,
    /// Directory holding the imputation caches and search artifacts
    pub cache_dir: PathBuf,
    pub results_path: PathBuf,
    /// Search artifacts go to `{cache_dir}/{project_name}`
    pub project_name: String,
    /// Option name to candidate values
    pub grid: BTreeMap<String, Vec<String>>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            seed: 10,
            batch_size: 2048,
            num_subjects: None,
            epochs: 1000,
            trials: 50,
            fast_iteration: false,
            strict: true,
            persist: PersistPolicy::EachResult,
            cache_dir: PathBuf::from("."),
            results_path: PathBuf::from("temp/params_results.csv"),
            project_name: "subtask1_results".to_string(),
            grid: grid::default_grid(),
        }
    }
}

impl ExperimentConfig {
    /// Create configuration for quick testing
    pub fn quick_test() -> Self {
        Self {
            batch_size: 16,
            epochs: 2,
            trials: 2,
            ..Default::default()
        }
    }

    /// Load from a JSON file; the grid is validated eagerly
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        config.search_grid()?;
        Ok(config)
    }

    /// Expanded and validated grid
    pub fn search_grid(&self) -> Result<SearchGrid> {
        Ok(SearchGrid::new(self.grid.clone())?)
    }

    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            epochs: self.epochs,
            batch_size: self.batch_size,
            seed: self.seed,
            ..TrainingConfig::default()
        }
    }

    pub fn split_config(&self) -> SplitConfig {
        SplitConfig {
            seed: self.seed,
            ..SplitConfig::default()
        }
    }

    /// Subject part of cache file names
    pub fn subject_tag(&self) -> String {
        self.num_subjects
            .map(|n| n.to_string())
            .unwrap_or_else(|| "all".to_string())
    }

    pub fn project_dir(&self) -> PathBuf {
        self.cache_dir.join(&self.project_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ExperimentConfig::default();
        assert_eq!(config.seed, 10);
        assert_eq!(config.batch_size, 2048);
        assert_eq!(config.subject_tag(), "all");
        assert_eq!(config.search_grid().unwrap().len(), 1);
        assert_eq!(config.training_config().epochs, 1000);
        assert_eq!(config.split_config().seed, 10);
    }

    #[test]
    fn test_from_file_partial() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "num_subjects": 500,
                "persist": {"every": 3},
                "grid": {
                    "loss": ["dice", "binary_crossentropy"],
                    "standardizer": ["none", "robust"]
                }
            }"#,
        )
        .unwrap();

        let config = ExperimentConfig::from_file(&path).unwrap();
        assert_eq!(config.subject_tag(), "500");
        assert_eq!(config.persist, PersistPolicy::Every(3));
        assert_eq!(config.epochs, 1000);
        assert_eq!(config.search_grid().unwrap().len(), 4);
    }

    #[test]
    fn test_from_file_rejects_bad_grid() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{"grid": {"loss": ["focal"]}}"#).unwrap();
        assert!(ExperimentConfig::from_file(&path).is_err());

        std::fs::write(&path, r#"{"epoch": 3}"#).unwrap();
        assert!(ExperimentConfig::from_file(&path).is_err());
    }
}
