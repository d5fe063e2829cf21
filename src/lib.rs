//! # labgrid: ICU test-ordering experiments
//!
//! labgrid runs a hyperparameter grid over hourly ICU measurements and
//! predicts, for ten laboratory tests, whether the test will be ordered
//! during the rest of the stay.
//!
//! ## Features
//!
//! - Missing value handling with on-disk caches
//! - Per-subject time-series assembly (at most 12 hours per subject)
//! - Dense and linear models trained with early stopping, plus random architecture search
//! - Per-label Dice and ROC-AUC evaluation
//! - Memoized grid search over a persistent results table
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use labgrid::experiment::{ExperimentConfig, memoizer::Memoizer};
//! use labgrid::experiment::pipeline::ClinicalPipeline;
//! use labgrid::experiment::results::ResultsTable;
//!
//! let config = ExperimentConfig::default();
//! let grid = config.search_grid().unwrap();
//! let mut table = ResultsTable::load_or_new(&config.results_path, &grid.option_names()).unwrap();
//!
//! let mut pipeline = ClinicalPipeline::<labgrid::TrainingBackend>::prepare(
//!     config.clone(),
//!     "train_features.csv",
//!     "train_labels.csv",
//!     Default::default(),
//! )
//! .unwrap();
//!
//! Memoizer::new(&config.results_path)
//!     .run(&grid, &mut table, &mut pipeline)
//!     .unwrap();
//! ```

pub mod cli;
pub mod data;
pub mod error;
pub mod evaluate;
pub mod experiment;
pub mod model;
pub mod training;
pub mod utils;

use burn::backend::Autodiff;
use burn_ndarray::NdArray;

/// Default backend type
pub type DefaultBackend = NdArray<f32>;

/// Backend used for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Re-export commonly used types
pub use data::loader::DataLoader;
pub use data::{Dataset, FeatureTable, LabelTable};
pub use error::PipelineError;
pub use experiment::ExperimentConfig;
pub use model::ModelConfig;
pub use training::{TrainingConfig, TrainingResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn info() -> String {
    format!("{} v{} - ICU test-ordering grid search", NAME, VERSION)
}
