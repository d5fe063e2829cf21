pub mod batching;
pub mod imputation;
pub mod loader;
pub mod preprocessing;

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Subject identifier column shared by the feature and label tables
pub const ID_COLUMN: &str = "pid";

/// Maximum number of hourly rows a single ICU stay may contribute
pub const MAX_TIME_POINTS: usize = 12;

/// Number of medical test categories predicted per subject
pub const NUM_LABELS: usize = 10;

/// Label columns of the training label table, in file order
pub const LABEL_COLUMNS: [&str; NUM_LABELS] = [
    "LABEL_BaseExcess",
    "LABEL_Fibrinogen",
    "LABEL_AST",
    "LABEL_Alkalinephos",
    "LABEL_Bilirubin_total",
    "LABEL_Lactate",
    "LABEL_TroponinI",
    "LABEL_SaO2",
    "LABEL_Bilirubin_direct",
    "LABEL_EtCO2",
];

/// Flat per-timestamp clinical measurements.
///
/// One row per (subject, hour). Missing measurements are stored as `NaN`.
/// The `pid` column is kept apart from the feature columns so that
/// imputation and scaling never touch it.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    /// Feature column names (excluding `pid`)
    pub columns: Vec<String>,
    /// Subject id of each row
    pub pids: Vec<u64>,
    /// Row-major feature values, `rows[i].len() == columns.len()`
    pub rows: Vec<Vec<f32>>,
}

impl FeatureTable {
    /// Create an empty table with the given feature columns
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            pids: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Append one row
    pub fn push_row(&mut self, pid: u64, values: Vec<f32>) {
        debug_assert_eq!(values.len(), self.columns.len());
        self.pids.push(pid);
        self.rows.push(values);
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Number of missing cells across all feature columns
    pub fn missing_count(&self) -> usize {
        self.rows
            .iter()
            .map(|row| row.iter().filter(|v| v.is_nan()).count())
            .sum()
    }

    /// Number of distinct subjects
    pub fn subject_count(&self) -> usize {
        self.pids.iter().collect::<HashSet<_>>().len()
    }

    /// Values of one column, in row order
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = f32> + '_ {
        self.rows.iter().map(move |row| row[index])
    }

    /// Stable sort of rows by subject id; time order within a subject is kept
    pub fn sort_by_pid(&mut self) {
        let mut order: Vec<usize> = (0..self.rows.len()).collect();
        order.sort_by_key(|&i| self.pids[i]);

        let pids = order.iter().map(|&i| self.pids[i]).collect();
        let rows = order.iter().map(|&i| self.rows[i].clone()).collect();
        self.pids = pids;
        self.rows = rows;
    }

    /// Drop every row whose subject id is greater than `max_pid`
    pub fn retain_up_to(&mut self, max_pid: u64) {
        let keep: Vec<bool> = self.pids.iter().map(|&pid| pid <= max_pid).collect();
        let mut flags = keep.iter();
        self.rows.retain(|_| *flags.next().unwrap_or(&false));
        self.pids.retain(|&pid| pid <= max_pid);
    }

    /// Row index ranges `(pid, start..end)` of consecutive rows sharing a subject id
    pub fn subject_ranges(&self) -> Vec<(u64, std::ops::Range<usize>)> {
        let mut ranges = Vec::new();
        let mut start = 0;
        for i in 1..=self.pids.len() {
            if i == self.pids.len() || self.pids[i] != self.pids[start] {
                ranges.push((self.pids[start], start..i));
                start = i;
            }
        }
        ranges
    }
}

/// Per-subject binary labels
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTable {
    /// Label column names (excluding `pid`)
    pub columns: Vec<String>,
    /// Subject id of each row
    pub pids: Vec<u64>,
    /// One label vector per subject
    pub labels: Vec<Vec<f32>>,
}

impl LabelTable {
    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    /// Sort rows by subject id
    pub fn sort_by_pid(&mut self) {
        let mut order: Vec<usize> = (0..self.pids.len()).collect();
        order.sort_by_key(|&i| self.pids[i]);
        self.labels = order.iter().map(|&i| self.labels[i].clone()).collect();
        self.pids = order.iter().map(|&i| self.pids[i]).collect();
    }

    /// Keep only the first `n` subjects
    pub fn truncate(&mut self, n: usize) {
        self.pids.truncate(n);
        self.labels.truncate(n);
    }

    /// Largest subject id, if any
    pub fn last_pid(&self) -> Option<u64> {
        self.pids.last().copied()
    }
}

/// Time-series matrix of one subject, `time_points x n_features`, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectSeries {
    pub pid: u64,
    pub time_points: usize,
    pub n_features: usize,
    pub values: Vec<f32>,
}

impl SubjectSeries {
    pub fn shape(&self) -> (usize, usize) {
        (self.time_points, self.n_features)
    }

    /// Features of one time point
    pub fn row(&self, t: usize) -> &[f32] {
        &self.values[t * self.n_features..(t + 1) * self.n_features]
    }
}

/// Model input paired with its label vector
#[derive(Debug, Clone)]
pub struct Sample {
    pub series: SubjectSeries,
    pub labels: Vec<f32>,
}

/// Dataset split configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Share of subjects moved to the validation + test pool
    pub holdout_ratio: f64,
    /// Share of the pool that becomes the test split
    pub test_ratio: f64,
    /// Random seed
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            holdout_ratio: 0.4,
            test_ratio: 0.3,
            seed: 10,
        }
    }
}

/// Dataset container
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    /// Training samples
    pub train: Vec<Sample>,
    /// Validation samples
    pub val: Vec<Sample>,
    /// Test samples
    pub test: Vec<Sample>,
}

impl Dataset {
    /// Get total number of samples
    pub fn total_samples(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    /// Common `(time_points, n_features)` shape of every sample.
    ///
    /// The models flatten the series into a fixed-width input, so subjects
    /// with a different number of time points cannot share one network.
    pub fn input_shape(&self) -> Result<(usize, usize), PipelineError> {
        let mut samples = self.train.iter().chain(&self.val).chain(&self.test);
        let first = samples.next().ok_or(PipelineError::EmptySplit("train"))?;
        let expected = first.series.shape();

        for sample in samples {
            if sample.series.shape() != expected {
                return Err(PipelineError::ShapeMismatch {
                    pid: sample.series.pid,
                    expected,
                    found: sample.series.shape(),
                });
            }
        }
        Ok(expected)
    }

    /// Number of label columns
    pub fn num_labels(&self) -> usize {
        self.train.first().map(|s| s.labels.len()).unwrap_or(NUM_LABELS)
    }
}
