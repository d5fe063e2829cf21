//! Missing-value handling for the clinical feature table.

use crate::data::loader::DataLoader;
use crate::data::preprocessing::FeatureStats;
use crate::data::FeatureTable;
use crate::error::PipelineError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Missing value handling strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NanStrategy {
    /// Fill with the sentinel -1
    MinusOne,
    /// Fill with zero
    Zero,
    /// Column mean
    Mean,
    /// Column median
    Median,
    /// Round-robin regression of each column on the others
    Iterative,
}

impl NanStrategy {
    pub const ALL: [NanStrategy; 5] = [
        NanStrategy::MinusOne,
        NanStrategy::Zero,
        NanStrategy::Mean,
        NanStrategy::Median,
        NanStrategy::Iterative,
    ];

    /// Name used in the grid and in cache file names
    pub fn as_str(&self) -> &'static str {
        match self {
            NanStrategy::MinusOne => "minusone",
            NanStrategy::Zero => "zero",
            NanStrategy::Mean => "mean",
            NanStrategy::Median => "median",
            NanStrategy::Iterative => "iterative",
        }
    }

    /// Parse from a grid value
    pub fn parse(value: &str) -> Result<Self, PipelineError> {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str() == value)
            .ok_or_else(|| PipelineError::InvalidOption {
                option: "nan_handling".to_string(),
                value: value.to_string(),
            })
    }

    /// Whether this build can run the strategy
    pub fn is_available(&self) -> bool {
        match self {
            NanStrategy::Iterative => cfg!(feature = "iterative-imputer"),
            _ => true,
        }
    }
}

impl std::fmt::Display for NanStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running the NaN handler
#[derive(Debug, Clone)]
pub enum NanOutcome {
    /// Table without missing values
    Handled(FeatureTable),
    /// The strategy cannot run in this build
    Unavailable(String),
}

/// Fills missing clinical measurements and caches the result on disk.
///
/// Cache files live at `{cache_dir}/nan_handling/{subjects}_{strategy}.csv`.
pub struct NanHandler {
    strategy: NanStrategy,
    cache_dir: Option<PathBuf>,
    subject_tag: String,
}

impl NanHandler {
    pub fn new(strategy: NanStrategy) -> Self {
        Self {
            strategy,
            cache_dir: None,
            subject_tag: "all".to_string(),
        }
    }

    /// Enable the on-disk cache
    pub fn with_cache<P: Into<PathBuf>>(mut self, cache_dir: P, subject_tag: &str) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self.subject_tag = subject_tag.to_string();
        self
    }

    /// Path of the cached table for this strategy, if caching is enabled
    pub fn cache_path(&self) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| {
            dir.join("nan_handling")
                .join(format!("{}_{}.csv", self.subject_tag, self.strategy))
        })
    }

    /// Fill every missing feature value
    pub fn handle(&self, table: &FeatureTable) -> Result<NanOutcome> {
        let loader = DataLoader::new();
        let cache_path = self.cache_path();

        if let Some(path) = cache_path.as_ref().filter(|p| p.is_file()) {
            info!("Reusing nan-handled table {:?}", path);
            return Ok(NanOutcome::Handled(loader.load_features(path)?));
        }

        if !self.strategy.is_available() {
            let reason = format!(
                "nan handling strategy '{}' is not available in this build",
                self.strategy
            );
            warn!("{}", reason);
            return Ok(NanOutcome::Unavailable(reason));
        }

        info!(
            "Handling {} missing values with '{}'",
            table.missing_count(),
            self.strategy
        );
        let handled = apply_strategy(table, self.strategy);

        if let Some(path) = cache_path {
            loader.write_features(&handled, &path)?;
            debug!("Cached nan-handled table at {:?}", path);
        }

        Ok(NanOutcome::Handled(handled))
    }
}

/// Apply a strategy without touching the cache
pub fn apply_strategy(table: &FeatureTable, strategy: NanStrategy) -> FeatureTable {
    if table.missing_count() == 0 {
        return table.clone();
    }

    match strategy {
        NanStrategy::MinusOne => fill_constant(table, |_| -1.0),
        NanStrategy::Zero => fill_constant(table, |_| 0.0),
        NanStrategy::Mean => {
            let stats = FeatureStats::compute(table);
            fill_constant(table, |j| stats.means[j])
        }
        NanStrategy::Median => {
            let stats = FeatureStats::compute(table);
            fill_constant(table, |j| stats.medians[j])
        }
        NanStrategy::Iterative => iterative_fill(table),
    }
}

fn fill_constant<F: Fn(usize) -> f32>(table: &FeatureTable, fill: F) -> FeatureTable {
    let mut out = table.clone();
    for row in out.rows.iter_mut() {
        for (j, value) in row.iter_mut().enumerate() {
            if value.is_nan() {
                *value = fill(j);
            }
        }
    }
    out
}

#[cfg(feature = "iterative-imputer")]
fn iterative_fill(table: &FeatureTable) -> FeatureTable {
    iterative::impute(table, &iterative::IterativeConfig::default())
}

#[cfg(not(feature = "iterative-imputer"))]
fn iterative_fill(table: &FeatureTable) -> FeatureTable {
    // NanHandler refuses the strategy before getting here; callers of
    // apply_strategy get the mean fill the iterative imputer starts from.
    let stats = FeatureStats::compute(table);
    fill_constant(table, |j| stats.means[j])
}

/// Per-subject fill from the nearest observed hour.
///
/// Each missing value takes the closest observed value of the same column
/// within the same subject; on equal distance the earlier hour wins.
/// Values never observed for a subject stay missing. Rows must be grouped
/// by subject.
pub fn fill_nearest_in_time(table: &FeatureTable) -> FeatureTable {
    let mut out = table.clone();

    for (_, range) in table.subject_ranges() {
        for j in 0..table.n_columns() {
            let observed: Vec<usize> = range
                .clone()
                .filter(|&i| !table.rows[i][j].is_nan())
                .collect();
            if observed.is_empty() || observed.len() == range.len() {
                continue;
            }

            for i in range.clone() {
                if !table.rows[i][j].is_nan() {
                    continue;
                }
                let nearest = observed
                    .iter()
                    .copied()
                    .min_by_key(|&k| (k.abs_diff(i), k > i));
                if let Some(k) = nearest {
                    out.rows[i][j] = table.rows[k][j];
                }
            }
        }
    }

    out
}

#[cfg(feature = "iterative-imputer")]
pub mod iterative {
    //! Round-robin ridge regression imputation.

    use crate::data::preprocessing::FeatureStats;
    use crate::data::FeatureTable;
    use tracing::debug;

    #[derive(Debug, Clone)]
    pub struct IterativeConfig {
        /// Maximum number of passes over all columns
        pub max_rounds: usize,
        /// Ridge penalty added to the normal equations
        pub ridge: f64,
        /// Stop once the largest imputed change (relative to column scale) drops below this
        pub tolerance: f64,
    }

    impl Default for IterativeConfig {
        fn default() -> Self {
            Self {
                max_rounds: 10,
                ridge: 1e-3,
                tolerance: 1e-3,
            }
        }
    }

    pub fn impute(table: &FeatureTable, config: &IterativeConfig) -> FeatureTable {
        let n = table.n_rows();
        let d = table.n_columns();
        let stats = FeatureStats::compute(table);

        let missing: Vec<Vec<bool>> = table
            .rows
            .iter()
            .map(|row| row.iter().map(|v| v.is_nan()).collect())
            .collect();

        // Work in standardized space so the ridge penalty treats columns alike
        let mut x: Vec<Vec<f64>> = table
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(j, &v)| {
                        if v.is_nan() {
                            0.0
                        } else {
                            ((v - stats.means[j]) / stats.stds[j]) as f64
                        }
                    })
                    .collect()
            })
            .collect();

        let targets: Vec<usize> = (0..d)
            .filter(|&j| {
                let n_missing = missing.iter().filter(|m| m[j]).count();
                n_missing > 0 && n_missing < n
            })
            .collect();

        for round in 0..config.max_rounds {
            let mut max_change = 0.0f64;

            for &j in &targets {
                let predictors: Vec<usize> = (0..d).filter(|&k| k != j).collect();
                let observed: Vec<usize> = (0..n).filter(|&i| !missing[i][j]).collect();

                let Some(coef) = fit_ridge(&x, &observed, &predictors, j, config.ridge) else {
                    continue;
                };

                for i in (0..n).filter(|&i| missing[i][j]) {
                    let prediction = coef[0]
                        + predictors
                            .iter()
                            .zip(&coef[1..])
                            .map(|(&k, &c)| c * x[i][k])
                            .sum::<f64>();
                    max_change = max_change.max((prediction - x[i][j]).abs());
                    x[i][j] = prediction;
                }
            }

            debug!("Iterative imputation round {}: max change {:.6}", round + 1, max_change);
            if max_change < config.tolerance {
                break;
            }
        }

        let mut out = table.clone();
        for (i, row) in out.rows.iter_mut().enumerate() {
            for (j, value) in row.iter_mut().enumerate() {
                if missing[i][j] {
                    *value = if targets.contains(&j) {
                        x[i][j] as f32 * stats.stds[j] + stats.means[j]
                    } else {
                        0.0
                    };
                }
            }
        }
        out
    }

    /// Ridge regression with intercept; returns `[intercept, coefs...]`
    fn fit_ridge(
        x: &[Vec<f64>],
        rows: &[usize],
        predictors: &[usize],
        target: usize,
        ridge: f64,
    ) -> Option<Vec<f64>> {
        if rows.is_empty() {
            return None;
        }
        let p = predictors.len() + 1;
        let mut xtx = vec![vec![0.0f64; p]; p];
        let mut xty = vec![0.0f64; p];

        let mut features = vec![0.0f64; p];
        for &i in rows {
            features[0] = 1.0;
            for (slot, &k) in features[1..].iter_mut().zip(predictors) {
                *slot = x[i][k];
            }
            for a in 0..p {
                xty[a] += features[a] * x[i][target];
                for b in a..p {
                    xtx[a][b] += features[a] * features[b];
                }
            }
        }
        for a in 0..p {
            for b in 0..a {
                xtx[a][b] = xtx[b][a];
            }
            // intercept is not penalized
            if a > 0 {
                xtx[a][a] += ridge * rows.len() as f64;
            }
        }
        xtx[0][0] += 1e-12;

        cholesky_solve(xtx, xty)
    }

    /// Solve `A x = b` for symmetric positive definite `A`
    fn cholesky_solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
        let n = b.len();
        for j in 0..n {
            let mut diag = a[j][j];
            for k in 0..j {
                diag -= a[j][k] * a[j][k];
            }
            if diag <= 0.0 || !diag.is_finite() {
                return None;
            }
            let diag = diag.sqrt();
            a[j][j] = diag;
            for i in j + 1..n {
                let mut sum = a[i][j];
                for k in 0..j {
                    sum -= a[i][k] * a[j][k];
                }
                a[i][j] = sum / diag;
            }
        }
        // forward substitution L y = b
        for i in 0..n {
            for k in 0..i {
                b[i] -= a[i][k] * b[k];
            }
            b[i] /= a[i][i];
        }
        // back substitution L^T x = y
        for i in (0..n).rev() {
            for k in i + 1..n {
                b[i] -= a[k][i] * b[k];
            }
            b[i] /= a[i][i];
        }
        Some(b)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_recovers_linear_relation() {
            let mut table = FeatureTable::new(vec!["a".into(), "b".into()]);
            for i in 0..20 {
                let a = i as f32;
                table.push_row(i, vec![a, 2.0 * a + 1.0]);
            }
            table.rows[5][1] = f32::NAN;
            table.rows[12][1] = f32::NAN;

            let out = impute(&table, &IterativeConfig::default());
            assert!((out.rows[5][1] - 11.0).abs() < 0.1);
            assert!((out.rows[12][1] - 25.0).abs() < 0.1);
            assert_eq!(out.missing_count(), 0);
        }

        #[test]
        fn test_fully_missing_column_is_zero_filled() {
            let mut table = FeatureTable::new(vec!["a".into(), "b".into()]);
            table.push_row(1, vec![1.0, f32::NAN]);
            table.push_row(2, vec![2.0, f32::NAN]);

            let out = impute(&table, &IterativeConfig::default());
            assert_eq!(out.rows[0][1], 0.0);
            assert_eq!(out.rows[1][1], 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table_with_gaps() -> FeatureTable {
        let mut t = FeatureTable::new(vec!["Time".into(), "HR".into(), "Lactate".into()]);
        t.push_row(1, vec![1.0, 80.0, f32::NAN]);
        t.push_row(1, vec![2.0, f32::NAN, f32::NAN]);
        t.push_row(1, vec![3.0, f32::NAN, f32::NAN]);
        t.push_row(1, vec![4.0, 90.0, f32::NAN]);
        t.push_row(2, vec![1.0, f32::NAN, 1.5]);
        t.push_row(2, vec![2.0, 70.0, f32::NAN]);
        t
    }

    #[test]
    fn test_strategy_names_round_trip() {
        for strategy in NanStrategy::ALL {
            assert_eq!(NanStrategy::parse(strategy.as_str()).unwrap(), strategy);
        }
        assert!(NanStrategy::parse("knn").is_err());
    }

    #[test]
    fn test_minus_one_fills_everything() {
        let out = apply_strategy(&table_with_gaps(), NanStrategy::MinusOne);
        assert_eq!(out.missing_count(), 0);
        assert_eq!(out.rows[0][2], -1.0);
        assert_eq!(out.rows[0][1], 80.0);
    }

    #[test]
    fn test_mean_fill_uses_observed_values() {
        let out = apply_strategy(&table_with_gaps(), NanStrategy::Mean);
        assert_eq!(out.rows[1][1], 80.0); // (80 + 90 + 70) / 3
        assert_eq!(out.rows[0][2], 1.5);
    }

    #[test]
    fn test_handling_complete_table_is_noop() {
        let complete = apply_strategy(&table_with_gaps(), NanStrategy::Zero);
        for strategy in NanStrategy::ALL {
            assert_eq!(apply_strategy(&complete, strategy), complete);
        }
    }

    #[test]
    fn test_nearest_in_time_stays_within_subject() {
        let out = fill_nearest_in_time(&table_with_gaps());
        // hour 2 is closer to hour 1, hour 3 closer to hour 4
        assert_eq!(out.rows[1][1], 80.0);
        assert_eq!(out.rows[2][1], 90.0);
        // never observed for subject 1
        assert!(out.rows[0][2].is_nan());
        // subject 2 does not borrow from subject 1
        assert_eq!(out.rows[4][1], 70.0);
        assert_eq!(out.rows[5][2], 1.5);
    }

    #[test]
    fn test_handler_writes_and_reuses_cache() {
        let dir = TempDir::new().unwrap();
        let handler = NanHandler::new(NanStrategy::MinusOne).with_cache(dir.path(), "50");
        let path = handler.cache_path().unwrap();
        assert!(path.ends_with("nan_handling/50_minusone.csv"));

        let first = match handler.handle(&table_with_gaps()).unwrap() {
            NanOutcome::Handled(table) => table,
            NanOutcome::Unavailable(reason) => panic!("unexpected: {}", reason),
        };
        assert!(path.is_file());

        // a different input is ignored once the cache exists
        let other = FeatureTable::new(vec!["Time".into(), "HR".into(), "Lactate".into()]);
        match handler.handle(&other).unwrap() {
            NanOutcome::Handled(table) => assert_eq!(table, first),
            NanOutcome::Unavailable(reason) => panic!("unexpected: {}", reason),
        }
    }

    #[cfg(not(feature = "iterative-imputer"))]
    #[test]
    fn test_iterative_unavailable_without_feature() {
        let handler = NanHandler::new(NanStrategy::Iterative);
        assert!(matches!(
            handler.handle(&table_with_gaps()).unwrap(),
            NanOutcome::Unavailable(_)
        ));
    }

    #[cfg(feature = "iterative-imputer")]
    #[test]
    fn test_iterative_fills_everything() {
        let out = apply_strategy(&table_with_gaps(), NanStrategy::Iterative);
        assert_eq!(out.missing_count(), 0);
    }
}
