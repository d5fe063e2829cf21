use crate::data::{
    Dataset, FeatureTable, LabelTable, Sample, SplitConfig, SubjectSeries, MAX_TIME_POINTS,
};
use crate::error::PipelineError;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Per-column statistics over observed (non-NaN) values
#[derive(Debug, Clone)]
pub struct FeatureStats {
    /// Mean value for each feature
    pub means: Vec<f32>,
    /// Sample standard deviation for each feature (1 for constant columns)
    pub stds: Vec<f32>,
    /// Median value for each feature
    pub medians: Vec<f32>,
    /// First quartile for each feature
    pub q1: Vec<f32>,
    /// Third quartile for each feature
    pub q3: Vec<f32>,
    /// Minimum value for each feature
    pub mins: Vec<f32>,
    /// Maximum value for each feature
    pub maxs: Vec<f32>,
}

impl FeatureStats {
    /// Compute statistics from a feature table
    pub fn compute(table: &FeatureTable) -> Self {
        let n_features = table.n_columns();
        let mut means = vec![0.0f32; n_features];
        let mut stds = vec![1.0f32; n_features];
        let mut medians = vec![0.0f32; n_features];
        let mut q1 = vec![0.0f32; n_features];
        let mut q3 = vec![0.0f32; n_features];
        let mut mins = vec![0.0f32; n_features];
        let mut maxs = vec![0.0f32; n_features];

        for j in 0..n_features {
            let mut values: Vec<f32> = table.column_values(j).filter(|v| !v.is_nan()).collect();
            if values.is_empty() {
                continue;
            }
            values.sort_by(|a, b| a.total_cmp(b));

            let count = values.len();
            let mean = values.iter().map(|&v| v as f64).sum::<f64>() / count as f64;
            means[j] = mean as f32;

            if count > 1 {
                let variance = values
                    .iter()
                    .map(|&v| (v as f64 - mean).powi(2))
                    .sum::<f64>()
                    / (count - 1) as f64;
                let std = variance.sqrt() as f32;
                if std >= 1e-8 {
                    stds[j] = std;
                }
            }

            medians[j] = quantile(&values, 0.5);
            q1[j] = quantile(&values, 0.25);
            q3[j] = quantile(&values, 0.75);
            mins[j] = values[0];
            maxs[j] = values[count - 1];
        }

        Self {
            means,
            stds,
            medians,
            q1,
            q3,
            mins,
            maxs,
        }
    }
}

/// Linear-interpolated quantile of sorted values
fn quantile(sorted: &[f32], q: f64) -> f32 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = (pos - lo as f64) as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Feature scaling applied after NaN handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Standardizer {
    /// Leave values untouched
    None,
    /// Zero mean, unit variance
    Standard,
    /// Scale into [0, 1]
    MinMax,
    /// Center on the median, scale by the interquartile range
    Robust,
}

impl Standardizer {
    pub const ALL: [Standardizer; 4] = [
        Standardizer::None,
        Standardizer::Standard,
        Standardizer::MinMax,
        Standardizer::Robust,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Standardizer::None => "none",
            Standardizer::Standard => "standard",
            Standardizer::MinMax => "minmax",
            Standardizer::Robust => "robust",
        }
    }

    pub fn parse(value: &str) -> Result<Self, PipelineError> {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str() == value)
            .ok_or_else(|| PipelineError::InvalidOption {
                option: "standardizer".to_string(),
                value: value.to_string(),
            })
    }

    /// Scale every feature column; `pid` is never touched
    pub fn apply(&self, table: &FeatureTable) -> FeatureTable {
        if *self == Standardizer::None {
            return table.clone();
        }

        let stats = FeatureStats::compute(table);
        let (center, scale): (Vec<f32>, Vec<f32>) = (0..table.n_columns())
            .map(|j| match self {
                Standardizer::None => (0.0, 1.0),
                Standardizer::Standard => (stats.means[j], stats.stds[j]),
                Standardizer::MinMax => (stats.mins[j], nonzero(stats.maxs[j] - stats.mins[j])),
                Standardizer::Robust => (stats.medians[j], nonzero(stats.q3[j] - stats.q1[j])),
            })
            .unzip();

        let mut out = table.clone();
        for row in out.rows.iter_mut() {
            for (j, value) in row.iter_mut().enumerate() {
                *value = (*value - center[j]) / scale[j];
            }
        }
        debug!("Applied {} scaling to {} columns", self.as_str(), table.n_columns());
        out
    }
}

impl std::fmt::Display for Standardizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn nonzero(range: f32) -> f32 {
    if range.abs() < 1e-8 {
        1.0
    } else {
        range
    }
}

/// Group the flat table into one time-series matrix per subject.
///
/// Rows must be sorted by subject id; the order inside a subject is the
/// time order and is kept as is.
pub fn assemble_subjects(table: &FeatureTable) -> Result<Vec<SubjectSeries>, PipelineError> {
    let n_features = table.n_columns();
    let mut series = Vec::new();

    for (pid, range) in table.subject_ranges() {
        if range.len() > MAX_TIME_POINTS {
            return Err(PipelineError::TooManyTimePoints {
                pid,
                count: range.len(),
                max: MAX_TIME_POINTS,
            });
        }
        let values = table.rows[range.clone()].iter().flatten().copied().collect();
        series.push(SubjectSeries {
            pid,
            time_points: range.len(),
            n_features,
            values,
        });
    }

    debug!("Assembled {} subject series", series.len());
    Ok(series)
}

/// Pair each subject series with its label vector
pub fn attach_labels(
    series: Vec<SubjectSeries>,
    labels: &LabelTable,
) -> Result<Vec<Sample>, PipelineError> {
    if series.len() != labels.len() {
        return Err(PipelineError::LabelMismatch {
            features: series.len(),
            labels: labels.len(),
        });
    }

    series
        .into_iter()
        .zip(labels.pids.iter().zip(&labels.labels))
        .enumerate()
        .map(|(index, (series, (&label_pid, label)))| {
            if series.pid != label_pid {
                return Err(PipelineError::UnalignedSubject {
                    index,
                    feature_pid: series.pid,
                    label_pid,
                });
            }
            Ok(Sample {
                series,
                labels: label.clone(),
            })
        })
        .collect()
}

/// Shuffle with a fixed seed and move `ceil(ratio * n)` items to the second half
fn shuffle_split<T>(items: Vec<T>, ratio: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let n = items.len();
    let n_held = ((n as f64) * ratio - 1e-9).ceil().max(0.0) as usize;

    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = crate::utils::random::seeded_rng(seed);
    order.shuffle(&mut rng);

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let mut take = |indices: &[usize]| -> Vec<T> {
        indices.iter().filter_map(|&i| slots[i].take()).collect()
    };
    let held = take(&order[..n_held.min(n)]);
    let kept = take(&order[n_held.min(n)..]);
    (kept, held)
}

/// Two-stage seeded split: 40% held out, 30% of that becomes test
pub fn split_dataset(samples: Vec<Sample>, config: &SplitConfig) -> Result<Dataset, PipelineError> {
    info!("Splitting {} subjects with seed {}", samples.len(), config.seed);

    let (train, pool) = shuffle_split(samples, config.holdout_ratio, config.seed);
    let (val, test) = shuffle_split(pool, config.test_ratio, config.seed);

    for (name, split) in [("train", &train), ("validation", &val), ("test", &test)] {
        if split.is_empty() {
            return Err(PipelineError::EmptySplit(name));
        }
    }

    info!(
        "Dataset split: train={}, val={}, test={}",
        train.len(),
        val.len(),
        test.len()
    );

    Ok(Dataset { train, val, test })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::NUM_LABELS;

    fn flat_table(subjects: u64, hours: usize) -> FeatureTable {
        let mut t = FeatureTable::new(vec!["Time".into(), "HR".into(), "Temp".into()]);
        for pid in 0..subjects {
            for h in 0..hours {
                t.push_row(pid, vec![h as f32, 60.0 + pid as f32, 36.5]);
            }
        }
        t
    }

    fn labels_for(subjects: u64) -> LabelTable {
        LabelTable {
            columns: (0..NUM_LABELS).map(|i| format!("L{}", i)).collect(),
            pids: (0..subjects).collect(),
            labels: (0..subjects).map(|_| vec![0.0; NUM_LABELS]).collect(),
        }
    }

    #[test]
    fn test_feature_stats_compute() {
        let mut t = FeatureTable::new(vec!["a".into(), "b".into()]);
        t.push_row(1, vec![1.0, 2.0]);
        t.push_row(1, vec![3.0, f32::NAN]);
        t.push_row(2, vec![5.0, 2.0]);
        let stats = FeatureStats::compute(&t);

        assert_eq!(stats.means[0], 3.0);
        assert_eq!(stats.medians[0], 3.0);
        assert_eq!(stats.q1[0], 2.0);
        assert_eq!(stats.q3[0], 4.0);
        assert_eq!(stats.stds[0], 2.0);
        // constant column keeps unit scale
        assert_eq!(stats.stds[1], 1.0);
    }

    #[test]
    fn test_standardizers() {
        let mut t = FeatureTable::new(vec!["a".into()]);
        for v in [0.0, 5.0, 10.0] {
            t.push_row(1, vec![v]);
        }

        let minmax = Standardizer::MinMax.apply(&t);
        assert_eq!(minmax.column_values(0).collect::<Vec<_>>(), vec![0.0, 0.5, 1.0]);

        let standard = Standardizer::Standard.apply(&t);
        assert_eq!(standard.rows[1][0], 0.0);
        assert_eq!(standard.rows[2][0], 1.0);

        let robust = Standardizer::Robust.apply(&t);
        assert_eq!(robust.rows[0][0], -1.0);

        assert_eq!(Standardizer::None.apply(&t), t);
        assert_eq!(standard.pids, t.pids);
    }

    #[test]
    fn test_assemble_keeps_row_order() {
        let series = assemble_subjects(&flat_table(3, 12)).unwrap();
        assert_eq!(series.len(), 3);
        for s in &series {
            assert_eq!(s.shape(), (12, 3));
            assert_eq!(s.row(0)[0], 0.0);
            assert_eq!(s.row(11)[0], 11.0);
        }
        assert_eq!(series[2].row(0)[1], 62.0);
    }

    #[test]
    fn test_assemble_rejects_thirteenth_row() {
        let mut table = flat_table(2, 12);
        table.push_row(1, vec![12.0, 61.0, 36.5]);
        table.sort_by_pid();

        match assemble_subjects(&table) {
            Err(PipelineError::TooManyTimePoints { pid, count, max }) => {
                assert_eq!((pid, count, max), (1, 13, 12));
            }
            other => panic!("expected data-integrity error, got {:?}", other),
        }
    }

    #[test]
    fn test_attach_labels_checks_alignment() {
        let series = assemble_subjects(&flat_table(3, 2)).unwrap();
        assert!(matches!(
            attach_labels(series.clone(), &labels_for(2)),
            Err(PipelineError::LabelMismatch { features: 3, labels: 2 })
        ));

        let mut shifted = labels_for(3);
        shifted.pids = vec![0, 1, 5];
        assert!(matches!(
            attach_labels(series.clone(), &shifted),
            Err(PipelineError::UnalignedSubject { index: 2, .. })
        ));

        assert_eq!(attach_labels(series, &labels_for(3)).unwrap().len(), 3);
    }

    #[test]
    fn test_split_proportions() {
        let series = assemble_subjects(&flat_table(100, 2)).unwrap();
        let samples = attach_labels(series, &labels_for(100)).unwrap();
        let dataset = split_dataset(samples, &SplitConfig::default()).unwrap();

        assert_eq!(dataset.train.len(), 60);
        assert_eq!(dataset.val.len(), 28);
        assert_eq!(dataset.test.len(), 12);
    }

    #[test]
    fn test_split_is_deterministic_and_disjoint() {
        let make = || {
            let series = assemble_subjects(&flat_table(50, 1)).unwrap();
            attach_labels(series, &labels_for(50)).unwrap()
        };
        let a = split_dataset(make(), &SplitConfig::default()).unwrap();
        let b = split_dataset(make(), &SplitConfig::default()).unwrap();

        let pids = |s: &[Sample]| s.iter().map(|x| x.series.pid).collect::<Vec<_>>();
        assert_eq!(pids(&a.train), pids(&b.train));
        assert_eq!(pids(&a.test), pids(&b.test));

        let mut all: Vec<u64> = pids(&a.train);
        all.extend(pids(&a.val));
        all.extend(pids(&a.test));
        all.sort();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_too_small() {
        let series = assemble_subjects(&flat_table(2, 1)).unwrap();
        let samples = attach_labels(series, &labels_for(2)).unwrap();
        assert!(matches!(
            split_dataset(samples, &SplitConfig::default()),
            Err(PipelineError::EmptySplit(_))
        ));
    }
}
