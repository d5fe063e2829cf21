use crate::data::batching::{Batch, BatchSource};
use crate::data::Sample;
use crate::error::PipelineError;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Predictions at or below this value count as negative
pub const DECISION_THRESHOLD: f32 = 0.5;

/// Anything that maps a batch to per-label probabilities
pub trait Predictor {
    /// One row of `num_labels` scores in `[0, 1]` per sample of the batch
    fn predict(&self, batch: &Batch) -> Result<Vec<Vec<f32>>>;
}

/// Predicts the same score for every label
#[derive(Debug, Clone, Copy)]
pub struct ConstantPredictor {
    pub value: f32,
}

impl Predictor for ConstantPredictor {
    fn predict(&self, batch: &Batch) -> Result<Vec<Vec<f32>>> {
        Ok(vec![vec![self.value; batch.num_labels]; batch.size])
    }
}

/// Evaluation scores of one configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scores {
    /// ROC-AUC per label, NaN where the label has a single class
    pub roc_auc: Vec<f64>,
    pub mean_roc_auc: f64,
    /// Dice score per label
    pub dice_score: Vec<f64>,
    pub mean_dice: f64,
}

/// Run `predictor` over `samples` one subject at a time.
///
/// Returns `(truth, predictions)` as per-sample label rows.
pub fn predict_samples(
    predictor: &dyn Predictor,
    samples: &[Sample],
) -> Result<(Vec<Vec<f32>>, Vec<Vec<f32>>)> {
    let mut truth = Vec::with_capacity(samples.len());
    let mut predictions = Vec::with_capacity(samples.len());

    for batch in BatchSource::test(samples) {
        let rows = predictor.predict(&batch)?;
        if rows.len() != batch.size {
            bail!("predictor returned {} rows for a batch of {}", rows.len(), batch.size);
        }
        truth.extend(batch.label_rows().map(|r| r.to_vec()));
        predictions.extend(rows);
    }

    Ok((truth, predictions))
}

/// Predict the test split and score it
pub fn evaluate(predictor: &dyn Predictor, test: &[Sample]) -> Result<Scores> {
    let (truth, predictions) = predict_samples(predictor, test)?;
    score(&truth, &predictions)
}

/// Score per-sample predictions against binary truth, label by label.
///
/// Fails with [`PipelineError::NonFinitePredictions`] when a model diverged.
pub fn score(truth: &[Vec<f32>], predictions: &[Vec<f32>]) -> Result<Scores> {
    if truth.len() != predictions.len() {
        bail!("{} truth rows but {} prediction rows", truth.len(), predictions.len());
    }
    let num_labels = truth.first().map(Vec::len).unwrap_or(0);
    if truth.iter().chain(predictions).any(|row| row.len() != num_labels) {
        bail!("rows must all have {} labels", num_labels);
    }

    let mut roc = Vec::with_capacity(num_labels);
    let mut dice = Vec::with_capacity(num_labels);
    for label in 0..num_labels {
        let y: Vec<f32> = truth.iter().map(|row| row[label]).collect();
        let p: Vec<f32> = predictions.iter().map(|row| row[label]).collect();
        let non_finite = p.iter().filter(|v| !v.is_finite()).count();
        if non_finite > 0 {
            return Err(PipelineError::NonFinitePredictions { label, count: non_finite }.into());
        }
        roc.push(roc_auc(&y, &p));
        dice.push(dice_score(&y, &p));
    }

    Ok(Scores {
        mean_roc_auc: mean(&roc),
        mean_dice: mean(&dice),
        roc_auc: roc,
        dice_score: dice,
    })
}

/// Dice similarity between binary truth and thresholded scores.
///
/// Two empty sets are identical, so a label with no positives in either
/// truth or prediction scores 1. NaN when any score is not finite.
pub fn dice_score(truth: &[f32], scores: &[f32]) -> f64 {
    if scores.iter().any(|s| !s.is_finite()) {
        return f64::NAN;
    }
    let mut intersection = 0usize;
    let mut n_truth = 0usize;
    let mut n_pred = 0usize;

    for (&y, &p) in truth.iter().zip(scores) {
        let y = y > DECISION_THRESHOLD;
        let p = p > DECISION_THRESHOLD;
        n_truth += y as usize;
        n_pred += p as usize;
        intersection += (y && p) as usize;
    }

    if n_truth + n_pred == 0 {
        1.0
    } else {
        2.0 * intersection as f64 / (n_truth + n_pred) as f64
    }
}

/// Area under the ROC curve via the rank-sum statistic, ties sharing their
/// average rank. NaN when `truth` holds a single class or any score is not
/// finite.
pub fn roc_auc(truth: &[f32], scores: &[f32]) -> f64 {
    let n = truth.len().min(scores.len());
    if scores[..n].iter().any(|s| !s.is_finite()) {
        return f64::NAN;
    }
    let n_pos = truth[..n].iter().filter(|&&y| y > DECISION_THRESHOLD).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return f64::NAN;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; a tie group shares the mean of its ranks
        let rank = (start + 1 + end) as f64 / 2.0;
        for &i in &order[start..end] {
            if truth[i] > DECISION_THRESHOLD {
                positive_rank_sum += rank;
            }
        }
        start = end;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    (positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

/// Arithmetic mean; NaN entries propagate
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean over the defined entries only; NaN when none is defined
pub fn nan_mean(values: &[f64]) -> f64 {
    let defined: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    mean(&defined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SubjectSeries;

    fn zero_label_samples(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample {
                series: SubjectSeries {
                    pid: i as u64,
                    time_points: 5,
                    n_features: 3,
                    values: vec![0.5; 15],
                },
                labels: vec![0.0; 10],
            })
            .collect()
    }

    #[test]
    fn test_all_negative_truth_with_zero_predictor() {
        let samples = zero_label_samples(10);
        let scores = evaluate(&ConstantPredictor { value: 0.0 }, &samples).unwrap();

        assert_eq!(scores.roc_auc.len(), 10);
        assert!(scores.roc_auc.iter().all(|v| v.is_nan()));
        assert!(scores.mean_roc_auc.is_nan());
        assert_eq!(scores.dice_score, vec![1.0; 10]);
        assert_eq!(scores.mean_dice, 1.0);
    }

    #[test]
    fn test_roc_auc_values() {
        let truth = [0.0, 0.0, 1.0, 1.0];
        assert_eq!(roc_auc(&truth, &[0.1, 0.2, 0.8, 0.9]), 1.0);
        assert_eq!(roc_auc(&truth, &[0.9, 0.8, 0.2, 0.1]), 0.0);
        // a tie between one positive and one negative is worth half a pair
        assert_eq!(roc_auc(&truth, &[0.1, 0.5, 0.5, 0.9]), 0.875);
        assert_eq!(roc_auc(&truth, &[0.3; 4]), 0.5);
    }

    #[test]
    fn test_dice_score_values() {
        let truth = [1.0, 1.0, 0.0, 0.0];
        assert_eq!(dice_score(&truth, &[0.9, 0.7, 0.1, 0.2]), 1.0);
        assert_eq!(dice_score(&truth, &[0.9, 0.1, 0.8, 0.2]), 0.5);
        assert_eq!(dice_score(&truth, &[0.0; 4]), 0.0);
        // exactly at the threshold counts as negative
        assert_eq!(dice_score(&[0.0, 0.0], &[0.5, 0.5]), 1.0);
    }

    #[test]
    fn test_means_are_arithmetic() {
        let truth = vec![vec![0.0, 1.0], vec![1.0, 1.0], vec![1.0, 0.0]];
        let predictions = vec![vec![0.2, 0.9], vec![0.7, 0.6], vec![0.4, 0.3]];
        let scores = score(&truth, &predictions).unwrap();

        let pairs = [
            (&scores.roc_auc, scores.mean_roc_auc),
            (&scores.dice_score, scores.mean_dice),
        ];
        for (values, m) in pairs {
            assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
            assert_eq!(m, values.iter().sum::<f64>() / values.len() as f64);
        }
    }

    #[test]
    fn test_nan_mean_skips_undefined() {
        assert_eq!(nan_mean(&[f64::NAN, 0.5, 1.0]), 0.75);
        assert!(nan_mean(&[f64::NAN]).is_nan());
        assert!(mean(&[f64::NAN, 0.5]).is_nan());
    }

    #[test]
    fn test_non_finite_scores_are_undefined() {
        let truth = [0.0, 1.0, 0.0, 1.0];
        assert!(roc_auc(&truth, &[f32::NAN; 4]).is_nan());
        assert!(roc_auc(&truth, &[0.1, f32::NAN, 0.2, 0.9]).is_nan());
        assert!(dice_score(&truth, &[0.1, f32::INFINITY, 0.2, 0.9]).is_nan());
    }

    #[test]
    fn test_score_rejects_diverged_predictions() {
        let truth = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]];
        let predictions = vec![vec![0.2, 0.9], vec![0.7, f32::NAN], vec![0.4, f32::NAN]];

        let err = score(&truth, &predictions).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NonFinitePredictions { label: 1, count: 2 })
        ));

        let diverged = ConstantPredictor { value: f32::NAN };
        let err = evaluate(&diverged, &zero_label_samples(4)).unwrap_err();
        assert!(err.downcast_ref::<PipelineError>().is_some());
    }

    #[test]
    fn test_score_rejects_ragged_rows() {
        assert!(score(&[vec![1.0, 0.0]], &[vec![0.5]]).is_err());
        assert!(score(&[vec![1.0]], &[]).is_err());
    }
}
