use crate::data::{Dataset, Sample};
use crate::error::PipelineError;
use crate::evaluate::{self, Predictor};
use crate::model::architecture::init_three_layers;
use crate::model::checkpoint::{CheckpointMetadata, ModelSaver};
use crate::model::loss::LossKind;
use crate::model::{ModelConfig, ModelFamily, OutputActivation};
use crate::training::trainer::{TrainedModel, Trainer};
use crate::training::TrainingConfig;
use anyhow::{bail, Context, Result};
use burn::tensor::backend::AutodiffBackend;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Candidate values sampled by the random search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSpace {
    pub hidden_size_1: Vec<usize>,
    pub hidden_size_2: Vec<usize>,
    pub hidden_size_3: Vec<usize>,
    pub dropout: Vec<f64>,
    pub learning_rate: Vec<f64>,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            hidden_size_1: vec![32, 64, 128, 256],
            hidden_size_2: vec![16, 32, 64, 128],
            hidden_size_3: vec![8, 16, 32, 64],
            dropout: vec![0.0, 0.1, 0.2, 0.3, 0.5],
            learning_rate: vec![1e-2, 1e-3, 1e-4],
        }
    }
}

impl SearchSpace {
    /// Draw one architecture and learning rate
    pub fn sample<R: Rng>(
        &self,
        rng: &mut R,
        input_size: usize,
        num_labels: usize,
    ) -> Result<(ModelConfig, f64)> {
        fn pick<'a, T, R: Rng>(values: &'a [T], rng: &mut R, name: &str) -> Result<&'a T> {
            values
                .choose(rng)
                .with_context(|| format!("search space for {} is empty", name))
        }

        let config = ModelConfig::new(input_size)
            .with_num_labels(num_labels)
            .with_hidden_size_1(*pick(&self.hidden_size_1, rng, "hidden_size_1")?)
            .with_hidden_size_2(*pick(&self.hidden_size_2, rng, "hidden_size_2")?)
            .with_hidden_size_3(*pick(&self.hidden_size_3, rng, "hidden_size_3")?)
            .with_dropout(*pick(&self.dropout, rng, "dropout")?);
        let learning_rate = *pick(&self.learning_rate, rng, "learning_rate")?;

        Ok((config, learning_rate))
    }
}

/// Random search configuration
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Number of sampled configurations
    pub trials: usize,
    /// Seed of the sampling RNG
    pub seed: u64,
    /// Where `trials.json` and the best model are written, if anywhere
    pub project_dir: Option<PathBuf>,
    pub space: SearchSpace,
}

impl SearchConfig {
    pub fn new(trials: usize, seed: u64) -> Self {
        Self {
            trials,
            seed,
            project_dir: None,
            space: SearchSpace::default(),
        }
    }

    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }
}

/// One finished trial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial: usize,
    pub model_config: ModelConfig,
    pub learning_rate: f64,
    pub epochs: usize,
    /// Absent when no epoch produced a finite validation loss
    pub best_val_loss: Option<f64>,
    /// Mean validation ROC-AUC over labels where it is defined
    pub val_mean_roc_auc: Option<f64>,
    pub duration_secs: f64,
}

impl TrialRecord {
    fn objective(&self) -> f64 {
        self.val_mean_roc_auc.unwrap_or(f64::NEG_INFINITY)
    }

    /// Higher validation ROC-AUC wins; equal scores fall back to the lower loss
    pub fn beats(&self, other: &TrialRecord) -> bool {
        let (a, b) = (self.objective(), other.objective());
        let loss = |r: &TrialRecord| r.best_val_loss.unwrap_or(f64::INFINITY);
        a > b || (a == b && loss(self) < loss(other))
    }
}

/// Result of a search run
pub struct SearchOutcome {
    /// Best trained model
    pub best: Box<dyn Predictor>,
    /// Index into `trials` of the best model
    pub best_trial: usize,
    pub trials: Vec<TrialRecord>,
}

/// Random search over three-layer network architectures
pub struct ArchitectureSearch<B: AutodiffBackend> {
    training: TrainingConfig,
    config: SearchConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> ArchitectureSearch<B> {
    pub fn new(training: TrainingConfig, config: SearchConfig, device: B::Device) -> Self {
        Self {
            training,
            config,
            device,
        }
    }

    /// Train `trials` sampled architectures and keep the best one
    pub fn run(
        &self,
        dataset: &Dataset,
        loss: LossKind,
        activation: OutputActivation,
    ) -> Result<SearchOutcome> {
        if self.config.trials == 0 {
            bail!("search needs at least one trial");
        }
        let (time_points, n_features) = dataset.input_shape()?;
        let input_size = time_points * n_features;
        let num_labels = dataset.num_labels();
        info!(
            "Searching {} architectures on {} x {} inputs",
            self.config.trials, time_points, n_features
        );

        let mut rng = crate::utils::random::seeded_rng(self.config.seed);
        let mut trials: Vec<TrialRecord> = Vec::with_capacity(self.config.trials);
        let mut best: Option<(usize, TrainedModel<B::InnerBackend, _>)> = None;

        for trial in 0..self.config.trials {
            let start = Instant::now();
            let (model_config, learning_rate) =
                self.config.space.sample(&mut rng, input_size, num_labels)?;
            debug!("Trial {}: {:?}, lr {:.0e}", trial, model_config, learning_rate);

            let trainer = Trainer::<B>::new(
                TrainingConfig {
                    learning_rate,
                    ..self.training.clone()
                },
                self.device.clone(),
            );
            let model = init_three_layers::<B>(&model_config, &self.device);
            let out = trainer.fit(model, dataset, loss, activation)?;
            let trained =
                TrainedModel::<B::InnerBackend, _>::new(out.model, activation, self.device.clone());
            let val_auc = validation_auc(&trained, &dataset.val)?;

            let record = TrialRecord {
                trial,
                model_config,
                learning_rate,
                epochs: out.result.state.epoch,
                best_val_loss: finite(out.result.state.best_val_loss),
                val_mean_roc_auc: val_auc,
                duration_secs: start.elapsed().as_secs_f64(),
            };
            info!(
                "Trial {}/{}: val ROC-AUC {:?}, val loss {:?}",
                trial + 1,
                self.config.trials,
                record.val_mean_roc_auc,
                record.best_val_loss
            );

            let improved = match &best {
                None => true,
                Some((index, _)) => record.beats(&trials[*index]),
            };
            trials.push(record);
            if improved {
                best = Some((trial, trained));
            }
        }

        let (best_trial, best_model) = best.context("search finished without a model")?;
        info!(
            "Best trial {} (val ROC-AUC {:?})",
            best_trial, trials[best_trial].val_mean_roc_auc
        );

        if let Some(dir) = &self.config.project_dir {
            self.save_artifacts(dir, &trials, best_trial, &best_model)?;
        }

        Ok(SearchOutcome {
            best: Box::new(best_model),
            best_trial,
            trials,
        })
    }

    fn save_artifacts<M>(
        &self,
        dir: &std::path::Path,
        trials: &[TrialRecord],
        best_trial: usize,
        best: &TrainedModel<B::InnerBackend, M>,
    ) -> Result<()>
    where
        M: burn::module::Module<B::InnerBackend> + crate::model::SeriesClassifier<B::InnerBackend>,
    {
        crate::utils::ensure_dir(dir)?;

        let history = serde_json::to_string_pretty(trials).context("Failed to serialize trials")?;
        fs::write(dir.join("trials.json"), history).context("Failed to write trial history")?;

        let record = &trials[best_trial];
        let mut metadata = CheckpointMetadata::new(
            ModelFamily::ThreeLayers,
            record.model_config.clone(),
            best.activation(),
            record.learning_rate,
        );
        metadata.trial = Some(record.trial);
        metadata.val_loss = record.best_val_loss;
        metadata.val_mean_roc_auc = record.val_mean_roc_auc;

        let path = dir.join("best_model.mpk");
        ModelSaver::save::<B::InnerBackend, _, _>(best.model(), path, &metadata)
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Mean validation ROC-AUC over defined labels; `None` for a diverged model
fn validation_auc(predictor: &dyn Predictor, val: &[Sample]) -> Result<Option<f64>> {
    let (truth, predictions) = evaluate::predict_samples(predictor, val)?;
    match evaluate::score(&truth, &predictions) {
        Ok(scores) => Ok(finite(evaluate::nan_mean(&scores.roc_auc))),
        Err(e) if matches!(
            e.downcast_ref::<PipelineError>(),
            Some(PipelineError::NonFinitePredictions { .. })
        ) =>
        {
            warn!("Trial diverged: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Sample, SubjectSeries};
    use burn::backend::{Autodiff, NdArray};
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn sample(pid: u64) -> Sample {
        let positive = pid % 3 == 0;
        let mut labels = vec![0.0; 10];
        labels[0] = positive as u8 as f32;
        labels[1] = (pid % 2) as f32;
        Sample {
            series: SubjectSeries {
                pid,
                time_points: 2,
                n_features: 2,
                values: vec![if positive { 1.0 } else { -1.0 }, 0.2, 0.4, (pid % 2) as f32],
            },
            labels,
        }
    }

    fn record(val_auc: Option<f64>, best_val_loss: f64) -> TrialRecord {
        let best_val_loss = finite(best_val_loss);
        TrialRecord {
            trial: 0,
            model_config: ModelConfig::new(4),
            learning_rate: 1e-3,
            epochs: 1,
            best_val_loss,
            val_mean_roc_auc: val_auc,
            duration_secs: 0.0,
        }
    }

    #[test]
    fn test_trial_ordering() {
        assert!(record(Some(0.8), 0.9).beats(&record(Some(0.7), 0.1)));
        assert!(record(Some(0.7), 0.1).beats(&record(Some(0.7), 0.2)));
        assert!(record(Some(0.1), 0.9).beats(&record(None, 0.1)));
        assert!(!record(None, 0.5).beats(&record(Some(0.5), 0.9)));
        // a trial whose loss never became finite loses the tie
        assert!(record(Some(0.6), 0.9).beats(&record(Some(0.6), f64::INFINITY)));
    }

    #[test]
    fn test_diverged_trial_has_no_objective() {
        let val: Vec<Sample> = (0..6).map(sample).collect();
        let diverged = evaluate::ConstantPredictor { value: f32::NAN };
        assert_eq!(validation_auc(&diverged, &val).unwrap(), None);

        let flat = evaluate::ConstantPredictor { value: 0.3 };
        assert_eq!(validation_auc(&flat, &val).unwrap(), Some(0.5));
    }

    #[test]
    fn test_sampling_is_seeded() {
        let space = SearchSpace::default();
        let mut a = crate::utils::random::seeded_rng(3);
        let mut b = crate::utils::random::seeded_rng(3);
        for _ in 0..5 {
            let (ca, la) = space.sample(&mut a, 24, 10).unwrap();
            let (cb, lb) = space.sample(&mut b, 24, 10).unwrap();
            assert_eq!(ca.hidden_size_1, cb.hidden_size_1);
            assert_eq!(ca.dropout, cb.dropout);
            assert_eq!(la, lb);
            assert_eq!(ca.input_size, 24);
        }
    }

    #[test]
    fn test_search_writes_artifacts() {
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("subtask1_results");
        let dataset = Dataset {
            train: (0..18).map(sample).collect(),
            val: (18..27).map(sample).collect(),
            test: (27..30).map(sample).collect(),
        };
        let training = TrainingConfig {
            epochs: 2,
            batch_size: 6,
            log_frequency: 100,
            ..Default::default()
        };
        let search = ArchitectureSearch::<TestBackend>::new(
            training,
            SearchConfig::new(2, 10).with_project_dir(&project),
            Default::default(),
        );

        let outcome = search
            .run(&dataset, LossKind::BinaryCrossentropy, OutputActivation::Sigmoid)
            .unwrap();

        assert_eq!(outcome.trials.len(), 2);
        assert!(outcome.best_trial < 2);
        assert!(project.join("trials.json").exists());
        assert!(project.join("best_model.mpk").exists());

        let metadata = ModelSaver::load_metadata(project.join("best_model.mpk")).unwrap();
        assert_eq!(metadata.trial, Some(outcome.best_trial));

        let scores = evaluate::evaluate(outcome.best.as_ref(), &dataset.test).unwrap();
        assert_eq!(scores.roc_auc.len(), 10);
    }

    #[test]
    fn test_zero_trials_rejected() {
        let search = ArchitectureSearch::<TestBackend>::new(
            TrainingConfig::quick_test(),
            SearchConfig::new(0, 1),
            Default::default(),
        );
        assert!(search
            .run(&Dataset::default(), LossKind::Dice, OutputActivation::Sigmoid)
            .is_err());
    }
}
