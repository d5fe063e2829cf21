use crate::data::imputation::{fill_nearest_in_time, NanHandler, NanOutcome};
use crate::data::loader::DataLoader;
use crate::data::preprocessing::{assemble_subjects, attach_labels, split_dataset};
use crate::data::{FeatureTable, LabelTable};
use crate::evaluate::{self, Predictor};
use crate::experiment::grid::Params;
use crate::experiment::memoizer::{Pipeline, RunOutcome};
use crate::experiment::ExperimentConfig;
use crate::training::search::{ArchitectureSearch, SearchConfig};
use crate::training::trainer::Trainer;
use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use std::path::Path;
use tracing::info;

/// Clinical time-series pipeline: NaN handling, scaling, assembly,
/// splitting, training and evaluation of one grid point.
///
/// Labels and the base-filled feature table are loaded once and shared by
/// every configuration.
pub struct ClinicalPipeline<B: AutodiffBackend> {
    config: ExperimentConfig,
    features: FeatureTable,
    labels: LabelTable,
    device: B::Device,
}

impl<B: AutodiffBackend> ClinicalPipeline<B> {
    /// Load both tables and run (or reuse) the base nearest-in-time fill
    pub fn prepare<P: AsRef<Path>, Q: AsRef<Path>>(
        config: ExperimentConfig,
        features_path: P,
        labels_path: Q,
        device: B::Device,
    ) -> Result<Self> {
        let loader = DataLoader::new();

        let mut labels = loader.load_labels(labels_path)?;
        labels.sort_by_pid();
        if let Some(n) = config.num_subjects {
            labels.truncate(n);
        }
        let last_pid = labels.last_pid().context("label table is empty")?;

        let base_path = config
            .cache_dir
            .join(format!("xtrain_imputed_nn_{}.csv", config.subject_tag()));
        let features = if base_path.is_file() {
            info!("Reusing base-filled features {:?}", base_path);
            loader.load_features(&base_path)?
        } else {
            let mut raw = loader.load_features(features_path)?;
            raw.sort_by_pid();
            raw.retain_up_to(last_pid);
            info!(
                "Base fill of {} missing values over {} subjects",
                raw.missing_count(),
                raw.subject_count()
            );
            let filled = fill_nearest_in_time(&raw);
            loader.write_features(&filled, &base_path)?;
            filled
        };

        Ok(Self {
            config,
            features,
            labels,
            device,
        })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    fn train(&self, params: &Params, dataset: &crate::data::Dataset) -> Result<Box<dyn Predictor>> {
        let training = self.config.training_config();
        if params.keras_tuner {
            let search = SearchConfig::new(self.config.trials, self.config.seed)
                .with_project_dir(self.config.project_dir());
            let outcome = ArchitectureSearch::<B>::new(training, search, self.device.clone()).run(
                dataset,
                params.loss,
                params.output_layer,
            )?;
            Ok(outcome.best)
        } else {
            let (predictor, _) = Trainer::<B>::new(training, self.device.clone()).train(
                params.model,
                dataset,
                params.loss,
                params.output_layer,
            )?;
            Ok(predictor)
        }
    }
}

impl<B: AutodiffBackend> Pipeline for ClinicalPipeline<B> {
    fn run(&mut self, params: &Params) -> Result<RunOutcome> {
        let handler = NanHandler::new(params.nan_handling)
            .with_cache(&self.config.cache_dir, &self.config.subject_tag());
        let table = match handler.handle(&self.features)? {
            NanOutcome::Handled(table) => table,
            NanOutcome::Unavailable(reason) => return Ok(RunOutcome::Unavailable(reason)),
        };
        let table = params.standardizer.apply(&table);

        let series = assemble_subjects(&table)?;
        let samples = attach_labels(series, &self.labels)?;
        let dataset = split_dataset(samples, &self.config.split_config())?;
        info!(
            "Split {} subjects into {} train, {} val, {} test",
            dataset.total_samples(),
            dataset.train.len(),
            dataset.val.len(),
            dataset.test.len()
        );

        let predictor = self.train(params, &dataset)?;
        let scores = evaluate::evaluate(predictor.as_ref(), &dataset.test)?;
        Ok(RunOutcome::Scored(scores))
    }
}
