use crate::data::batching::{Batch, BatchSource};
use crate::data::Dataset;
use crate::error::PipelineError;
use crate::evaluate::Predictor;
use crate::model::architecture::{init_svm, init_three_layers};
use crate::model::loss::LossKind;
use crate::model::{
    input_tensor, target_tensor, ModelConfig, ModelFamily, OutputActivation, SeriesClassifier,
};
use crate::training::callbacks::{
    CallbackManager, EarlyStoppingCallback, ProgressLoggerCallback, TimerCallback,
    TrainingCallback,
};
use crate::training::scheduler::LearningRateScheduler;
use crate::training::{EpochMetrics, TrainingConfig, TrainingResult, TrainingState};
use anyhow::{anyhow, Context, Result};
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use std::marker::PhantomData;
use std::time::Instant;
use tracing::{debug, info};

/// Trained model with its output activation, ready for inference
pub struct TrainedModel<B: Backend, M> {
    model: M,
    activation: OutputActivation,
    device: B::Device,
    _backend: PhantomData<B>,
}

impl<B: Backend, M: SeriesClassifier<B>> TrainedModel<B, M> {
    pub fn new(model: M, activation: OutputActivation, device: B::Device) -> Self {
        Self {
            model,
            activation,
            device,
            _backend: PhantomData,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn activation(&self) -> OutputActivation {
        self.activation
    }
}

impl<B: Backend, M: SeriesClassifier<B>> Predictor for TrainedModel<B, M> {
    fn predict(&self, batch: &Batch) -> Result<Vec<Vec<f32>>> {
        let inputs = input_tensor::<B>(batch, &self.device);
        let probs = self.activation.apply(self.model.forward(inputs));
        let [_, width] = probs.dims();

        let values = probs
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow!("Failed to read predictions: {:?}", e))?;

        Ok(values.chunks(width.max(1)).map(|row| row.to_vec()).collect())
    }
}

/// Output of [`Trainer::fit`]: the restored best weights and the run summary
pub struct FitOutput<M> {
    pub model: M,
    pub result: TrainingResult,
}

/// Trainer for the series classifiers
pub struct Trainer<B: AutodiffBackend> {
    /// Training configuration
    config: TrainingConfig,
    /// Device
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Create new trainer
    pub fn new(config: TrainingConfig, device: B::Device) -> Self {
        Self { config, device }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Build the named architecture for the dataset's input shape and fit it
    pub fn train(
        &self,
        family: ModelFamily,
        dataset: &Dataset,
        loss: LossKind,
        activation: OutputActivation,
    ) -> Result<(Box<dyn Predictor>, TrainingResult)> {
        let (time_points, n_features) = dataset.input_shape()?;
        let model_config = ModelConfig::for_series(time_points, n_features, dataset.num_labels());
        info!(
            "Training {} on {} x {} inputs ({} loss, {} output)",
            family, time_points, n_features, loss, activation
        );

        match family {
            ModelFamily::ThreeLayers => {
                let model = init_three_layers::<B>(&model_config, &self.device);
                let out = self.fit(model, dataset, loss, activation)?;
                let device = self.device.clone();
                let trained =
                    TrainedModel::<B::InnerBackend, _>::new(out.model, activation, device);
                Ok((Box::new(trained), out.result))
            }
            ModelFamily::Svm => {
                let model = init_svm::<B>(&model_config, &self.device);
                let out = self.fit(model, dataset, loss, activation)?;
                let device = self.device.clone();
                let trained =
                    TrainedModel::<B::InnerBackend, _>::new(out.model, activation, device);
                Ok((Box::new(trained), out.result))
            }
        }
    }

    /// Fit `model` with Adam, early stopping and reduce-on-plateau.
    ///
    /// Both policies monitor the validation loss. The returned model carries
    /// the weights of the best validation epoch.
    pub fn fit<M>(
        &self,
        model: M,
        dataset: &Dataset,
        loss: LossKind,
        activation: OutputActivation,
    ) -> Result<FitOutput<M::InnerModule>>
    where
        M: AutodiffModule<B> + SeriesClassifier<B>,
        M::InnerModule: SeriesClassifier<B::InnerBackend>,
    {
        if dataset.train.is_empty() {
            return Err(PipelineError::EmptySplit("train").into());
        }
        if dataset.val.is_empty() {
            return Err(PipelineError::EmptySplit("val").into());
        }

        let start_time = Instant::now();
        let config = &self.config;
        let steps_per_epoch = config.steps_per_epoch(dataset.train.len());
        let validation_steps = config.validation_steps(dataset.val.len());
        debug!(
            "{} steps per epoch, {} validation steps, batch size {}",
            steps_per_epoch, validation_steps, config.batch_size
        );

        let mut train_source =
            BatchSource::repeating(&dataset.train, config.batch_size, config.seed);
        let mut val_source =
            BatchSource::repeating(&dataset.val, config.batch_size, config.seed.wrapping_add(1));

        let mut optim = AdamConfig::new().init::<B, M>();
        let mut scheduler = if config.lr_patience > 0 {
            LearningRateScheduler::reduce_on_plateau(
                config.learning_rate,
                config.lr_factor,
                config.lr_patience,
                config.min_lr,
            )
            .with_min_delta(config.min_delta)
        } else {
            LearningRateScheduler::constant(config.learning_rate)
        };
        let mut early_stopping =
            EarlyStoppingCallback::new(config.early_stopping_patience, config.min_delta);
        let mut callbacks = CallbackManager::new();
        callbacks.add_callback(ProgressLoggerCallback::new(config.log_frequency));
        callbacks.add_callback(TimerCallback::new());

        let mut state = TrainingState::new();
        let mut model = model;
        let mut best_model: Option<M> = None;
        let mut stopped_early = false;

        callbacks.on_train_begin();
        for epoch in 0..config.epochs {
            callbacks.on_epoch_begin(epoch);
            let lr = scheduler.get_lr();

            let mut train_loss = 0.0;
            for _ in 0..steps_per_epoch {
                let batch = train_source.next().context("training source ran dry")?;
                let inputs = input_tensor::<B>(&batch, &self.device);
                let targets = target_tensor::<B>(&batch, &self.device);

                let probs = activation.apply(model.forward(inputs));
                let batch_loss = loss.forward(probs, targets);
                train_loss += batch_loss.clone().into_scalar().elem::<f64>();

                let grads = batch_loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optim.step(lr, model, grads);
                state.global_step += 1;
            }

            let val_loss = self.validation_loss(
                &model.valid(),
                &mut val_source,
                validation_steps,
                loss,
                activation,
            )?;
            let metrics = EpochMetrics {
                train_loss: train_loss / steps_per_epoch as f64,
                val_loss,
                learning_rate: lr,
            };
            state.update_epoch(&metrics);

            early_stopping.on_epoch_end(epoch, &state, &metrics);
            if early_stopping.improved() {
                best_model = Some(model.clone());
            }
            callbacks.on_epoch_end(epoch, &state, &metrics);
            scheduler.step_with_metric(val_loss);

            if early_stopping.should_stop() {
                info!(
                    "Early stopping at epoch {}, restoring weights of epoch {}",
                    epoch + 1,
                    state.best_epoch
                );
                stopped_early = true;
                break;
            }
        }
        callbacks.on_train_end(&state);

        let model = best_model.unwrap_or(model).valid();
        Ok(FitOutput {
            model,
            result: TrainingResult {
                state,
                stopped_early,
                duration_secs: start_time.elapsed().as_secs_f64(),
            },
        })
    }

    /// Sample-weighted mean loss over `steps` validation batches
    fn validation_loss<M: SeriesClassifier<B::InnerBackend>>(
        &self,
        model: &M,
        source: &mut BatchSource<'_>,
        steps: usize,
        loss: LossKind,
        activation: OutputActivation,
    ) -> Result<f64> {
        let mut total = 0.0;
        let mut seen = 0usize;

        for _ in 0..steps {
            let batch = source.next().context("validation source ran dry")?;
            let inputs = input_tensor::<B::InnerBackend>(&batch, &self.device);
            let targets = target_tensor::<B::InnerBackend>(&batch, &self.device);

            let probs = activation.apply(model.forward(inputs));
            let batch_loss = loss.forward(probs, targets).into_scalar().elem::<f64>();
            total += batch_loss * batch.size as f64;
            seen += batch.size;
        }

        Ok(total / seen.max(1) as f64)
    }
}
