use crate::training::{EpochMetrics, TrainingState};
use std::time::{Duration, Instant};

/// Hook into the epoch loop of [`crate::training::trainer::Trainer`].
///
/// Every hook has an empty default.
#[allow(unused_variables)]
pub trait TrainingCallback: Send + Sync {
    fn on_train_begin(&mut self) {}

    fn on_train_end(&mut self, state: &TrainingState) {}

    fn on_epoch_begin(&mut self, epoch: usize) {}

    /// `metrics` holds the losses of the epoch that just finished
    fn on_epoch_end(&mut self, epoch: usize, state: &TrainingState, metrics: &EpochMetrics) {}
}

/// Ordered set of callbacks driven together
pub struct CallbackManager {
    callbacks: Vec<Box<dyn TrainingCallback>>,
}

impl CallbackManager {
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    pub fn add_callback<C: TrainingCallback + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn on_train_begin(&mut self) {
        for callback in &mut self.callbacks {
            callback.on_train_begin();
        }
    }

    pub fn on_train_end(&mut self, state: &TrainingState) {
        for callback in &mut self.callbacks {
            callback.on_train_end(state);
        }
    }

    pub fn on_epoch_begin(&mut self, epoch: usize) {
        for callback in &mut self.callbacks {
            callback.on_epoch_begin(epoch);
        }
    }

    pub fn on_epoch_end(&mut self, epoch: usize, state: &TrainingState, metrics: &EpochMetrics) {
        for callback in &mut self.callbacks {
            callback.on_epoch_end(epoch, state, metrics);
        }
    }
}

impl Default for CallbackManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Early stopping on validation loss.
///
/// The trainer asks [`EarlyStoppingCallback::improved`] after every epoch to
/// decide whether the current weights become the ones restored at the end.
pub struct EarlyStoppingCallback {
    patience: usize,
    min_delta: f64,
    best_metric: f64,
    counter: usize,
    improved: bool,
    should_stop: bool,
}

impl EarlyStoppingCallback {
    /// Create new early stopping callback; `patience == 0` never stops
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            best_metric: f64::INFINITY,
            counter: 0,
            improved: false,
            should_stop: false,
        }
    }

    /// Patience ran out
    pub fn should_stop(&self) -> bool {
        self.should_stop
    }

    /// Whether the last epoch set a new best
    pub fn improved(&self) -> bool {
        self.improved
    }

    /// Best monitored value so far
    pub fn best_metric(&self) -> f64 {
        self.best_metric
    }
}

impl TrainingCallback for EarlyStoppingCallback {
    fn on_epoch_end(&mut self, _epoch: usize, _state: &TrainingState, metrics: &EpochMetrics) {
        self.improved = metrics.val_loss < self.best_metric - self.min_delta;

        if self.improved {
            self.best_metric = metrics.val_loss;
            self.counter = 0;
        } else {
            self.counter += 1;
            if self.patience > 0 && self.counter >= self.patience {
                self.should_stop = true;
            }
        }
    }
}

/// Logs losses every `log_frequency` epochs
pub struct ProgressLoggerCallback {
    log_frequency: usize,
}

impl ProgressLoggerCallback {
    pub fn new(log_frequency: usize) -> Self {
        Self {
            log_frequency: log_frequency.max(1),
        }
    }
}

impl TrainingCallback for ProgressLoggerCallback {
    fn on_epoch_end(&mut self, epoch: usize, _state: &TrainingState, metrics: &EpochMetrics) {
        if (epoch + 1) % self.log_frequency == 0 {
            tracing::info!(
                "Epoch {} - Loss: {:.4}, Val loss: {:.4}, LR: {:.1e}",
                epoch + 1,
                metrics.train_loss,
                metrics.val_loss,
                metrics.learning_rate
            );
        } else {
            tracing::debug!(
                "Epoch {} - Loss: {:.4}, Val loss: {:.4}",
                epoch + 1,
                metrics.train_loss,
                metrics.val_loss
            );
        }
    }
}

/// Wall-clock time per epoch and for the whole fit
pub struct TimerCallback {
    start_time: Option<Instant>,
    epoch_start: Option<Instant>,
    epoch_times: Vec<Duration>,
}

impl TimerCallback {
    pub fn new() -> Self {
        Self {
            start_time: None,
            epoch_start: None,
            epoch_times: Vec::new(),
        }
    }

    pub fn average_epoch_time(&self) -> Option<Duration> {
        if self.epoch_times.is_empty() {
            None
        } else {
            let total: Duration = self.epoch_times.iter().sum();
            Some(total / self.epoch_times.len() as u32)
        }
    }
}

impl Default for TimerCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingCallback for TimerCallback {
    fn on_train_begin(&mut self) {
        self.start_time = Some(Instant::now());
        tracing::debug!("Training started");
    }

    fn on_epoch_begin(&mut self, _epoch: usize) {
        self.epoch_start = Some(Instant::now());
    }

    fn on_epoch_end(&mut self, _epoch: usize, _state: &TrainingState, _metrics: &EpochMetrics) {
        if let Some(start) = self.epoch_start.take() {
            self.epoch_times.push(start.elapsed());
        }
    }

    fn on_train_end(&mut self, state: &TrainingState) {
        if let Some(start) = self.start_time {
            tracing::info!(
                "Training completed in {} ({} epochs, {:.2?}/epoch, best epoch {})",
                crate::utils::format_duration(start.elapsed().as_secs_f64()),
                state.epoch,
                self.average_epoch_time().unwrap_or_default(),
                state.best_epoch
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(val_loss: f64) -> EpochMetrics {
        EpochMetrics {
            train_loss: 1.0,
            val_loss,
            learning_rate: 1e-3,
        }
    }

    #[test]
    fn test_early_stopping() {
        let mut callback = EarlyStoppingCallback::new(2, 1e-4);
        let state = TrainingState::new();

        // First epoch - improvement over infinity
        callback.on_epoch_end(0, &state, &metrics(1.0));
        assert!(callback.improved());
        assert!(!callback.should_stop());

        // Second epoch - worse loss
        callback.on_epoch_end(1, &state, &metrics(1.1));
        assert!(!callback.improved());
        assert!(!callback.should_stop());

        // Third epoch - below min_delta still counts as no improvement
        callback.on_epoch_end(2, &state, &metrics(0.99995));
        assert!(callback.should_stop());
        assert_eq!(callback.best_metric(), 1.0);
    }

    #[test]
    fn test_zero_patience_never_stops() {
        let mut callback = EarlyStoppingCallback::new(0, 1e-4);
        let state = TrainingState::new();
        for epoch in 0..20 {
            callback.on_epoch_end(epoch, &state, &metrics(1.0));
        }
        assert!(!callback.should_stop());
    }

    #[test]
    fn test_callback_manager() {
        let mut manager = CallbackManager::new();
        manager.add_callback(ProgressLoggerCallback::new(1));
        manager.add_callback(TimerCallback::new());

        manager.on_train_begin();
        manager.on_epoch_begin(0);
        manager.on_epoch_end(0, &TrainingState::new(), &metrics(0.5));
        manager.on_train_end(&TrainingState::new());
    }
}
