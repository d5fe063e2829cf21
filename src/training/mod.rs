pub mod callbacks;
pub mod scheduler;
pub mod search;
pub mod trainer;

use serde::{Deserialize, Serialize};

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Maximum number of training epochs
    pub epochs: usize,
    /// Batch size for training and validation
    pub batch_size: usize,
    /// Initial learning rate
    pub learning_rate: f64,
    /// Epochs without validation-loss improvement before stopping (0 = disabled)
    pub early_stopping_patience: usize,
    /// Smallest validation-loss decrease that counts as an improvement
    pub min_delta: f64,
    /// Epochs without improvement before the learning rate is reduced (0 = constant)
    pub lr_patience: usize,
    /// Factor applied to the learning rate on a plateau
    pub lr_factor: f64,
    /// Learning rate floor
    pub min_lr: f64,
    /// Random seed for batch shuffling
    pub seed: u64,
    /// Epoch summary frequency (epochs)
    pub log_frequency: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 1000,
            batch_size: 2048,
            learning_rate: 0.001,
            early_stopping_patience: 10,
            min_delta: 1e-4,
            lr_patience: 5,
            lr_factor: 0.1,
            min_lr: 1e-6,
            seed: 10,
            log_frequency: 10,
        }
    }
}

impl TrainingConfig {
    /// Create configuration for quick testing
    pub fn quick_test() -> Self {
        Self {
            epochs: 5,
            batch_size: 16,
            learning_rate: 0.01,
            log_frequency: 1,
            ..Default::default()
        }
    }

    /// Number of optimizer steps per epoch
    pub fn steps_per_epoch(&self, n_train: usize) -> usize {
        (n_train / self.batch_size.max(1)).max(1)
    }

    /// Number of validation batches per epoch
    pub fn validation_steps(&self, n_val: usize) -> usize {
        n_val.div_ceil(self.batch_size.max(1)).max(1)
    }
}

/// Losses and learning rate observed in one epoch
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Mean training loss over the epoch's steps
    pub train_loss: f64,
    /// Mean validation loss
    pub val_loss: f64,
    /// Learning rate used during the epoch
    pub learning_rate: f64,
}

/// Training state
#[derive(Debug, Clone)]
pub struct TrainingState {
    /// Completed epochs
    pub epoch: usize,
    /// Current global step
    pub global_step: usize,
    /// Lowest validation loss seen so far
    pub best_val_loss: f64,
    /// Epoch (1-based) of the lowest validation loss
    pub best_epoch: usize,
    /// Training loss history
    pub train_loss_history: Vec<f64>,
    /// Validation loss history
    pub val_loss_history: Vec<f64>,
    /// Learning rate history
    pub lr_history: Vec<f64>,
}

impl TrainingState {
    /// Create new training state
    pub fn new() -> Self {
        Self {
            epoch: 0,
            global_step: 0,
            best_val_loss: f64::INFINITY,
            best_epoch: 0,
            train_loss_history: Vec::new(),
            val_loss_history: Vec::new(),
            lr_history: Vec::new(),
        }
    }

    /// Update after epoch
    pub fn update_epoch(&mut self, metrics: &EpochMetrics) {
        self.epoch += 1;
        self.train_loss_history.push(metrics.train_loss);
        self.val_loss_history.push(metrics.val_loss);
        self.lr_history.push(metrics.learning_rate);

        if metrics.val_loss < self.best_val_loss {
            self.best_val_loss = metrics.val_loss;
            self.best_epoch = self.epoch;
        }
    }
}

impl Default for TrainingState {
    fn default() -> Self {
        Self::new()
    }
}

/// Training result
#[derive(Debug, Clone)]
pub struct TrainingResult {
    /// Final training state
    pub state: TrainingState,
    /// Whether early stopping ended the run before `epochs`
    pub stopped_early: bool,
    /// Training duration in seconds
    pub duration_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_counts() {
        let config = TrainingConfig {
            batch_size: 2048,
            ..Default::default()
        };
        // fewer samples than one batch still trains one step
        assert_eq!(config.steps_per_epoch(60), 1);
        assert_eq!(config.steps_per_epoch(5000), 2);
        assert_eq!(config.validation_steps(28), 1);
        assert_eq!(config.validation_steps(4097), 3);
    }

    #[test]
    fn test_state_tracks_best_epoch() {
        let mut state = TrainingState::new();
        for val_loss in [0.9, 0.5, 0.7] {
            state.update_epoch(&EpochMetrics {
                train_loss: 1.0,
                val_loss,
                learning_rate: 1e-3,
            });
        }
        assert_eq!(state.epoch, 3);
        assert_eq!(state.best_epoch, 2);
        assert_eq!(state.best_val_loss, 0.5);
    }
}
