/// Learning rate schedulers
#[derive(Debug, Clone)]
pub enum LearningRateScheduler {
    /// Constant learning rate
    Constant { lr: f64 },
    /// Reduce on plateau of a monitored metric (lower is better)
    ReduceOnPlateau {
        lr: f64,
        factor: f64,
        patience: usize,
        min_lr: f64,
        min_delta: f64,
        num_bad_epochs: usize,
        best: f64,
    },
}

impl LearningRateScheduler {
    /// Create constant scheduler
    pub fn constant(lr: f64) -> Self {
        Self::Constant { lr }
    }

    /// Create reduce on plateau scheduler
    pub fn reduce_on_plateau(lr: f64, factor: f64, patience: usize, min_lr: f64) -> Self {
        Self::ReduceOnPlateau {
            lr,
            factor,
            patience,
            min_lr,
            min_delta: 1e-4,
            num_bad_epochs: 0,
            best: f64::INFINITY,
        }
    }

    /// Set the smallest decrease that counts as an improvement
    pub fn with_min_delta(mut self, delta: f64) -> Self {
        if let Self::ReduceOnPlateau { min_delta, .. } = &mut self {
            *min_delta = delta;
        }
        self
    }

    /// Get current learning rate
    pub fn get_lr(&self) -> f64 {
        match *self {
            Self::Constant { lr } => lr,
            Self::ReduceOnPlateau { lr, .. } => lr,
        }
    }

    /// Feed the epoch's monitored value; returns the learning rate for the next epoch
    pub fn step_with_metric(&mut self, metric: f64) -> f64 {
        match self {
            Self::Constant { lr } => *lr,
            Self::ReduceOnPlateau {
                lr,
                factor,
                patience,
                min_lr,
                min_delta,
                num_bad_epochs,
                best,
            } => {
                if metric < *best - *min_delta {
                    *best = metric;
                    *num_bad_epochs = 0;
                } else {
                    *num_bad_epochs += 1;
                    if *num_bad_epochs >= *patience && *lr > *min_lr {
                        let new_lr = (*lr * *factor).max(*min_lr);
                        tracing::debug!("Reducing learning rate {:.2e} -> {:.2e}", lr, new_lr);
                        *lr = new_lr;
                        *num_bad_epochs = 0;
                    }
                }

                *lr
            }
        }
    }
}

impl Default for LearningRateScheduler {
    fn default() -> Self {
        Self::constant(0.001)
    }
}
