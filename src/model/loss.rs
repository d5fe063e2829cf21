use crate::error::PipelineError;
use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// Probabilities are clamped into `[EPSILON, 1 - EPSILON]` before taking logs
const EPSILON: f64 = 1e-7;

/// Smoothing term of the soft Dice loss
const DICE_SMOOTH: f64 = 1.0;

/// Training losses selectable from the grid.
///
/// All losses take activated probabilities `[batch, num_labels]` and binary
/// targets of the same shape, and reduce to a single-element tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    BinaryCrossentropy,
    /// Soft Dice loss over the whole batch
    Dice,
    /// Hinge loss on probabilities mapped to `[-1, 1]`
    Hinge,
}

impl LossKind {
    pub const ALL: [LossKind; 3] = [LossKind::BinaryCrossentropy, LossKind::Dice, LossKind::Hinge];

    pub fn as_str(&self) -> &'static str {
        match self {
            LossKind::BinaryCrossentropy => "binary_crossentropy",
            LossKind::Dice => "dice",
            LossKind::Hinge => "hinge",
        }
    }

    pub fn parse(value: &str) -> Result<Self, PipelineError> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str() == value)
            .ok_or_else(|| PipelineError::InvalidOption {
                option: "loss".to_string(),
                value: value.to_string(),
            })
    }

    /// Compute the loss
    ///
    /// # Arguments
    /// * `probs` - Activated model output [batch_size, num_labels]
    /// * `targets` - Binary labels [batch_size, num_labels]
    pub fn forward<B: Backend>(&self, probs: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
        match self {
            LossKind::BinaryCrossentropy => {
                let p = probs.clamp(EPSILON, 1.0 - EPSILON);
                let positive = targets.clone() * p.clone().log();
                let negative = targets.neg().add_scalar(1.0) * p.neg().add_scalar(1.0).log();
                (positive + negative).mean().neg()
            }
            LossKind::Dice => {
                let intersection = (probs.clone() * targets.clone()).sum();
                let total = targets.sum() + probs.sum();
                let coefficient = intersection
                    .mul_scalar(2.0)
                    .add_scalar(DICE_SMOOTH)
                    .div(total.add_scalar(DICE_SMOOTH));
                coefficient.neg().add_scalar(1.0)
            }
            LossKind::Hinge => {
                let signs = targets.mul_scalar(2.0).sub_scalar(1.0);
                let margins = probs.mul_scalar(2.0).sub_scalar(1.0);
                (signs * margins).neg().add_scalar(1.0).clamp_min(0.0).mean()
            }
        }
    }
}

impl std::fmt::Display for LossKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
