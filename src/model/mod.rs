pub mod architecture;
pub mod checkpoint;
pub mod loss;

use crate::data::batching::Batch;
use crate::error::PipelineError;
use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use serde::{Deserialize, Serialize};

/// Model configuration
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Flattened input width (time points x features)
    pub input_size: usize,

    /// Number of predicted labels
    #[config(default = "10")]
    pub num_labels: usize,

    /// Number of hidden units in first layer
    #[config(default = "128")]
    pub hidden_size_1: usize,

    /// Number of hidden units in second layer
    #[config(default = "64")]
    pub hidden_size_2: usize,

    /// Number of hidden units in third layer
    #[config(default = "32")]
    pub hidden_size_3: usize,

    /// Dropout rate
    #[config(default = "0.2")]
    pub dropout: f64,
}

impl ModelConfig {
    /// Configuration for a `(time_points, n_features)` series input
    pub fn for_series(time_points: usize, n_features: usize, num_labels: usize) -> Self {
        Self::new(time_points * n_features).with_num_labels(num_labels)
    }
}

/// Named architectures selectable from the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// Three hidden dense layers
    ThreeLayers,
    /// Linear decision function
    Svm,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 2] = [ModelFamily::ThreeLayers, ModelFamily::Svm];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::ThreeLayers => "threelayers",
            ModelFamily::Svm => "svm",
        }
    }

    pub fn parse(value: &str) -> Result<Self, PipelineError> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == value)
            .ok_or_else(|| PipelineError::InvalidOption {
                option: "model".to_string(),
                value: value.to_string(),
            })
    }
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activation mapping raw scores to per-label probabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputActivation {
    Sigmoid,
    /// Piecewise-linear sigmoid: `clamp(0.2 x + 0.5, 0, 1)`
    HardSigmoid,
}

impl OutputActivation {
    pub const ALL: [OutputActivation; 2] =
        [OutputActivation::Sigmoid, OutputActivation::HardSigmoid];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputActivation::Sigmoid => "sigmoid",
            OutputActivation::HardSigmoid => "hard_sigmoid",
        }
    }

    pub fn parse(value: &str) -> Result<Self, PipelineError> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == value)
            .ok_or_else(|| PipelineError::InvalidOption {
                option: "output_layer".to_string(),
                value: value.to_string(),
            })
    }

    pub fn apply<B: Backend, const D: usize>(&self, scores: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            OutputActivation::Sigmoid => sigmoid(scores),
            OutputActivation::HardSigmoid => scores.mul_scalar(0.2).add_scalar(0.5).clamp(0.0, 1.0),
        }
    }
}

impl std::fmt::Display for OutputActivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model mapping a batch of subject series to raw per-label scores
pub trait SeriesClassifier<B: Backend> {
    /// `[batch, time, features]` to `[batch, num_labels]`, before activation
    fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2>;
}

/// Batch inputs as a `[batch, time, features]` tensor
pub fn input_tensor<B: Backend>(batch: &Batch, device: &B::Device) -> Tensor<B, 3> {
    let data = TensorData::new(
        batch.inputs.clone(),
        [batch.size, batch.time_points, batch.n_features],
    );
    Tensor::from_data(data, device)
}

/// Batch labels as a `[batch, num_labels]` float tensor
pub fn target_tensor<B: Backend>(batch: &Batch, device: &B::Device) -> Tensor<B, 2> {
    let data = TensorData::new(batch.labels.clone(), [batch.size, batch.num_labels]);
    Tensor::from_data(data, device)
}
