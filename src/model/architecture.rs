use crate::model::{ModelConfig, SeriesClassifier};
use burn::nn::*;
use burn::prelude::*;
use burn::tensor::activation::relu;

/// Dense network with three hidden layers over the flattened series
#[derive(Module, Debug)]
pub struct ThreeLayerNet<B: Backend> {
    /// First fully connected layer
    fc1: Linear<B>,
    /// Second fully connected layer
    fc2: Linear<B>,
    /// Third fully connected layer
    fc3: Linear<B>,
    /// Output layer
    output: Linear<B>,
    /// Dropout layer
    dropout: Dropout,
}

impl<B: Backend> SeriesClassifier<B> for ThreeLayerNet<B> {
    fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        let x = input.flatten::<2>(1, 2);

        // First block
        let x = self.fc1.forward(x);
        let x = relu(x);
        let x = self.dropout.forward(x);

        // Second block
        let x = self.fc2.forward(x);
        let x = relu(x);
        let x = self.dropout.forward(x);

        // Third block
        let x = self.fc3.forward(x);
        let x = relu(x);
        let x = self.dropout.forward(x);

        self.output.forward(x)
    }
}

/// Single linear decision layer, one score per label
#[derive(Module, Debug)]
pub struct LinearSvm<B: Backend> {
    decision: Linear<B>,
}

impl<B: Backend> SeriesClassifier<B> for LinearSvm<B> {
    fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        self.decision.forward(input.flatten::<2>(1, 2))
    }
}

/// Initialize the three-layer network from configuration
pub fn init_three_layers<B: Backend>(config: &ModelConfig, device: &B::Device) -> ThreeLayerNet<B> {
    let fc1 = LinearConfig::new(config.input_size, config.hidden_size_1)
        .with_bias(true)
        .init(device);

    let fc2 = LinearConfig::new(config.hidden_size_1, config.hidden_size_2)
        .with_bias(true)
        .init(device);

    let fc3 = LinearConfig::new(config.hidden_size_2, config.hidden_size_3)
        .with_bias(true)
        .init(device);

    let output = LinearConfig::new(config.hidden_size_3, config.num_labels)
        .with_bias(true)
        .init(device);

    let dropout = DropoutConfig::new(config.dropout).init();

    ThreeLayerNet {
        fc1,
        fc2,
        fc3,
        output,
        dropout,
    }
}

/// Initialize the linear model; hidden sizes and dropout are ignored
pub fn init_svm<B: Backend>(config: &ModelConfig, device: &B::Device) -> LinearSvm<B> {
    LinearSvm {
        decision: LinearConfig::new(config.input_size, config.num_labels)
            .with_bias(true)
            .init(device),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_three_layers_forward() {
        let device = <TestBackend as Backend>::Device::default();
        let config = ModelConfig::for_series(12, 5, 10);
        let model = init_three_layers::<TestBackend>(&config, &device);

        // batch of 2 subjects, 12 hours, 5 features
        let input = Tensor::<TestBackend, 3>::zeros([2, 12, 5], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 10]);
    }

    #[test]
    fn test_svm_forward() {
        let device = <TestBackend as Backend>::Device::default();
        let config = ModelConfig::for_series(12, 5, 10);
        let model = init_svm::<TestBackend>(&config, &device);

        let input = Tensor::<TestBackend, 3>::ones([3, 12, 5], &device);
        assert_eq!(model.forward(input).dims(), [3, 10]);
    }
}
