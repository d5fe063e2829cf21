use crate::data::Sample;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

/// Mini-batch of flattened subject series and their labels
#[derive(Debug, Clone)]
pub struct Batch {
    /// `size * time_points * n_features` values, row-major
    pub inputs: Vec<f32>,
    /// `size * num_labels` values, row-major
    pub labels: Vec<f32>,
    pub size: usize,
    pub time_points: usize,
    pub n_features: usize,
    pub num_labels: usize,
}

impl Batch {
    /// Stack samples; all must share one shape
    pub fn from_samples(samples: &[&Sample]) -> Self {
        let (time_points, n_features) = samples
            .first()
            .map(|s| s.series.shape())
            .unwrap_or((0, 0));
        let num_labels = samples.first().map(|s| s.labels.len()).unwrap_or(0);

        let mut inputs = Vec::with_capacity(samples.len() * time_points * n_features);
        let mut labels = Vec::with_capacity(samples.len() * num_labels);
        for sample in samples {
            inputs.extend_from_slice(&sample.series.values);
            labels.extend_from_slice(&sample.labels);
        }

        Self {
            inputs,
            labels,
            size: samples.len(),
            time_points,
            n_features,
            num_labels,
        }
    }

    /// Label rows of this batch
    pub fn label_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.labels.chunks(self.num_labels.max(1))
    }
}

/// Batched view over a split.
///
/// Training and validation sources reshuffle on every pass and never run
/// dry; the caller bounds them with a step count. The test source yields
/// one sample per batch in split order and stops after a single pass.
pub struct BatchSource<'a> {
    samples: &'a [Sample],
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    shuffle: bool,
    repeat: bool,
    rng: ChaCha8Rng,
}

impl<'a> BatchSource<'a> {
    fn new(
        samples: &'a [Sample],
        batch_size: usize,
        shuffle: bool,
        repeat: bool,
        seed: u64,
    ) -> Self {
        let mut source = Self {
            samples,
            order: (0..samples.len()).collect(),
            cursor: 0,
            batch_size: batch_size.max(1),
            shuffle,
            repeat,
            rng: crate::utils::random::seeded_rng(seed),
        };
        if shuffle {
            source.order.shuffle(&mut source.rng);
        }
        source
    }

    /// Shuffled, batched, endlessly repeating source
    pub fn repeating(samples: &'a [Sample], batch_size: usize, seed: u64) -> Self {
        Self::new(samples, batch_size, true, true, seed)
    }

    /// Single pass in split order
    pub fn single_pass(samples: &'a [Sample], batch_size: usize) -> Self {
        Self::new(samples, batch_size, false, false, 0)
    }

    /// Test source: batch size 1, single pass
    pub fn test(samples: &'a [Sample]) -> Self {
        Self::single_pass(samples, 1)
    }

    /// Number of batches in one pass
    pub fn batches_per_pass(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }
}

impl Iterator for BatchSource<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.samples.is_empty() {
            return None;
        }
        if self.cursor >= self.order.len() {
            if !self.repeat {
                return None;
            }
            self.cursor = 0;
            if self.shuffle {
                self.order.shuffle(&mut self.rng);
            }
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let picked: Vec<&Sample> = self.order[self.cursor..end]
            .iter()
            .map(|&i| &self.samples[i])
            .collect();
        self.cursor = end;

        Some(Batch::from_samples(&picked))
    }
}
