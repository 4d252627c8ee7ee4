//! Multi-input, multi-head outage network on `burn`.
//!
//! Four branches (weather, grid, temporal, sequence) are concatenated into a
//! shared trunk feeding three heads: outage probability (sigmoid), severity
//! logits over 4 classes and time-window logits over 6.

use burn::backend::{Autodiff, NdArray};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::{
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, Linear, LinearConfig, Lstm,
    LstmConfig,
};
use burn::prelude::*;
use burn::tensor::activation::{relu, sigmoid};
use ndarray::{Array1, Array2, Array3};

use super::dataset::{Samples, SEVERITY_CLASSES, TIME_WINDOW_CLASSES};
use super::error::TrainingResult;

/// Backend used while fitting.
pub type TrainBackend = Autodiff<NdArray>;
/// Backend of the module returned by `valid()`: no autodiff, dropout off.
pub type InferBackend = NdArray;

const OUTAGE_WEIGHT: f32 = 1.0;
const SEVERITY_WEIGHT: f32 = 0.3;
const TIME_WINDOW_WEIGHT: f32 = 0.2;

/// Extra penalty on missed outages, added to binary cross-entropy.
const MISSED_OUTAGE_PENALTY: f32 = 2.0;

const PROB_EPSILON: f32 = 1e-7;

// Keras BatchNormalization defaults; burn weighs the new batch by `momentum`.
const BATCH_NORM_MOMENTUM: f64 = 0.01;
const BATCH_NORM_EPSILON: f64 = 1e-3;

#[derive(Config, Debug)]
pub struct OutageNetworkConfig {
    pub weather_features: usize,
    pub grid_features: usize,
    pub temporal_features: usize,
    pub sequence_features: usize,
    pub sequence_length: usize,
}

impl OutageNetworkConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> OutageNetwork<B> {
        let dense = |d_input, d_output| {
            LinearConfig::new(d_input, d_output)
                .with_initializer(Initializer::XavierUniform { gain: 1.0 })
                .init(device)
        };
        let lstm = |d_input, d_hidden| {
            LstmConfig::new(d_input, d_hidden, true)
                .with_initializer(Initializer::XavierUniform { gain: 1.0 })
                .init(device)
        };
        let norm = |features| {
            BatchNormConfig::new(features)
                .with_momentum(BATCH_NORM_MOMENTUM)
                .with_epsilon(BATCH_NORM_EPSILON)
                .init(device)
        };

        OutageNetwork {
            weather: dense(self.weather_features, 32),
            weather_dropout: DropoutConfig::new(0.3).init(),
            grid: dense(self.grid_features, 24),
            grid_dropout: DropoutConfig::new(0.3).init(),
            temporal: dense(self.temporal_features, 16),
            sequence: lstm(self.sequence_features, 64),
            sequence_last: lstm(64, 32),
            sequence_dropout: DropoutConfig::new(0.4).init(),
            trunk: dense(32 + 24 + 16 + 32, 128),
            trunk_norm: norm(128),
            trunk_dropout: DropoutConfig::new(0.4).init(),
            shared: dense(128, 64),
            shared_norm: norm(64),
            shared_dropout: DropoutConfig::new(0.3).init(),
            bottleneck: dense(64, 32),
            outage: dense(32, 1),
            severity: dense(32, SEVERITY_CLASSES),
            time_window: dense(32, TIME_WINDOW_CLASSES),
            sequence_length: self.sequence_length,
        }
    }
}

#[derive(Module, Debug)]
pub struct OutageNetwork<B: Backend> {
    pub weather: Linear<B>,
    pub weather_dropout: Dropout,
    pub grid: Linear<B>,
    pub grid_dropout: Dropout,
    pub temporal: Linear<B>,
    /// Returns every step to `sequence_last`.
    pub sequence: Lstm<B>,
    pub sequence_last: Lstm<B>,
    pub sequence_dropout: Dropout,
    pub trunk: Linear<B>,
    pub trunk_norm: BatchNorm<B>,
    pub trunk_dropout: Dropout,
    pub shared: Linear<B>,
    pub shared_norm: BatchNorm<B>,
    pub shared_dropout: Dropout,
    pub bottleneck: Linear<B>,
    pub outage: Linear<B>,
    pub severity: Linear<B>,
    pub time_window: Linear<B>,
    pub sequence_length: usize,
}

/// Head outputs for a batch.
#[derive(Debug, Clone)]
pub struct Outputs<B: Backend> {
    /// `[batch]` probabilities.
    pub outage: Tensor<B, 1>,
    /// `[batch, 4]` logits.
    pub severity: Tensor<B, 2>,
    /// `[batch, 6]` logits.
    pub time_window: Tensor<B, 2>,
}

/// Samples moved onto a device.
#[derive(Debug, Clone)]
pub struct Batch<B: Backend> {
    pub weather: Tensor<B, 2>,
    pub grid: Tensor<B, 2>,
    pub temporal: Tensor<B, 2>,
    pub sequence: Tensor<B, 3>,
    pub outage: Tensor<B, 1>,
    pub severity: Tensor<B, 1, Int>,
    pub time_window: Tensor<B, 1, Int>,
}

impl<B: Backend> Batch<B> {
    pub fn from_samples(samples: &Samples, device: &B::Device) -> Self {
        Self {
            weather: matrix(&samples.weather, device),
            grid: matrix(&samples.grid, device),
            temporal: matrix(&samples.temporal, device),
            sequence: cube(&samples.sequence, device),
            outage: vector(&samples.outage, device),
            severity: classes(&samples.severity, device),
            time_window: classes(&samples.time_window, device),
        }
    }
}

fn matrix<B: Backend>(values: &Array2<f32>, device: &B::Device) -> Tensor<B, 2> {
    let (rows, cols) = values.dim();
    let data = TensorData::new(values.iter().copied().collect::<Vec<f32>>(), [rows, cols]);
    Tensor::from_data(data, device)
}

fn cube<B: Backend>(values: &Array3<f32>, device: &B::Device) -> Tensor<B, 3> {
    let (rows, steps, features) = values.dim();
    let data = TensorData::new(
        values.iter().copied().collect::<Vec<f32>>(),
        [rows, steps, features],
    );
    Tensor::from_data(data, device)
}

fn vector<B: Backend>(values: &Array1<f32>, device: &B::Device) -> Tensor<B, 1> {
    Tensor::from_data(TensorData::new(values.to_vec(), [values.len()]), device)
}

fn classes<B: Backend>(values: &Array1<i64>, device: &B::Device) -> Tensor<B, 1, Int> {
    Tensor::from_data(TensorData::new(values.to_vec(), [values.len()]), device)
}

impl<B: Backend> OutageNetwork<B> {
    pub fn forward(
        &self,
        weather: Tensor<B, 2>,
        grid: Tensor<B, 2>,
        temporal: Tensor<B, 2>,
        sequence: Tensor<B, 3>,
    ) -> Outputs<B> {
        let weather = self.weather_dropout.forward(relu(self.weather.forward(weather)));
        let grid = self.grid_dropout.forward(relu(self.grid.forward(grid)));
        let temporal = relu(self.temporal.forward(temporal));

        let (steps, _) = self.sequence.forward(sequence, None);
        let (_, last) = self.sequence_last.forward(steps, None);
        let sequence = self.sequence_dropout.forward(last.hidden);

        let x = Tensor::cat(vec![weather, grid, temporal, sequence], 1);
        let x = relu(self.trunk.forward(x));
        let x = self.trunk_dropout.forward(self.trunk_norm.forward(x));
        let x = relu(self.shared.forward(x));
        let x = self.shared_dropout.forward(self.shared_norm.forward(x));
        let x = relu(self.bottleneck.forward(x));

        Outputs {
            outage: sigmoid(self.outage.forward(x.clone())).flatten::<1>(0, 1),
            severity: self.severity.forward(x.clone()),
            time_window: self.time_window.forward(x),
        }
    }

    pub fn forward_batch(&self, batch: &Batch<B>) -> Outputs<B> {
        self.forward(
            batch.weather.clone(),
            batch.grid.clone(),
            batch.temporal.clone(),
            batch.sequence.clone(),
        )
    }

    /// Weighted multi-head loss of one batch, as a `[1]` tensor.
    pub fn loss(&self, batch: &Batch<B>) -> Tensor<B, 1> {
        weighted_loss(self.forward_batch(batch), batch)
    }

    /// Mean loss over `samples`, in chunks of `batch_size` rows.
    pub fn evaluate(&self, samples: &Samples, batch_size: usize, device: &B::Device) -> f32 {
        let rows: Vec<usize> = (0..samples.len()).collect();
        let mut total = 0.0;
        for chunk in rows.chunks(batch_size.max(1)) {
            let batch = Batch::from_samples(&samples.select(chunk), device);
            total += self.loss(&batch).into_scalar().elem::<f32>() * chunk.len() as f32;
        }
        total / samples.len().max(1) as f32
    }

    /// Outage probability per row.
    pub fn predict(&self, samples: &Samples, device: &B::Device) -> TrainingResult<Array1<f32>> {
        let batch = Batch::from_samples(samples, device);
        let probabilities = self.forward_batch(&batch).outage.into_data().to_vec::<f32>()?;
        Ok(Array1::from(probabilities))
    }
}

/// `1.0·(BCE + 2·y·(1−p)) + 0.3·CCE(severity) + 0.2·CCE(time_window)`, batch mean.
pub fn weighted_loss<B: Backend>(out: Outputs<B>, batch: &Batch<B>) -> Tensor<B, 1> {
    let p = out.outage.clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
    let y = batch.outage.clone();
    let not_p = p.clone().neg().add_scalar(1.0);
    let not_y = y.clone().neg().add_scalar(1.0);

    let bce = (y.clone() * p.log() + not_y * not_p.clone().log()).neg();
    let missed = (y * not_p).mul_scalar(MISSED_OUTAGE_PENALTY);
    let outage = (bce + missed).mean();

    let cross_entropy = CrossEntropyLossConfig::new().init(&outage.device());
    let severity = cross_entropy.forward(out.severity, batch.severity.clone());
    let time_window = cross_entropy.forward(out.time_window, batch.time_window.clone());

    outage.mul_scalar(OUTAGE_WEIGHT)
        + severity.mul_scalar(SEVERITY_WEIGHT)
        + time_window.mul_scalar(TIME_WINDOW_WEIGHT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::module::AutodiffModule;
    use burn::optim::{AdamConfig, GradientsParams, Optimizer};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn toy_samples(rows: usize, steps: usize) -> Samples {
        let mut rng = StdRng::seed_from_u64(7);
        let weather: Array2<f32> = Array2::from_shape_simple_fn((rows, 3), || rng.gen_range(-1.0..1.0));
        let outage = weather.column(0).mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        Samples {
            grid: Array2::from_shape_simple_fn((rows, 2), || rng.gen_range(-1.0..1.0)),
            temporal: Array2::from_shape_simple_fn((rows, 2), || rng.gen_range(0.0..1.0)),
            sequence: Array3::from_shape_simple_fn((rows, steps, 2), || rng.gen_range(-1.0..1.0)),
            weather,
            outage,
            severity: (0..rows).map(|i| (i % SEVERITY_CLASSES) as i64).collect(),
            time_window: (0..rows).map(|i| (i % TIME_WINDOW_CLASSES) as i64).collect(),
        }
    }

    fn toy_config(steps: usize) -> OutageNetworkConfig {
        OutageNetworkConfig::new(3, 2, 2, 2, steps)
    }

    #[test]
    fn output_shapes_match_heads() {
        let device = NdArrayDevice::default();
        let net: OutageNetwork<InferBackend> = toy_config(4).init(&device);
        let batch = Batch::from_samples(&toy_samples(5, 4), &device);
        let out = net.forward_batch(&batch);
        assert_eq!(out.outage.dims(), [5]);
        assert_eq!(out.severity.dims(), [5, SEVERITY_CLASSES]);
        assert_eq!(out.time_window.dims(), [5, TIME_WINDOW_CLASSES]);

        let probabilities = out.outage.into_data().to_vec::<f32>().unwrap();
        assert!(probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn missed_outages_cost_more_than_false_alarms() {
        let device = NdArrayDevice::default();
        let outputs = |p: f32| Outputs::<InferBackend> {
            outage: Tensor::from_data(TensorData::new(vec![p], [1]), &device),
            severity: Tensor::zeros([1, SEVERITY_CLASSES], &device),
            time_window: Tensor::zeros([1, TIME_WINDOW_CLASSES], &device),
        };
        let batch = |y: f32| Batch::<InferBackend> {
            weather: Tensor::zeros([1, 1], &device),
            grid: Tensor::zeros([1, 1], &device),
            temporal: Tensor::zeros([1, 1], &device),
            sequence: Tensor::zeros([1, 1, 1], &device),
            outage: Tensor::from_data(TensorData::new(vec![y], [1]), &device),
            severity: Tensor::zeros([1], &device),
            time_window: Tensor::zeros([1], &device),
        };
        let missed = weighted_loss(outputs(0.1), &batch(1.0)).into_scalar().elem::<f32>();
        let false_alarm = weighted_loss(outputs(0.9), &batch(0.0)).into_scalar().elem::<f32>();

        // Same BCE both ways; the miss adds 2·(1 − 0.1).
        assert!((missed - false_alarm - 1.8).abs() < 1e-4, "{missed} vs {false_alarm}");
    }

    #[test]
    fn training_reduces_loss() {
        let device = NdArrayDevice::default();
        TrainBackend::seed(&device, 3);
        let samples = toy_samples(64, 3);
        let mut net: OutageNetwork<TrainBackend> = toy_config(3).init(&device);
        let mut optim = AdamConfig::new()
            .with_beta_1(0.9)
            .with_beta_2(0.999)
            .with_epsilon(1e-7)
            .init();

        let batch = Batch::from_samples(&samples, &device);
        let mut losses = Vec::new();
        for _ in 0..60 {
            let loss = net.loss(&batch);
            losses.push(loss.clone().into_scalar().elem::<f32>());
            let grads = GradientsParams::from_grads(loss.backward(), &net);
            net = optim.step(1e-2, net, grads);
        }
        // Dropout makes single steps noisy; compare the ends of the run.
        let before: f32 = losses[..5].iter().sum::<f32>() / 5.0;
        let after: f32 = losses[55..].iter().sum::<f32>() / 5.0;
        assert!(after.is_finite());
        assert!(after < before, "loss did not fall: {before} -> {after}");
        assert!(net.valid().evaluate(&samples, 16, &device).is_finite());
    }

    #[test]
    fn evaluation_mode_is_deterministic() {
        let device = NdArrayDevice::default();
        let net: OutageNetwork<TrainBackend> = toy_config(3).init(&device);
        let samples = toy_samples(8, 3);
        let valid = net.valid();
        let first = valid.predict(&samples, &device).unwrap();
        let second = valid.predict(&samples, &device).unwrap();
        assert_eq!(first, second);
    }
}
