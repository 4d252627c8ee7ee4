//! Outage model trainer: load, engineer, split, scale, fit, evaluate, export.

pub mod dataset;
pub mod error;
pub mod export;
pub mod metrics;
pub mod network;
pub mod scaler;

use std::path::PathBuf;

use burn::backend::ndarray::NdArrayDevice;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::{Backend, ElementConversion, Module};
use ndarray::{s, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

pub use dataset::{FeatureSet, LabelSource, RawTable, Samples};
pub use error::{TrainingError, TrainingResult};
pub use export::{PreprocessingParams, TrainingSummary};
pub use metrics::ClassificationMetrics;
pub use network::{InferBackend, OutageNetwork, OutageNetworkConfig, TrainBackend};

use crate::config::TrainConfig;
use dataset::{
    class_targets, sequence_windows, split_index, GRID_COLUMNS, SEQUENCE_COLUMNS, SEVERITY_CLASSES,
    TEMPORAL_COLUMNS, TIME_WINDOW_CLASSES, WEATHER_COLUMNS,
};
use network::Batch;
use scaler::{Scaler, ScalerKind};

const DECISION_THRESHOLD: f32 = 0.5;

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub metrics: ClassificationMetrics,
    pub summary: TrainingSummary,
    pub model_dir: PathBuf,
    pub preprocessing_path: PathBuf,
    pub metadata_path: PathBuf,
}

/// Scalers fitted on the training rows of each input branch.
#[derive(Debug, Clone)]
pub struct FittedScalers {
    pub weather: Scaler,
    pub grid: Scaler,
    pub temporal: Scaler,
    pub sequence: Scaler,
}

impl FittedScalers {
    pub fn fit(features: &FeatureSet, train_rows: usize) -> Self {
        let fit = |kind, data: &Array2<f64>| Scaler::fit(kind, data.slice(s![..train_rows, ..]));
        Self {
            weather: fit(ScalerKind::RobustScaler, &features.weather),
            grid: fit(ScalerKind::StandardScaler, &features.grid),
            temporal: fit(ScalerKind::MinMaxScaler, &features.temporal),
            sequence: fit(ScalerKind::StandardScaler, &features.sequence_base),
        }
    }

    /// Scaled inputs and targets for every row, in file order.
    pub fn samples(&self, features: &FeatureSet, sequence_length: usize) -> Samples {
        let sequence_base: Array2<f32> = self.sequence.transform(features.sequence_base.view());
        Samples {
            weather: self.weather.transform(features.weather.view()),
            grid: self.grid.transform(features.grid.view()),
            temporal: self.temporal.transform(features.temporal.view()),
            sequence: sequence_windows(sequence_base.view(), sequence_length),
            outage: features.outage.clone(),
            severity: class_targets(&features.severity, SEVERITY_CLASSES),
            time_window: class_targets(&features.time_window, TIME_WINDOW_CLASSES),
        }
    }

    pub fn params(&self, sequence_length: usize) -> PreprocessingParams {
        PreprocessingParams {
            weather_scaler: self.weather.params(&WEATHER_COLUMNS),
            grid_scaler: self.grid.params(&GRID_COLUMNS),
            temporal_scaler: self.temporal.params(&TEMPORAL_COLUMNS),
            sequence_scaler: self.sequence.params(&SEQUENCE_COLUMNS),
            sequence_length,
        }
    }
}

fn validate(config: &TrainConfig) -> TrainingResult<()> {
    if config.sequence_length == 0 {
        return Err(TrainingError::InvalidConfig("sequence length must be at least 1".into()));
    }
    if config.batch_size == 0 {
        return Err(TrainingError::InvalidConfig("batch size must be at least 1".into()));
    }
    if config.epochs == 0 {
        return Err(TrainingError::InvalidConfig("epochs must be at least 1".into()));
    }
    if !(config.test_fraction > 0.0 && config.test_fraction < 1.0) {
        return Err(TrainingError::InvalidConfig(format!(
            "test fraction must be in (0, 1), got {}",
            config.test_fraction
        )));
    }
    if !(config.learning_rate.is_finite() && config.learning_rate > 0.0) {
        return Err(TrainingError::InvalidConfig(format!(
            "learning rate must be positive, got {}",
            config.learning_rate
        )));
    }
    Ok(())
}

struct FitOutcome {
    network: OutageNetwork<InferBackend>,
    epochs_run: usize,
    best_epoch: usize,
    best_validation_loss: f32,
    final_training_loss: f32,
}

/// Mini-batch training with early stopping on the validation loss.
/// The returned inference module carries the best-scoring weights.
fn fit(
    mut network: OutageNetwork<TrainBackend>,
    train: &Samples,
    validation: &Samples,
    config: &TrainConfig,
    rng: &mut StdRng,
    device: &NdArrayDevice,
) -> FitOutcome {
    let mut optim = AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.999)
        .with_epsilon(1e-7)
        .init();
    let mut order: Vec<usize> = (0..train.len()).collect();

    // Snapshots go through `valid()` so later updates to the batch-norm
    // running statistics cannot leak into them.
    let mut best: Option<OutageNetwork<InferBackend>> = None;
    let mut best_loss = f32::INFINITY;
    let mut best_epoch = 0;
    let mut stale = 0;
    let mut epochs_run = 0;
    let mut final_training_loss = f32::NAN;

    for epoch in 1..=config.epochs {
        order.shuffle(rng);
        let mut total = 0.0;
        for chunk in order.chunks(config.batch_size) {
            let batch = Batch::from_samples(&train.select(chunk), device);
            let loss = network.loss(&batch);
            total += loss.clone().into_scalar().elem::<f32>() * chunk.len() as f32;

            let grads = GradientsParams::from_grads(loss.backward(), &network);
            network = optim.step(f64::from(config.learning_rate), network, grads);
        }
        final_training_loss = total / train.len() as f32;

        let current = network.valid();
        let val_loss = current.evaluate(validation, config.batch_size, device);
        epochs_run = epoch;
        info!(epoch, loss = final_training_loss, val_loss, "Epoch finished");

        if val_loss < best_loss {
            best_loss = val_loss;
            best_epoch = epoch;
            best = Some(current);
            stale = 0;
        } else {
            stale += 1;
            if stale >= config.patience {
                info!(epoch, best_epoch, "Early stopping");
                break;
            }
        }
    }

    // A NaN validation loss never improves; keep the last weights then.
    let network = best.unwrap_or_else(|| network.valid());
    FitOutcome {
        network,
        epochs_run,
        best_epoch,
        best_validation_loss: best_loss,
        final_training_loss,
    }
}

/// Run the whole pipeline and write every artifact under `config.output_dir`.
pub fn run(config: &TrainConfig) -> TrainingResult<TrainingReport> {
    validate(config)?;
    info!(input = %config.input.display(), output = %config.output_dir.display(), "Starting training");

    let table = dataset::read_parquet(&config.input)?;
    let features = FeatureSet::from_table(&table);
    let rows = features.rows();
    let split = split_index(rows, config.test_fraction)?;

    let scalers = FittedScalers::fit(&features, split);
    let all = scalers.samples(&features, config.sequence_length);
    let train_rows: Vec<usize> = (0..split).collect();
    let test_rows: Vec<usize> = (split..rows).collect();
    let train = all.select(&train_rows);
    let test = all.select(&test_rows);
    debug!(train = train.len(), test = test.len(), "Split rows");

    let device = NdArrayDevice::default();
    TrainBackend::seed(&device, config.seed);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let network: OutageNetwork<TrainBackend> = OutageNetworkConfig::new(
        WEATHER_COLUMNS.len(),
        GRID_COLUMNS.len(),
        TEMPORAL_COLUMNS.len(),
        SEQUENCE_COLUMNS.len(),
        config.sequence_length,
    )
    .init(&device);
    info!(parameters = network.num_params(), "Built network");

    let outcome = fit(network, &train, &test, config, &mut rng, &device);
    let network = outcome.network;

    let probabilities = network.predict(&test, &device)?;
    let metrics = ClassificationMetrics::from_probabilities(
        probabilities.view(),
        test.outage.view(),
        DECISION_THRESHOLD,
    );
    info!(
        accuracy = metrics.accuracy,
        precision = metrics.precision,
        recall = metrics.recall,
        f1 = metrics.f1_score,
        "Evaluated on test rows"
    );

    let positives = features.outage.iter().filter(|&&y| y > 0.5).count();
    let summary = TrainingSummary {
        epochs_run: outcome.epochs_run,
        best_epoch: outcome.best_epoch,
        best_validation_loss: outcome.best_validation_loss,
        final_training_loss: outcome.final_training_loss,
        train_rows: train.len(),
        test_rows: test.len(),
        positive_rate: positives as f64 / rows as f64,
        label_source: features.label_source,
    };

    let params = scalers.params(config.sequence_length);
    let model = export::write_model(&config.output_dir, &network)?;
    let preprocessing_path = export::write_preprocessing(&config.output_dir, &params)?;
    let metadata_path = export::write_metadata(
        &config.output_dir,
        model.parameters,
        &params,
        metrics,
        &summary,
        config,
    )?;

    info!(dir = %config.output_dir.display(), "Training complete");
    Ok(TrainingReport {
        metrics,
        summary,
        model_dir: model.dir,
        preprocessing_path,
        metadata_path,
    })
}
