//! Writes the trained network as a TensorFlow.js layers model plus the
//! preprocessing and metadata sidecars.

use std::fs;
use std::path::{Path, PathBuf};

use burn::nn::{BatchNormRecord, LinearRecord, LstmRecord};
use burn::prelude::*;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use super::dataset::{LabelSource, GRID_COLUMNS, SEQUENCE_COLUMNS, TEMPORAL_COLUMNS, WEATHER_COLUMNS};
use super::error::TrainingResult;
use super::metrics::ClassificationMetrics;
use super::network::OutageNetwork;
use super::scaler::{ScalerKind, ScalerParams};
use crate::config::TrainConfig;

pub const MODEL_DIR: &str = "outage_prediction_model";
pub const MODEL_FILE: &str = "model.json";
pub const WEIGHTS_FILE: &str = "group1-shard1of1.bin";
pub const PREPROCESSING_FILE: &str = "preprocessing_params.json";
pub const METADATA_FILE: &str = "model_metadata.json";

const MODEL_NAME: &str = "outage_prediction_model";

const WEATHER_DENSE: &str = "weather_dense";
const WEATHER_DROPOUT: &str = "weather_dropout";
const GRID_DENSE: &str = "grid_dense";
const GRID_DROPOUT: &str = "grid_dropout";
const TEMPORAL_DENSE: &str = "temporal_dense";
const SEQUENCE_LSTM_1: &str = "sequence_lstm_1";
const SEQUENCE_LSTM_2: &str = "sequence_lstm_2";
const SEQUENCE_DROPOUT: &str = "sequence_dropout";
const CONCATENATE: &str = "concatenate";
const SHARED_DENSE_1: &str = "shared_dense_1";
const SHARED_BN_1: &str = "shared_bn_1";
const SHARED_DROPOUT_1: &str = "shared_dropout_1";
const SHARED_DENSE_2: &str = "shared_dense_2";
const SHARED_BN_2: &str = "shared_bn_2";
const SHARED_DROPOUT_2: &str = "shared_dropout_2";
const SHARED_DENSE_3: &str = "shared_dense_3";
const OUTAGE_HEAD: &str = "outage_probability";
const SEVERITY_HEAD: &str = "severity";
const TIME_WINDOW_HEAD: &str = "time_window";

#[derive(Debug, Clone, Serialize)]
pub struct PreprocessingParams {
    pub weather_scaler: ScalerParams,
    pub grid_scaler: ScalerParams,
    pub temporal_scaler: ScalerParams,
    pub sequence_scaler: ScalerParams,
    pub sequence_length: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingSummary {
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub best_validation_loss: f32,
    pub final_training_loss: f32,
    pub train_rows: usize,
    pub test_rows: usize,
    pub positive_rate: f64,
    pub label_source: LabelSource,
}

/// One tensor of the weight shard, in Keras layout.
#[derive(Debug, Clone)]
pub struct NamedWeight {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Where the layers model went and how many floats it holds.
#[derive(Debug, Clone)]
pub struct ExportedModel {
    pub dir: PathBuf,
    pub parameters: usize,
}

#[derive(Debug, Serialize)]
struct ModelInfo {
    name: &'static str,
    version: &'static str,
    created_date: String,
    framework: &'static str,
    model_type: &'static str,
    total_parameters: usize,
}

#[derive(Debug, Serialize)]
struct PreprocessingSummary {
    weather_scaler: ScalerKind,
    grid_scaler: ScalerKind,
    temporal_scaler: ScalerKind,
    sequence_scaler: ScalerKind,
    sequence_length: usize,
}

#[derive(Debug, Serialize)]
struct InputFeatures {
    weather_features: &'static [&'static str],
    grid_features: &'static [&'static str],
    temporal_features: &'static [&'static str],
    sequence_features: &'static [&'static str],
}

#[derive(Debug, Serialize)]
struct ModelMetadata<'a> {
    model_info: ModelInfo,
    preprocessing: PreprocessingSummary,
    performance: ClassificationMetrics,
    input_features: InputFeatures,
    training: &'a TrainingSummary,
    config: &'a TrainConfig,
}

/// Write `model.json` and its weight shard under `<dir>/outage_prediction_model`.
pub fn write_model<B: Backend>(dir: &Path, network: &OutageNetwork<B>) -> TrainingResult<ExportedModel> {
    let model_dir = dir.join(MODEL_DIR);
    fs::create_dir_all(&model_dir)?;

    let weights = keras_weights(network)?;
    let parameters = weights.iter().map(|w| w.data.len()).sum::<usize>();
    let mut shard = Vec::with_capacity(parameters * 4);
    for weight in &weights {
        for value in &weight.data {
            shard.extend_from_slice(&value.to_le_bytes());
        }
    }
    fs::write(model_dir.join(WEIGHTS_FILE), &shard)?;

    let manifest: Vec<Value> = weights
        .iter()
        .map(|w| json!({ "name": w.name, "shape": w.shape, "dtype": "float32" }))
        .collect();

    let model = json!({
        "format": "layers-model",
        "generatedBy": concat!("stima-sense ", env!("CARGO_PKG_VERSION")),
        "convertedBy": null,
        "modelTopology": topology(network),
        "weightsManifest": [{ "paths": [WEIGHTS_FILE], "weights": manifest }],
    });
    let path = model_dir.join(MODEL_FILE);
    fs::write(&path, serde_json::to_vec_pretty(&model)?)?;

    info!(path = %path.display(), bytes = shard.len(), "Wrote model");
    Ok(ExportedModel {
        dir: model_dir,
        parameters,
    })
}

pub fn write_preprocessing(dir: &Path, params: &PreprocessingParams) -> TrainingResult<PathBuf> {
    let path = dir.join(PREPROCESSING_FILE);
    write_pretty(&path, params)?;
    Ok(path)
}

pub fn write_metadata(
    dir: &Path,
    total_parameters: usize,
    params: &PreprocessingParams,
    performance: ClassificationMetrics,
    training: &TrainingSummary,
    config: &TrainConfig,
) -> TrainingResult<PathBuf> {
    let metadata = ModelMetadata {
        model_info: ModelInfo {
            name: "KPLC Outage Prediction Model",
            version: env!("CARGO_PKG_VERSION"),
            created_date: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            framework: "tensorflowjs layers-model",
            model_type: "multi_input_multi_output",
            total_parameters,
        },
        preprocessing: PreprocessingSummary {
            weather_scaler: params.weather_scaler.kind,
            grid_scaler: params.grid_scaler.kind,
            temporal_scaler: params.temporal_scaler.kind,
            sequence_scaler: params.sequence_scaler.kind,
            sequence_length: params.sequence_length,
        },
        performance,
        input_features: InputFeatures {
            weather_features: &WEATHER_COLUMNS,
            grid_features: &GRID_COLUMNS,
            temporal_features: &TEMPORAL_COLUMNS,
            sequence_features: &SEQUENCE_COLUMNS,
        },
        training,
        config,
    };
    let path = dir.join(METADATA_FILE);
    write_pretty(&path, &metadata)?;
    Ok(path)
}

fn write_pretty<T: Serialize>(path: &Path, value: &T) -> TrainingResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(value)?)?;
    info!(path = %path.display(), "Wrote sidecar");
    Ok(())
}

/// Every weight of the module record, in topology order and Keras layout.
pub fn keras_weights<B: Backend>(network: &OutageNetwork<B>) -> TrainingResult<Vec<NamedWeight>> {
    let record = network.clone().into_record();
    let mut weights = Vec::new();
    dense_weights(WEATHER_DENSE, &record.weather, &mut weights)?;
    dense_weights(GRID_DENSE, &record.grid, &mut weights)?;
    dense_weights(TEMPORAL_DENSE, &record.temporal, &mut weights)?;
    lstm_weights(SEQUENCE_LSTM_1, &record.sequence, &mut weights)?;
    lstm_weights(SEQUENCE_LSTM_2, &record.sequence_last, &mut weights)?;
    dense_weights(SHARED_DENSE_1, &record.trunk, &mut weights)?;
    batch_norm_weights(SHARED_BN_1, &record.trunk_norm, &mut weights)?;
    dense_weights(SHARED_DENSE_2, &record.shared, &mut weights)?;
    batch_norm_weights(SHARED_BN_2, &record.shared_norm, &mut weights)?;
    dense_weights(SHARED_DENSE_3, &record.bottleneck, &mut weights)?;
    dense_weights(OUTAGE_HEAD, &record.outage, &mut weights)?;
    dense_weights(SEVERITY_HEAD, &record.severity, &mut weights)?;
    dense_weights(TIME_WINDOW_HEAD, &record.time_window, &mut weights)?;
    Ok(weights)
}

fn push<B: Backend, const D: usize>(
    out: &mut Vec<NamedWeight>,
    layer: &str,
    weight: &str,
    tensor: Tensor<B, D>,
) -> TrainingResult<()> {
    out.push(NamedWeight {
        name: format!("{layer}/{weight}"),
        shape: tensor.dims().to_vec(),
        data: tensor.into_data().to_vec::<f32>()?,
    });
    Ok(())
}

fn bias_or_zeros<B: Backend>(linear: &LinearRecord<B>) -> Tensor<B, 1> {
    match &linear.bias {
        Some(bias) => bias.val(),
        None => {
            let [_, units] = linear.weight.dims();
            Tensor::zeros([units], &linear.weight.device())
        }
    }
}

fn dense_weights<B: Backend>(
    layer: &str,
    record: &LinearRecord<B>,
    out: &mut Vec<NamedWeight>,
) -> TrainingResult<()> {
    // burn stores [d_input, d_output], which is already the Keras kernel layout.
    push(out, layer, "kernel", record.weight.val())?;
    push(out, layer, "bias", bias_or_zeros(record))
}

fn lstm_weights<B: Backend>(
    layer: &str,
    record: &LstmRecord<B>,
    out: &mut Vec<NamedWeight>,
) -> TrainingResult<()> {
    // Keras packs the gates as input, forget, cell, output along the last axis
    // and keeps a single bias per gate.
    let gates = [
        &record.input_gate,
        &record.forget_gate,
        &record.cell_gate,
        &record.output_gate,
    ];
    let kernel = Tensor::cat(gates.iter().map(|g| g.input_transform.weight.val()).collect(), 1);
    let recurrent = Tensor::cat(gates.iter().map(|g| g.hidden_transform.weight.val()).collect(), 1);
    let bias = Tensor::cat(
        gates
            .iter()
            .map(|g| bias_or_zeros(&g.input_transform) + bias_or_zeros(&g.hidden_transform))
            .collect(),
        0,
    );
    push(out, layer, "kernel", kernel)?;
    push(out, layer, "recurrent_kernel", recurrent)?;
    push(out, layer, "bias", bias)
}

fn batch_norm_weights<B: Backend>(
    layer: &str,
    record: &BatchNormRecord<B>,
    out: &mut Vec<NamedWeight>,
) -> TrainingResult<()> {
    push(out, layer, "gamma", record.gamma.val())?;
    push(out, layer, "beta", record.beta.val())?;
    push(out, layer, "moving_mean", record.running_mean.val())?;
    push(out, layer, "moving_variance", record.running_var.val())
}

/// Keras functional-model topology matching `OutageNetwork`.
fn topology<B: Backend>(network: &OutageNetwork<B>) -> Value {
    let inputs = |linear: &burn::nn::Linear<B>| linear.weight.dims()[0];
    let units = |linear: &burn::nn::Linear<B>| linear.weight.dims()[1];
    let sequence_features = network.sequence.input_gate.input_transform.weight.dims()[0];

    let layers = vec![
        input_layer("weather_features", json!([null, inputs(&network.weather)])),
        input_layer("grid_features", json!([null, inputs(&network.grid)])),
        input_layer("temporal_features", json!([null, inputs(&network.temporal)])),
        input_layer(
            "sequence_features",
            json!([null, network.sequence_length, sequence_features]),
        ),
        dense_layer(WEATHER_DENSE, units(&network.weather), "relu", "weather_features"),
        dropout_layer(WEATHER_DROPOUT, network.weather_dropout.prob, WEATHER_DENSE),
        dense_layer(GRID_DENSE, units(&network.grid), "relu", "grid_features"),
        dropout_layer(GRID_DROPOUT, network.grid_dropout.prob, GRID_DENSE),
        dense_layer(TEMPORAL_DENSE, units(&network.temporal), "relu", "temporal_features"),
        lstm_layer(SEQUENCE_LSTM_1, network.sequence.d_hidden, true, "sequence_features"),
        lstm_layer(SEQUENCE_LSTM_2, network.sequence_last.d_hidden, false, SEQUENCE_LSTM_1),
        dropout_layer(SEQUENCE_DROPOUT, network.sequence_dropout.prob, SEQUENCE_LSTM_2),
        json!({
            "class_name": "Concatenate",
            "name": CONCATENATE,
            "config": { "name": CONCATENATE, "trainable": true, "dtype": "float32", "axis": -1 },
            "inbound_nodes": [inbound(&[WEATHER_DROPOUT, GRID_DROPOUT, TEMPORAL_DENSE, SEQUENCE_DROPOUT])],
        }),
        dense_layer(SHARED_DENSE_1, units(&network.trunk), "relu", CONCATENATE),
        batch_norm_layer(SHARED_BN_1, &network.trunk_norm, SHARED_DENSE_1),
        dropout_layer(SHARED_DROPOUT_1, network.trunk_dropout.prob, SHARED_BN_1),
        dense_layer(SHARED_DENSE_2, units(&network.shared), "relu", SHARED_DROPOUT_1),
        batch_norm_layer(SHARED_BN_2, &network.shared_norm, SHARED_DENSE_2),
        dropout_layer(SHARED_DROPOUT_2, network.shared_dropout.prob, SHARED_BN_2),
        dense_layer(SHARED_DENSE_3, units(&network.bottleneck), "relu", SHARED_DROPOUT_2),
        dense_layer(OUTAGE_HEAD, units(&network.outage), "sigmoid", SHARED_DENSE_3),
        dense_layer(SEVERITY_HEAD, units(&network.severity), "softmax", SHARED_DENSE_3),
        dense_layer(TIME_WINDOW_HEAD, units(&network.time_window), "softmax", SHARED_DENSE_3),
    ];

    let io = |names: &[&str]| -> Value { names.iter().map(|n| json!([n, 0, 0])).collect() };

    json!({
        "class_name": "Functional",
        "config": {
            "name": MODEL_NAME,
            "layers": layers,
            "input_layers": io(&["weather_features", "grid_features", "temporal_features", "sequence_features"]),
            "output_layers": io(&[OUTAGE_HEAD, SEVERITY_HEAD, TIME_WINDOW_HEAD]),
        },
        "keras_version": "2.15.0",
        "backend": "tensorflow",
    })
}

fn inbound(sources: &[&str]) -> Value {
    sources.iter().map(|s| json!([s, 0, 0, {}])).collect()
}

fn input_layer(name: &str, batch_input_shape: Value) -> Value {
    json!({
        "class_name": "InputLayer",
        "name": name,
        "config": {
            "batch_input_shape": batch_input_shape,
            "dtype": "float32",
            "sparse": false,
            "name": name
        },
        "inbound_nodes": [],
    })
}

fn dense_layer(name: &str, units: usize, activation: &str, source: &str) -> Value {
    json!({
        "class_name": "Dense",
        "name": name,
        "config": {
            "name": name,
            "trainable": true,
            "dtype": "float32",
            "units": units,
            "activation": activation,
            "use_bias": true,
            "kernel_initializer": { "class_name": "GlorotUniform", "config": { "seed": null } },
            "bias_initializer": { "class_name": "Zeros", "config": {} }
        },
        "inbound_nodes": [inbound(&[source])],
    })
}

fn dropout_layer(name: &str, rate: f64, source: &str) -> Value {
    json!({
        "class_name": "Dropout",
        "name": name,
        "config": { "name": name, "trainable": true, "dtype": "float32", "rate": rate },
        "inbound_nodes": [inbound(&[source])],
    })
}

fn lstm_layer(name: &str, units: usize, return_sequences: bool, source: &str) -> Value {
    json!({
        "class_name": "LSTM",
        "name": name,
        "config": {
            "name": name,
            "trainable": true,
            "dtype": "float32",
            "units": units,
            "activation": "tanh",
            "recurrent_activation": "sigmoid",
            "use_bias": true,
            "return_sequences": return_sequences,
            "return_state": false,
            "go_backwards": false,
            "stateful": false,
            "unroll": false,
            "time_major": false,
            "unit_forget_bias": true,
            "kernel_initializer": { "class_name": "GlorotUniform", "config": { "seed": null } },
            "recurrent_initializer": { "class_name": "Orthogonal", "config": { "gain": 1.0, "seed": null } },
            "bias_initializer": { "class_name": "Zeros", "config": {} },
            "dropout": 0.0,
            "recurrent_dropout": 0.0,
            "implementation": 2
        },
        "inbound_nodes": [inbound(&[source])],
    })
}

fn batch_norm_layer<B: Backend>(name: &str, norm: &burn::nn::BatchNorm<B>, source: &str) -> Value {
    json!({
        "class_name": "BatchNormalization",
        "name": name,
        "config": {
            "name": name,
            "trainable": true,
            "dtype": "float32",
            "axis": -1,
            // Keras keeps `momentum` of the running value; burn weighs the new batch.
            "momentum": 1.0 - norm.momentum,
            "epsilon": norm.epsilon,
            "center": true,
            "scale": true,
            "beta_initializer": { "class_name": "Zeros", "config": {} },
            "gamma_initializer": { "class_name": "Ones", "config": {} },
            "moving_mean_initializer": { "class_name": "Zeros", "config": {} },
            "moving_variance_initializer": { "class_name": "Ones", "config": {} }
        },
        "inbound_nodes": [inbound(&[source])],
    })
}
