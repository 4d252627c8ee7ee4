use std::fs::File;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use parquet::data_type::{ByteArray, ByteArrayType, DoubleType, Int32Type};
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::parser::parse_message_type;
use serde_json::Value;

use stima_sense::config::TrainConfig;
use stima_sense::training::{self, LabelSource, TrainingError};

const ROWS: usize = 60;

/// temperature, humidity, wind_speed, precipitation, load_percentage,
/// weather_severity_index
fn weather_row(i: usize) -> [f64; 6] {
    [
        18.0 + (i % 7) as f64,
        55.0 + (i % 5) as f64 * 4.0,
        (i % 10) as f64 * 2.5,
        if i % 4 == 0 { 12.0 } else { 0.5 },
        60.0 + (i % 6) as f64 * 5.0,
        (i % 3) as f64,
    ]
}

fn write_fixture(path: &Path, target: impl Fn(usize) -> i32) {
    let schema = Arc::new(
        parse_message_type(
            "message outages {
                REQUIRED DOUBLE temperature;
                REQUIRED DOUBLE humidity;
                REQUIRED DOUBLE wind_speed;
                REQUIRED DOUBLE precipitation;
                REQUIRED DOUBLE load_percentage;
                REQUIRED DOUBLE weather_severity_index;
                REQUIRED INT32 target;
                REQUIRED BINARY power_outage_datetime (UTF8);
            }",
        )
        .unwrap(),
    );
    let props = Arc::new(WriterProperties::builder().build());
    let file = File::create(path).unwrap();
    let mut writer = SerializedFileWriter::new(file, schema, props).unwrap();
    let mut row_group = writer.next_row_group().unwrap();

    for column in 0..6 {
        let values: Vec<f64> = (0..ROWS).map(|i| weather_row(i)[column]).collect();
        let mut col_writer = row_group.next_column().unwrap().unwrap();
        col_writer
            .typed::<DoubleType>()
            .write_batch(&values, None, None)
            .unwrap();
        col_writer.close().unwrap();
    }

    let labels: Vec<i32> = (0..ROWS).map(&target).collect();
    let mut col_writer = row_group.next_column().unwrap().unwrap();
    col_writer
        .typed::<Int32Type>()
        .write_batch(&labels, None, None)
        .unwrap();
    col_writer.close().unwrap();

    let stamps: Vec<ByteArray> = (0..ROWS)
        .map(|i| ByteArray::from(format!("2024-03-{:02} {:02}:00:00", 1 + i / 24, i % 24).as_str()))
        .collect();
    let mut col_writer = row_group.next_column().unwrap().unwrap();
    col_writer
        .typed::<ByteArrayType>()
        .write_batch(&stamps, None, None)
        .unwrap();
    col_writer.close().unwrap();

    assert!(row_group.next_column().unwrap().is_none());
    row_group.close().unwrap();
    writer.close().unwrap();
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn trains_and_exports_sidecars() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("outages.parquet");
    write_fixture(&input, |i| i32::from(i % 10 >= 7));

    let config = TrainConfig {
        input,
        output_dir: dir.path().join("models"),
        sequence_length: 6,
        epochs: 3,
        batch_size: 16,
        ..TrainConfig::default()
    };
    let report = training::run(&config).unwrap();
    assert!(report.metrics.is_finite());
    assert_eq!(report.summary.label_source, LabelSource::Target);
    assert_eq!(report.summary.train_rows, 48);
    assert_eq!(report.summary.test_rows, 12);

    let params = read_json(&config.output_dir.join("preprocessing_params.json"));
    assert_eq!(params["sequence_length"], 6);
    assert_eq!(params["weather_scaler"]["type"], "RobustScaler");
    assert_eq!(params["grid_scaler"]["type"], "StandardScaler");
    assert_eq!(params["temporal_scaler"]["type"], "MinMaxScaler");
    assert_eq!(params["weather_scaler"]["features"].as_array().unwrap().len(), 8);
    assert_eq!(params["sequence_scaler"]["features"].as_array().unwrap().len(), 14);

    let metadata = read_json(&config.output_dir.join("model_metadata.json"));
    for key in ["accuracy", "precision", "recall", "f1_score"] {
        let value = metadata["performance"][key].as_f64().unwrap();
        assert!(value.is_finite() && (0.0..=1.0).contains(&value), "{key} = {value}");
    }
    assert_eq!(metadata["input_features"]["temporal_features"][0], "hour_sin");
    assert_eq!(metadata["training"]["label_source"], "target");

    let model_dir = config.output_dir.join("outage_prediction_model");
    let model = read_json(&model_dir.join("model.json"));
    let layers = model["modelTopology"]["config"]["layers"].as_array().unwrap();
    let count = |class: &str| layers.iter().filter(|l| l["class_name"] == class).count();
    assert_eq!(count("LSTM"), 2);
    assert_eq!(count("BatchNormalization"), 2);

    let shard = std::fs::read(model_dir.join("group1-shard1of1.bin")).unwrap();
    let total = metadata["model_info"]["total_parameters"].as_u64().unwrap() as usize;
    assert_eq!(total * 4, shard.len());
}

#[test]
fn single_class_target_is_synthesized() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("flat.parquet");
    write_fixture(&input, |_| 0);

    let config = TrainConfig {
        input,
        output_dir: dir.path().join("out"),
        sequence_length: 4,
        epochs: 1,
        ..TrainConfig::default()
    };
    let report = training::run(&config).unwrap();
    assert_eq!(report.summary.label_source, LabelSource::Synthesized);
    assert!(report.summary.positive_rate > 0.0 && report.summary.positive_rate < 1.0);
}

#[test]
fn missing_input_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainConfig {
        input: dir.path().join("nope.parquet"),
        output_dir: dir.path().join("out"),
        ..TrainConfig::default()
    };
    assert!(matches!(training::run(&config), Err(TrainingError::MissingInput(_))));
    assert!(!config.output_dir.exists());
}

#[test]
fn cli_exits_non_zero_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let status = Command::new(env!("CARGO_BIN_EXE_train-outage-model"))
        .arg("--input")
        .arg(dir.path().join("nope.parquet"))
        .arg("--output")
        .arg(dir.path().join("out"))
        .status()
        .unwrap();
    assert!(!status.success());
}

#[test]
fn cli_accepts_snake_case_sequence_length() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("outages.parquet");
    write_fixture(&input, |i| i32::from(i % 3 == 0));
    let output = dir.path().join("cli-models");

    let status = Command::new(env!("CARGO_BIN_EXE_train-outage-model"))
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .arg("--sequence_length")
        .arg("5")
        .arg("--epochs")
        .arg("1")
        .status()
        .unwrap();
    assert!(status.success());
    assert_eq!(read_json(&output.join("preprocessing_params.json"))["sequence_length"], 5);
}
