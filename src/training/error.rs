use std::path::PathBuf;

/// Errors that abort a training run.
#[derive(thiserror::Error, Debug)]
pub enum TrainingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Tensor data error: {0}")]
    Tensor(#[from] burn::tensor::DataError),

    #[error("Input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Not enough rows to train: {rows} (need a non-empty train and test split)")]
    NotEnoughRows { rows: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience result type.
pub type TrainingResult<T> = Result<T, TrainingError>;
