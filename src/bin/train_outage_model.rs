use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use stima_sense::config::TrainConfig;
use stima_sense::{logging, training};

/// Train the outage prediction model from a parquet snapshot and export it
/// for the browser.
#[derive(Parser)]
#[command(name = "train-outage-model", version)]
struct Cli {
    /// Parquet file with weather, grid and label columns
    #[arg(long)]
    input: PathBuf,

    /// Directory receiving the model and its JSON sidecars
    #[arg(long, default_value = "./models")]
    output: PathBuf,

    /// Rows per recurrent input window
    #[arg(long, alias = "sequence_length", default_value_t = 24)]
    sequence_length: usize,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let defaults = TrainConfig::default();
    let config = TrainConfig {
        input: cli.input,
        output_dir: cli.output,
        sequence_length: cli.sequence_length,
        epochs: cli.epochs.unwrap_or(defaults.epochs),
        batch_size: cli.batch_size.unwrap_or(defaults.batch_size),
        ..defaults
    };

    match training::run(&config) {
        Ok(report) => {
            info!(
                accuracy = report.metrics.accuracy,
                f1 = report.metrics.f1_score,
                model = %report.model_dir.display(),
                "Model exported"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Training failed");
            ExitCode::FAILURE
        }
    }
}
