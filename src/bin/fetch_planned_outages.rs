use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info, warn};

use stima_sense::config::FetchConfig;
use stima_sense::{fetch, logging, output};

/// Fetch planned power-outage notices and write them as a JSON array.
///
/// Always writes a file (possibly `[]`) and exits 0, so a layout change on
/// the source site never fails the calling pipeline.
#[derive(Parser)]
#[command(name = "fetch-planned-outages", version)]
struct Cli {
    /// Output JSON path (e.g. models/planned_outages.json)
    output: PathBuf,

    /// Optional second path receiving the same JSON
    #[arg(long)]
    mirror: Option<PathBuf>,

    /// Override the source URL (default: $KPLC_SOURCE_URL or the utility's schedule page)
    #[arg(long)]
    source: Option<String>,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = FetchConfig::from_env().with_source(cli.source);
    info!(source = %config.source_url, "Fetching planned outages");

    let notices = fetch::collect_notices(config).await;

    let payload = match output::render(&notices) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Failed to serialize notices");
            "[]".to_string()
        }
    };

    match output::write_json(&cli.output, &payload) {
        Ok(()) => info!(count = notices.len(), path = %cli.output.display(), "Wrote outages"),
        Err(e) => error!(error = %format!("{e:#}"), "Failed writing output"),
    }

    if let Some(mirror) = &cli.mirror {
        match output::write_json(mirror, &payload) {
            Ok(()) => info!(path = %mirror.display(), "Mirrored output"),
            Err(e) => warn!(error = %format!("{e:#}"), "Failed to mirror output"),
        }
    }
}
