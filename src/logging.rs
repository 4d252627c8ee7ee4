use tracing_subscriber::EnvFilter;

/// Install the stderr `fmt` subscriber used by both binaries.
///
/// `RUST_LOG` wins when set; otherwise this crate logs at `info`
/// (`debug` with `verbose`).
pub fn init(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "warn,stima_sense={level},fetch_planned_outages={level},train_outage_model={level}"
            ))
        });

    // A second init (e.g. from tests) is a no-op.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
