use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Page listing the planned power interruptions.
pub const DEFAULT_SOURCE_URL: &str = "https://www.kplc.co.ke/customer-support#powerschedule";

/// Environment variable that overrides [`DEFAULT_SOURCE_URL`].
pub const SOURCE_URL_ENV: &str = "KPLC_SOURCE_URL";

pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; StimaSense/1.0; +https://stimasense.app)";

/// Tunables for one fetcher run.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub source_url: String,
    pub page_timeout: Duration,
    pub pdf_timeout: Duration,
    /// Upper bound on PDF bulletins downloaded per run.
    pub max_pdfs: usize,
    /// Upper bound on records produced by the page-text fallbacks.
    pub max_fragments: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            source_url: DEFAULT_SOURCE_URL.to_string(),
            page_timeout: Duration::from_secs(20),
            pdf_timeout: Duration::from_secs(30),
            max_pdfs: 15,
            max_fragments: 50,
        }
    }
}

impl FetchConfig {
    /// Defaults, with the source URL taken from `.env` / the process
    /// environment when set.
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();
        let source_url = dotenv::var(SOURCE_URL_ENV)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string());

        Self {
            source_url,
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source_url: Option<String>) -> Self {
        if let Some(url) = source_url.filter(|s| !s.trim().is_empty()) {
            self.source_url = url;
        }
        self
    }
}

/// Hyperparameters and paths for one training run.
/// Serialized verbatim into `model_metadata.json`.
#[derive(Debug, Clone, Serialize)]
pub struct TrainConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub sequence_length: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Epochs without validation improvement before stopping.
    pub patience: usize,
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output_dir: PathBuf::from("./models"),
            sequence_length: 24,
            epochs: 5,
            batch_size: 32,
            learning_rate: 1e-3,
            patience: 2,
            test_fraction: 0.2,
            seed: 42,
        }
    }
}
