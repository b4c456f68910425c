use anyhow::{bail, Context};
use homedir::my_home;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::matching::{ThresholdComparison, DEFAULT_FALLBACK_SIZE, DEFAULT_MODEL, DEFAULT_THRESHOLD};

const CONFIG_FILE: &str = "config.yaml";

/// Default character budget for embedding input
const DEFAULT_MAX_INPUT_CHARS: usize = 8192;
/// Default timeout for a single embedding call in seconds
const DEFAULT_EMBED_TIMEOUT_SECS: u64 = 30;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_LISTEN: &str = "0.0.0.0:8000";
const DEFAULT_BODY_LIMIT_MB: usize = 50;
const DEFAULT_JOBS_CSV: &str = "jobs.csv";

/// Base directory for config, the job catalog and cached models.
///
/// `HIREMATCH_BASE_PATH` overrides the default `~/.local/share/hirematch`.
pub fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("HIREMATCH_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .context("couldnt find home dir")?
        .context("couldnt find home dir")?;
    Ok(home.join(".local/share/hirematch"))
}

/// Threshold and fallback behaviour of the ranking policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Threshold used when a caller does not send one [0.0, 1.0]
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,

    /// How many best-available results to return when nothing qualifies
    #[serde(default = "default_fallback_size")]
    pub fallback_size: usize,

    /// `at_least` (score >= threshold) or `above` (score > threshold)
    #[serde(default)]
    pub comparison: ThresholdComparison,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            default_threshold: DEFAULT_THRESHOLD,
            fallback_size: DEFAULT_FALLBACK_SIZE,
            comparison: ThresholdComparison::default(),
        }
    }
}

/// Configuration for the embedding provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name (e.g. "all-MiniLM-L6-v2", or "hashing-256" for the offline embedder)
    #[serde(default = "default_model")]
    pub model: String,

    /// Input longer than this many characters is truncated before embedding
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    /// Timeout for one embedding call in seconds
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after a timeout or an unavailable model: 0 or 1
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,

    /// Parallelism for batch embedding: "auto" or a positive integer
    #[serde(default = "default_parallelism")]
    pub parallelism: String,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            timeout_secs: DEFAULT_EMBED_TIMEOUT_SECS,
            max_retries: default_max_retries(),
            parallelism: default_parallelism(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

impl EmbeddingConfig {
    /// Worker count for batch embedding.
    pub fn worker_count(&self) -> usize {
        match self.parallelism.parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Max request body in megabytes (uploads are base64 inside JSON)
    #[serde(default = "default_body_limit_mb")]
    pub body_limit_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            body_limit_mb: DEFAULT_BODY_LIMIT_MB,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Job postings CSV (`job_id`, `description`, optional `title`), relative to the base path
    #[serde(default = "default_jobs_csv")]
    pub jobs_csv: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            jobs_csv: default_jobs_csv(),
        }
    }
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_fallback_size() -> usize {
    DEFAULT_FALLBACK_SIZE
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_input_chars() -> usize {
    DEFAULT_MAX_INPUT_CHARS
}

fn default_embed_timeout_secs() -> u64 {
    DEFAULT_EMBED_TIMEOUT_SECS
}

fn default_max_retries() -> u8 {
    1
}

fn default_parallelism() -> String {
    "auto".to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_body_limit_mb() -> usize {
    DEFAULT_BODY_LIMIT_MB
}

fn default_jobs_csv() -> String {
    DEFAULT_JOBS_CSV.to_string()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        let matching = &self.matching;
        if !(0.0..=1.0).contains(&matching.default_threshold) {
            bail!(
                "matching.default_threshold must be between 0.0 and 1.0, got {}",
                matching.default_threshold
            );
        }
        if matching.fallback_size == 0 {
            bail!("matching.fallback_size must be greater than 0");
        }

        let emb = &self.embedding;
        if emb.max_input_chars == 0 {
            bail!("embedding.max_input_chars must be greater than 0");
        }
        if emb.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be greater than 0");
        }
        if emb.max_retries > 1 {
            bail!(
                "embedding.max_retries must be 0 or 1, got {}",
                emb.max_retries
            );
        }

        // "auto" or positive integer
        if emb.parallelism != "auto" {
            match emb.parallelism.parse::<u32>() {
                Ok(0) => bail!("embedding.parallelism must be 'auto' or a positive integer, got '0'"),
                Err(_) => bail!(
                    "embedding.parallelism must be 'auto' or a positive integer, got '{}'",
                    emb.parallelism
                ),
                Ok(_) => {}
            }
        }

        if emb.download_timeout_secs == 0 {
            bail!("embedding.download_timeout_secs must be greater than 0");
        }

        if self.server.body_limit_mb == 0 {
            bail!("server.body_limit_mb must be greater than 0");
        }

        Ok(())
    }

    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;
        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !config_path.exists() {
            std::fs::write(&config_path, serde_yml::to_string(&Self::default())?)?;
        }

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(self.base_path.join(CONFIG_FILE), config_str)?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn jobs_csv_path(&self) -> PathBuf {
        self.base_path.join(&self.catalog.jobs_csv)
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.base_path.join("vectors.bin")
    }
}
