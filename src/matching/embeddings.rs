//! Embedding providers.
//!
//! The engine only sees the [`EmbeddingProvider`] capability:
//! - `FastEmbedProvider` wraps a local fastembed (ONNX) sentence model,
//!   loaded lazily with a configurable cache directory
//! - `HashingProvider` is a deterministic feature-hashing embedder that needs
//!   no model download

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::config::EmbeddingConfig;

/// Prefix selecting the feature-hashing provider, e.g. `hashing-256`.
const HASHING_MODEL_PREFIX: &str = "hashing-";

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding model unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Model returned {got} embeddings for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
}

/// Capability interface over an external embedding model.
///
/// Implementations must be deterministic: identical input text yields an
/// identical vector of length [`EmbeddingProvider::dimensions`].
pub trait EmbeddingProvider: Send + Sync {
    /// Model name, used to tag persisted vectors.
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Longest input (in characters) the model accepts without truncation.
    fn max_input_chars(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    /// SHA-256 of the model name, stored in the vector file header.
    fn model_id(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        Sha256::digest(self.name().as_bytes()).into()
    }
}

/// Build the provider named in the configuration.
///
/// `hashing-<dims>` selects [`HashingProvider`]; every other name is resolved
/// as a fastembed model and downloaded into `cache_dir/models` if needed.
pub fn load_provider(
    config: &EmbeddingConfig,
    cache_dir: PathBuf,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    if let Some(dims) = config.model.strip_prefix(HASHING_MODEL_PREFIX) {
        let dims: usize = dims
            .parse()
            .ok()
            .filter(|d| *d > 0)
            .ok_or_else(|| EmbeddingError::InvalidModel(config.model.clone()))?;
        return Ok(Arc::new(HashingProvider::new(dims, config.max_input_chars)));
    }

    log::info!("Loading embedding model '{}'", config.model);
    let provider = FastEmbedProvider::new(&config.model, cache_dir, config.max_input_chars)?;
    log::info!(
        "Embedding model '{}' ready ({} dimensions)",
        provider.name(),
        provider.dimensions()
    );
    Ok(Arc::new(provider))
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct FastEmbedProvider {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
    max_input_chars: usize,
}

impl FastEmbedProvider {
    /// Create a new embedding model with the given name.
    ///
    /// The model will be downloaded on first use if not cached.
    /// Models are cached in the `models/` subdirectory of `cache_dir`.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        max_input_chars: usize,
    ) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(false);

        let mut model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let dimensions = Self::probe_dimensions(&mut model)?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
            max_input_chars,
        })
    }

    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q)
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" | "bgelargeenv15" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2 (-q), bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, hashing-<dims>",
                name
            ))),
        }
    }

    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let probe = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        probe
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, TextEmbedding>, EmbeddingError> {
        self.model.lock().map_err(|e| {
            EmbeddingError::Unavailable(format!("Failed to acquire model lock: {}", e))
        })
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let embeddings = self
            .lock()?
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                got: 0,
            })
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let embeddings = self
            .lock()?
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: embeddings.len(),
            });
        }
        Ok(embeddings)
    }
}

/// Deterministic bag-of-words embedder.
///
/// Each lowercased alphanumeric token is hashed (FNV-1a) into one of
/// `dimensions` buckets with a hash-derived sign; the summed vector is
/// L2-normalized. Text without any token yields the zero vector.
pub struct HashingProvider {
    model_name: String,
    dimensions: usize,
    max_input_chars: usize,
}

impl HashingProvider {
    pub fn new(dimensions: usize, max_input_chars: usize) -> Self {
        Self {
            model_name: format!("{HASHING_MODEL_PREFIX}{dimensions}"),
            dimensions,
            max_input_chars,
        }
    }

    fn fnv1a(token: &str) -> u64 {
        const OFFSET: u64 = 0xcbf29ce484222325;
        const PRIME: u64 = 0x100000001b3;

        token.bytes().fold(OFFSET, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(PRIME)
        })
    }
}

impl EmbeddingProvider for HashingProvider {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = Self::fnv1a(&token.to_lowercase());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }

        Ok(vector)
    }
}
