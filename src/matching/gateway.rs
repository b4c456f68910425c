//! Request-side access to the embedding provider.
//!
//! Every provider call goes through [`EmbeddingGateway`], which
//! - truncates over-long input to the model budget and records it
//! - runs the call on the blocking pool under a timeout
//! - retries at most `max_retries` times on timeout or an unavailable model
//! - fans batches out over a bounded rayon pool, keeping input order
//! - stops early once the request is cancelled

use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::matching::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::matching::normalize::truncate;

/// Texts per provider call when fanning out a batch
const BATCH_CHUNK: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("embedding call timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    #[error(transparent)]
    Provider(#[from] EmbeddingError),

    #[error("request cancelled")]
    Cancelled,
}

impl GatewayError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Provider(EmbeddingError::Unavailable(_))
        )
    }
}

/// Cooperative cancellation flag shared by one request's embedding work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .parent
                .as_ref()
                .map(|p| p.load(Ordering::SeqCst))
                .unwrap_or(false)
    }

    /// Token cancelled by either itself or `self`.
    fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(self.flag.clone()),
        }
    }

    /// Cancels the token when dropped, e.g. when the request future is dropped
    /// after a client disconnect.
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }
}

pub struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// A vector plus whether its input had to be cut.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedded {
    pub vector: Vec<f32>,
    pub truncated: bool,
}

pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    pool: Arc<rayon::ThreadPool>,
    timeout: Duration,
    max_retries: u8,
}

impl EmbeddingGateway {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        config: &EmbeddingConfig,
    ) -> Result<Self, EmbeddingError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_count())
            .thread_name(|idx| format!("embed-{idx}"))
            .build()
            .map_err(|e| EmbeddingError::InitFailed(format!("embedding pool: {e}")))?;

        Ok(Self {
            provider,
            pool: Arc::new(pool),
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
        })
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    fn prepare(&self, text: &str) -> (String, bool) {
        let (text, truncated) = truncate(text, self.provider.max_input_chars());
        if truncated {
            log::debug!(
                "input truncated to {} chars for '{}'",
                self.provider.max_input_chars(),
                self.provider.name()
            );
        }
        (text, truncated)
    }

    /// Embed one text.
    pub async fn embed(&self, text: &str, cancel: &CancelToken) -> Result<Embedded, GatewayError> {
        let (text, truncated) = self.prepare(text);
        let text = Arc::new(text);
        let provider = self.provider.clone();

        let vector = self
            .with_retry(cancel, move |_| Ok(provider.embed(&text)?))
            .await?;

        Ok(Embedded { vector, truncated })
    }

    /// Embed many texts; the output has the input's order and length.
    pub async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<Embedded>, GatewayError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let (prepared, truncated): (Vec<String>, Vec<bool>) =
            texts.iter().map(|t| self.prepare(t)).unzip();
        let prepared = Arc::new(prepared);
        let provider = self.provider.clone();
        let pool = self.pool.clone();

        let vectors = self
            .with_retry(cancel, move |token| {
                let chunks = pool.install(|| {
                    prepared
                        .par_chunks(BATCH_CHUNK)
                        .map(|chunk| {
                            if token.is_cancelled() {
                                return Err(GatewayError::Cancelled);
                            }
                            let vectors = provider.embed_batch(chunk)?;
                            // each chunk must line up with its own inputs
                            if vectors.len() != chunk.len() {
                                return Err(EmbeddingError::CountMismatch {
                                    expected: chunk.len(),
                                    got: vectors.len(),
                                }
                                .into());
                            }
                            Ok(vectors)
                        })
                        .collect::<Result<Vec<_>, GatewayError>>()
                })?;

                Ok(chunks.into_iter().flatten().collect::<Vec<Vec<f32>>>())
            })
            .await?;

        Ok(vectors
            .into_iter()
            .zip(truncated)
            .map(|(vector, truncated)| Embedded { vector, truncated })
            .collect())
    }

    async fn with_retry<T, F>(&self, cancel: &CancelToken, op: F) -> Result<T, GatewayError>
    where
        T: Send + 'static,
        F: Fn(&CancelToken) -> Result<T, GatewayError> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        let mut attempt = 0u8;

        loop {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }

            let token = cancel.child();
            let task = tokio::task::spawn_blocking({
                let op = op.clone();
                let token = token.clone();
                move || op(&token)
            });

            let outcome = match tokio::time::timeout(self.timeout, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(EmbeddingError::Unavailable(format!(
                    "embedding task failed: {join_err}"
                ))
                .into()),
                Err(_) => {
                    // let the abandoned attempt stop at its next chunk
                    token.cancel();
                    Err(GatewayError::Timeout(self.timeout))
                }
            };

            match outcome {
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    log::warn!(
                        "embedding attempt {attempt} failed: {err}, retrying ({attempt}/{})",
                        self.max_retries
                    );
                }
                other => return other,
            }
        }
    }
}
