//! Wiring of config, embedding model, job catalog and orchestrator shared by
//! the CLI commands and the HTTP server.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{self, CatalogFiles};
use crate::config::{Config, EmbeddingConfig};
use crate::matching::{
    load_provider, EmbeddingError, EmbeddingGateway, EmbeddingProvider, ExhaustiveScorer,
    JobCatalog, MatchOrchestrator, RankingPolicy,
};

pub struct Engine {
    config: Config,
    files: CatalogFiles,
    catalog: Arc<JobCatalog>,
    orchestrator: Arc<MatchOrchestrator>,
}

impl Engine {
    /// Load the embedding model and the job catalog. Blocks while the model
    /// downloads on first use.
    pub fn load(config: Config) -> anyhow::Result<Self> {
        let provider = load_provider_with_timeout(&config.embedding, config.base_path())?;
        let files = CatalogFiles::from_config(&config);
        let catalog = Arc::new(files.load(provider.as_ref())?);
        Self::with_parts(config, provider, files, catalog)
    }

    /// Assemble an engine around an already loaded provider and catalog.
    pub fn with_parts(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        files: CatalogFiles,
        catalog: Arc<JobCatalog>,
    ) -> anyhow::Result<Self> {
        let gateway = EmbeddingGateway::new(provider, &config.embedding)?;
        let policy = RankingPolicy::new(config.matching.fallback_size, config.matching.comparison);
        let orchestrator = Arc::new(MatchOrchestrator::new(
            gateway,
            Box::new(ExhaustiveScorer),
            catalog.clone(),
            policy,
        ));

        Ok(Self {
            config,
            files,
            catalog,
            orchestrator,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<JobCatalog> {
        &self.catalog
    }

    pub fn orchestrator(&self) -> &Arc<MatchOrchestrator> {
        &self.orchestrator
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        self.orchestrator.gateway().provider()
    }

    /// Embed every job without a stored embedding and persist the result.
    /// Returns `(embedded, saved)`.
    pub async fn index_jobs(&self) -> anyhow::Result<(usize, usize)> {
        let embedded = catalog::embed_pending(&self.catalog, self.orchestrator.gateway())
            .await
            .context("failed to embed jobs")?;
        let saved = self.save_vectors()?;
        Ok((embedded, saved))
    }

    pub fn save_vectors(&self) -> anyhow::Result<usize> {
        self.files.save(&self.catalog, self.provider().as_ref())
    }
}

/// Load the configured provider, giving up after
/// `embedding.download_timeout_secs`.
fn load_provider_with_timeout(
    config: &EmbeddingConfig,
    base_path: &std::path::Path,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    let timeout = Duration::from_secs(config.download_timeout_secs);
    let (tx, rx) = std::sync::mpsc::channel();

    let thread_config = config.clone();
    let cache_dir = base_path.to_path_buf();
    std::thread::Builder::new()
        .name("model-loader".to_string())
        .spawn(move || {
            let _ = tx.send(load_provider(&thread_config, cache_dir));
        })
        .map_err(|e| EmbeddingError::InitFailed(format!("failed to spawn model loader: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => Err(EmbeddingError::InitFailed(format!(
            "model '{}' did not load within {}s",
            config.model,
            timeout.as_secs()
        ))),
        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => Err(EmbeddingError::InitFailed(
            "model loader stopped unexpectedly".to_string(),
        )),
    }
}
