//! Job catalog files: the jobs CSV and the persisted vectors.bin.

use anyhow::{anyhow, Context};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::Config;
use crate::matching::{
    is_degenerate, CancelToken, ComputedEmbedding, Document, DocumentId, DocumentStore,
    EmbeddingGateway, EmbeddingProvider, JobCatalog, MatchError, VectorStorage,
};

const ID_COLUMN: &str = "job_id";
const DESCRIPTION_COLUMN: &str = "description";
const TITLE_COLUMN: &str = "title";

/// Read jobs from a CSV with `job_id` and `description` columns and an
/// optional `title` column, in file order.
///
/// Rows without a description are dropped, as are repeated job ids (first
/// one wins).
pub fn read_jobs(path: &Path) -> anyhow::Result<Vec<Document>> {
    let now = Instant::now();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
    let id_idx = column(ID_COLUMN).ok_or(anyhow!("jobs csv has no '{ID_COLUMN}' column"))?;
    let desc_idx = column(DESCRIPTION_COLUMN)
        .ok_or(anyhow!("jobs csv has no '{DESCRIPTION_COLUMN}' column"))?;
    let title_idx = column(TITLE_COLUMN);

    let mut jobs = vec![];
    let mut seen = HashSet::new();
    let mut empty = 0;

    for record in reader.records() {
        let record = record?;
        let id = record
            .get(id_idx)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(anyhow!("couldnt get job id at line {}", line_of(&record)))?;
        let description = record.get(desc_idx).unwrap_or_default();
        if description.trim().is_empty() {
            empty += 1;
            continue;
        }
        if !seen.insert(id.to_string()) {
            log::warn!("duplicate job id {id} in {}, keeping the first", path.display());
            continue;
        }

        let title = title_idx
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        jobs.push(Document::job(id, title, description));
    }

    if empty > 0 {
        log::info!("dropped {empty} jobs without a description");
    }
    log::debug!(
        "took {}ms to read {} jobs",
        now.elapsed().as_micros() as f64 / 1000.0,
        jobs.len()
    );

    Ok(jobs)
}

fn line_of(record: &csv::StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or_default()
}

/// Locations of the catalog files under the base path.
pub struct CatalogFiles {
    jobs_csv: PathBuf,
    vectors: VectorStorage,
}

impl CatalogFiles {
    pub fn new(jobs_csv: PathBuf, vectors_path: PathBuf) -> Self {
        Self {
            jobs_csv,
            vectors: VectorStorage::new(vectors_path),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.jobs_csv_path(), config.vectors_path())
    }

    /// Build the catalog from the CSV, attaching every stored embedding
    /// whose job text is unchanged. A missing CSV yields an empty catalog.
    pub fn load(&self, provider: &dyn EmbeddingProvider) -> anyhow::Result<JobCatalog> {
        if !self.jobs_csv.exists() {
            log::warn!(
                "no jobs catalog at {}, job matching will return no results",
                self.jobs_csv.display()
            );
            return Ok(JobCatalog::new());
        }

        let mut jobs = read_jobs(&self.jobs_csv)?;
        let stored = self.load_vectors(provider)?;

        let mut attached = 0;
        for job in jobs.iter_mut() {
            if let Some((content_hash, embedding)) = stored.get(&job.id) {
                if *content_hash == job.content_hash {
                    job.embedding = Some(embedding.clone().into());
                    attached += 1;
                }
            }
        }

        log::info!(
            "Loaded {} jobs from {} ({attached} with stored embeddings)",
            jobs.len(),
            self.jobs_csv.display()
        );

        Ok(JobCatalog::with_documents(jobs))
    }

    fn load_vectors(
        &self,
        provider: &dyn EmbeddingProvider,
    ) -> anyhow::Result<HashMap<DocumentId, (u64, Vec<f32>)>> {
        if !self.vectors.exists() {
            log::info!("No stored job embeddings, starting fresh");
            return Ok(HashMap::new());
        }

        match self.vectors.load(&provider.model_id(), provider.dimensions()) {
            Ok(vectors) => Ok(vectors
                .into_iter()
                .filter(|v| !is_degenerate(&v.embedding))
                .map(|v| (v.id, (v.content_hash, v.embedding)))
                .collect()),
            Err(err) if err.is_stale() => {
                log::warn!("Stored job embeddings are stale ({err}), re-embedding");
                Ok(HashMap::new())
            }
            Err(err) => Err(err).with_context(|| {
                format!("failed to load {}", self.vectors.path().display())
            }),
        }
    }

    /// Persist every embedding the catalog currently holds.
    pub fn save(
        &self,
        catalog: &JobCatalog,
        provider: &dyn EmbeddingProvider,
    ) -> anyhow::Result<usize> {
        let written = self
            .vectors
            .save(&catalog.snapshot(), &provider.model_id(), provider.dimensions())
            .with_context(|| format!("failed to write {}", self.vectors.path().display()))?;
        log::info!("Saved {written} job embeddings to {}", self.vectors.path().display());
        Ok(written)
    }
}

/// Embed every catalog job that has no embedding yet and store the results
/// in the catalog. Returns how many jobs were embedded.
pub async fn embed_pending(
    catalog: &JobCatalog,
    gateway: &EmbeddingGateway,
) -> Result<usize, MatchError> {
    let snapshot = catalog.snapshot();
    let pending: Vec<&Document> = snapshot
        .pending()
        .map(|doc| doc.as_ref())
        .filter(|doc| !doc.normalized_text.is_empty())
        .collect();

    if pending.is_empty() {
        log::info!("All {} jobs already embedded", snapshot.len());
        return Ok(0);
    }

    log::info!("Embedding {} of {} jobs", pending.len(), snapshot.len());
    let now = Instant::now();

    let texts: Vec<String> = pending.iter().map(|doc| doc.normalized_text.clone()).collect();
    let cancel = CancelToken::new();
    let embedded = gateway.embed_batch(&texts, &cancel).await?;

    let mut computed = Vec::with_capacity(embedded.len());
    for (doc, embedded) in pending.iter().zip(embedded) {
        if is_degenerate(&embedded.vector) {
            log::warn!("job {} has a degenerate embedding, skipping", doc.id);
            continue;
        }
        computed.push(ComputedEmbedding {
            id: doc.id.clone(),
            content_hash: doc.content_hash,
            embedding: embedded.vector.into(),
        });
    }

    let stored = catalog.cache_embeddings(computed);
    log::info!("Embedded {stored} jobs in {:?}", now.elapsed());
    Ok(stored)
}
