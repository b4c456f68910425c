//! Match orchestration.
//!
//! One request flows through:
//! validate → normalize → embed query → fetch/embed corpus → score → rank.
//!
//! Both the applicant flow (resume vs. job catalog) and the recruiter flow
//! (job description vs. uploaded resumes) are the same [`MatchOrchestrator::run`]
//! call with a different [`CorpusSelector`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::matching::errors::{ExcludedDocument, MatchError};
use crate::matching::gateway::{CancelToken, EmbeddingGateway};
use crate::matching::ranking::{MatchResponse, MatchResult, RankingPolicy};
use crate::matching::similarity::{is_degenerate, CorpusVector, Scorer};
use crate::matching::store::{
    ComputedEmbedding, CorpusSelector, Document, DocumentId, DocumentStore,
};

/// One match request.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: Document,
    pub corpus: CorpusSelector,
    pub threshold: f32,
    /// Overrides the policy's fallback size for this request
    pub fallback_size: Option<usize>,
}

/// Ranked response plus everything the caller needs to present it.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub response: MatchResponse,
    /// The document behind each entry of `response.results`, same order
    pub documents: Vec<Arc<Document>>,
    /// Corpus documents left out of ranking
    pub excluded: Vec<ExcludedDocument>,
    /// Whether the query text was cut to the model budget
    pub query_truncated: bool,
}

impl MatchOutcome {
    pub fn iter(&self) -> impl Iterator<Item = (&MatchResult, &Arc<Document>)> {
        self.response.results.iter().zip(self.documents.iter())
    }
}

/// Reject thresholds outside `[0, 1]` (and NaN).
pub fn validate_threshold(threshold: f32) -> Result<f32, MatchError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(MatchError::InvalidThreshold(threshold))
    }
}

pub struct MatchOrchestrator {
    gateway: EmbeddingGateway,
    scorer: Box<dyn Scorer>,
    store: Arc<dyn DocumentStore>,
    policy: RankingPolicy,
}

impl MatchOrchestrator {
    pub fn new(
        gateway: EmbeddingGateway,
        scorer: Box<dyn Scorer>,
        store: Arc<dyn DocumentStore>,
        policy: RankingPolicy,
    ) -> Self {
        Self {
            gateway,
            scorer,
            store,
            policy,
        }
    }

    pub fn gateway(&self) -> &EmbeddingGateway {
        &self.gateway
    }

    /// Rank the job catalog against a resume.
    pub async fn match_jobs(
        &self,
        resume: Document,
        threshold: f32,
        fallback_size: Option<usize>,
    ) -> Result<MatchOutcome, MatchError> {
        self.run(QueryRequest {
            query: resume,
            corpus: CorpusSelector::Jobs,
            threshold,
            fallback_size,
        })
        .await
    }

    /// Rank uploaded resumes against a job description.
    pub async fn match_candidates(
        &self,
        job: Document,
        resumes: Vec<Document>,
        threshold: f32,
        fallback_size: Option<usize>,
    ) -> Result<MatchOutcome, MatchError> {
        self.run(QueryRequest {
            query: job,
            corpus: CorpusSelector::Uploaded(resumes),
            threshold,
            fallback_size,
        })
        .await
    }

    /// Run one request. Dropping the returned future cancels its pending
    /// embedding work.
    pub async fn run(&self, request: QueryRequest) -> Result<MatchOutcome, MatchError> {
        let cancel = CancelToken::new();
        let _guard = cancel.drop_guard();
        self.run_with_cancel(request, &cancel).await
    }

    pub async fn run_with_cancel(
        &self,
        request: QueryRequest,
        cancel: &CancelToken,
    ) -> Result<MatchOutcome, MatchError> {
        let started = Instant::now();

        let threshold = validate_threshold(request.threshold)?;
        let policy = match request.fallback_size {
            Some(0) => return Err(MatchError::InvalidFallbackSize),
            Some(size) => self.policy.with_fallback_size(size),
            None => self.policy,
        };

        if request.query.normalized_text.is_empty() {
            return Err(MatchError::EmptyQueryDocument);
        }

        let corpus = self.store.get_corpus(request.corpus);
        if corpus.documents.is_empty() {
            return Err(MatchError::EmptyCorpus { excluded: vec![] });
        }

        let query = self
            .gateway
            .embed(&request.query.normalized_text, cancel)
            .await?;
        if is_degenerate(&query.vector) {
            return Err(MatchError::EmptyQueryDocument);
        }
        let expected = self.gateway.dimensions();
        if query.vector.len() != expected {
            return Err(MatchError::DimensionMismatch {
                document: None,
                expected,
                got: query.vector.len(),
            });
        }

        let mut excluded = Vec::new();
        let vectors = self
            .corpus_vectors(&corpus.documents, corpus.cacheable, cancel, &mut excluded)
            .await?;

        let batch = {
            let corpus_vectors: Vec<CorpusVector<'_>> = corpus
                .documents
                .iter()
                .zip(vectors.iter())
                .filter_map(|(doc, vector)| {
                    vector.as_deref().map(|embedding| CorpusVector {
                        id: &doc.id,
                        embedding,
                    })
                })
                .collect();
            self.scorer.score_all(&query.vector, &corpus_vectors)?
        };

        for document in batch.degenerate {
            log::warn!("excluding {document}: degenerate embedding");
            excluded.extend(MatchError::DegenerateEmbedding { document }.into_excluded());
        }

        if batch.scored.is_empty() {
            return Err(MatchError::EmptyCorpus { excluded });
        }

        let response = policy.rank(batch.scored, threshold);

        let by_id: HashMap<&DocumentId, &Arc<Document>> =
            corpus.documents.iter().map(|doc| (&doc.id, doc)).collect();
        let documents = response
            .results
            .iter()
            .filter_map(|result| by_id.get(&result.document_id).map(|doc| Arc::clone(doc)))
            .collect();

        log::debug!(
            "ranked {} of {} documents in {:?} (fallback: {})",
            response.results.len(),
            corpus.documents.len(),
            started.elapsed(),
            response.used_fallback
        );

        Ok(MatchOutcome {
            response,
            documents,
            excluded,
            query_truncated: query.truncated,
        })
    }

    /// Embedding for every corpus document, in corpus order; `None` for
    /// excluded documents.
    async fn corpus_vectors(
        &self,
        documents: &[Arc<Document>],
        cacheable: bool,
        cancel: &CancelToken,
        excluded: &mut Vec<ExcludedDocument>,
    ) -> Result<Vec<Option<Arc<[f32]>>>, MatchError> {
        let mut vectors: Vec<Option<Arc<[f32]>>> =
            documents.iter().map(|doc| doc.embedding.clone()).collect();

        let mut pending = Vec::new();
        for (idx, doc) in documents.iter().enumerate() {
            if doc.embedding.is_some() {
                continue;
            }
            if doc.normalized_text.is_empty() {
                log::warn!("excluding {}: no text to embed", doc.id);
                excluded.extend(
                    MatchError::DegenerateEmbedding {
                        document: doc.id.clone(),
                    }
                    .into_excluded(),
                );
                continue;
            }
            pending.push(idx);
        }

        if pending.is_empty() {
            return Ok(vectors);
        }

        let texts: Vec<String> = pending
            .iter()
            .map(|idx| documents[*idx].normalized_text.clone())
            .collect();
        log::debug!("embedding {} corpus documents", texts.len());
        let embedded = self.gateway.embed_batch(&texts, cancel).await?;

        let mut computed = Vec::new();
        for (idx, embedded) in pending.into_iter().zip(embedded) {
            let doc = &documents[idx];
            if embedded.truncated {
                log::debug!("{} truncated before embedding", doc.id);
            }
            let vector: Arc<[f32]> = embedded.vector.into();
            if cacheable && !is_degenerate(&vector) {
                computed.push(ComputedEmbedding {
                    id: doc.id.clone(),
                    content_hash: doc.content_hash,
                    embedding: vector.clone(),
                });
            }
            vectors[idx] = Some(vector);
        }

        if !computed.is_empty() {
            let stored = self.store.cache_embeddings(computed);
            log::info!("cached {stored} new catalog embeddings");
        }

        Ok(vectors)
    }
}
