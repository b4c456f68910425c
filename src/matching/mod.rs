//! Semantic matching between resumes and job descriptions.
//!
//! A request embeds one query document, compares it against a corpus (the
//! shared job catalog or a set of uploaded resumes) by cosine similarity and
//! ranks the corpus under a threshold policy with a best-available fallback.
//!
//! # Architecture
//!
//! - `normalize`: Text cleanup, truncation and content hashing
//! - `embeddings`: Provider trait, fastembed and feature-hashing providers
//! - `gateway`: Timeout, retry, cancellation and batching around a provider
//! - `store`: Documents and the versioned job catalog
//! - `similarity`: Cosine scoring of a corpus
//! - `ranking`: Threshold policy, ordering and fallback
//! - `orchestrator`: One match request end to end
//! - `storage`: Binary file I/O for vectors.bin persistence

mod embeddings;
mod errors;
mod gateway;
mod normalize;
mod orchestrator;
mod ranking;
mod similarity;
mod storage;
mod store;

pub use embeddings::{load_provider, EmbeddingError, EmbeddingProvider};
pub use errors::{ErrorKind, ExcludedDocument, MatchError};
pub use gateway::{CancelToken, EmbeddingGateway};
pub use orchestrator::{validate_threshold, MatchOrchestrator, MatchOutcome};
pub use ranking::{RankingPolicy, ThresholdComparison};
pub use similarity::{is_degenerate, ExhaustiveScorer};
pub use storage::VectorStorage;
pub use store::{ComputedEmbedding, Document, DocumentId, DocumentStore, JobCatalog};

#[cfg(test)]
pub use embeddings::HashingProvider;
#[cfg(test)]
pub use orchestrator::QueryRequest;
#[cfg(test)]
pub use similarity::cosine;
#[cfg(test)]
pub use store::CorpusSelector;

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Default similarity threshold when a caller does not send one
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Results returned when no document clears the threshold
pub const DEFAULT_FALLBACK_SIZE: usize = 10;
