use serde::{Serialize, Serializer};
use std::time::Duration;

use crate::matching::gateway::GatewayError;
use crate::matching::similarity::{ScoreError, SimilarityError};
use crate::matching::store::DocumentId;

/// Stable, caller-facing error code. Serializes as [`ErrorKind::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    InvalidThreshold,
    InvalidFallbackSize,
    EmptyQueryDocument,
    DocumentUnreadable,
    DegenerateEmbedding,
    EmbeddingTimeout,
    ProviderUnavailable,
    EmptyCorpus,
    DimensionMismatch,
    Cancelled,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InvalidThreshold => "INVALID_THRESHOLD",
            Self::InvalidFallbackSize => "INVALID_FALLBACK_SIZE",
            Self::EmptyQueryDocument => "EMPTY_QUERY_DOCUMENT",
            Self::DocumentUnreadable => "DOCUMENT_UNREADABLE",
            Self::DegenerateEmbedding => "DEGENERATE_EMBEDDING",
            Self::EmbeddingTimeout => "EMBEDDING_TIMEOUT",
            Self::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            Self::EmptyCorpus => "EMPTY_CORPUS",
            Self::DimensionMismatch => "DIMENSION_MISMATCH",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MatchError {
    #[error("malformed request: {0}")]
    InvalidRequest(String),

    #[error("threshold must be between 0.0 and 1.0, got {0}")]
    InvalidThreshold(f32),

    #[error("fallback size must be greater than 0")]
    InvalidFallbackSize,

    #[error("query document has no usable text")]
    EmptyQueryDocument,

    #[error("document {document} is unreadable: {reason}")]
    DocumentUnreadable { document: DocumentId, reason: String },

    #[error("document {document} produced a degenerate embedding")]
    DegenerateEmbedding { document: DocumentId },

    #[error("embedding model timed out after {}s", .0.as_secs_f32())]
    EmbeddingTimeout(Duration),

    #[error("embedding model unavailable: {0}")]
    ProviderUnavailable(String),

    /// `excluded` lists the documents that were dropped on the way.
    #[error("no documents to match against")]
    EmptyCorpus { excluded: Vec<ExcludedDocument> },

    #[error(
        "embedding dimension mismatch{}: expected {}, got {}",
        .document.as_ref().map(|d| format!(" for {d}")).unwrap_or_default(),
        .expected,
        .got
    )]
    DimensionMismatch {
        document: Option<DocumentId>,
        expected: usize,
        got: usize,
    },

    #[error("request cancelled")]
    Cancelled,
}

impl MatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::InvalidThreshold(_) => ErrorKind::InvalidThreshold,
            Self::InvalidFallbackSize => ErrorKind::InvalidFallbackSize,
            Self::EmptyQueryDocument => ErrorKind::EmptyQueryDocument,
            Self::DocumentUnreadable { .. } => ErrorKind::DocumentUnreadable,
            Self::DegenerateEmbedding { .. } => ErrorKind::DegenerateEmbedding,
            Self::EmbeddingTimeout(_) => ErrorKind::EmbeddingTimeout,
            Self::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            Self::EmptyCorpus { .. } => ErrorKind::EmptyCorpus,
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// The document at fault, where there is one.
    pub fn document(&self) -> Option<&DocumentId> {
        match self {
            Self::DocumentUnreadable { document, .. } | Self::DegenerateEmbedding { document } => {
                Some(document)
            }
            Self::DimensionMismatch { document, .. } => document.as_ref(),
            _ => None,
        }
    }

    /// Documents left out before the request failed.
    pub fn excluded(&self) -> &[ExcludedDocument] {
        match self {
            Self::EmptyCorpus { excluded } => excluded,
            _ => &[],
        }
    }

    /// Put documents skipped before matching in front of the exclusions an
    /// empty corpus reports.
    pub fn with_skipped(self, mut skipped: Vec<ExcludedDocument>) -> Self {
        match self {
            Self::EmptyCorpus { excluded } => {
                skipped.extend(excluded);
                Self::EmptyCorpus { excluded: skipped }
            }
            other => other,
        }
    }
}

impl From<GatewayError> for MatchError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout(after) => Self::EmbeddingTimeout(after),
            GatewayError::Cancelled => Self::Cancelled,
            GatewayError::Provider(err) => Self::ProviderUnavailable(err.to_string()),
        }
    }
}

impl From<ScoreError> for MatchError {
    fn from(err: ScoreError) -> Self {
        match err.source {
            SimilarityError::DimensionMismatch { expected, got } => Self::DimensionMismatch {
                document: err.document,
                expected,
                got,
            },
            SimilarityError::DegenerateEmbedding => match err.document {
                Some(document) => Self::DegenerateEmbedding { document },
                None => Self::EmptyQueryDocument,
            },
        }
    }
}

/// A corpus document left out of ranking, reported next to the results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedDocument {
    pub document: DocumentId,
    pub kind: ErrorKind,
    pub reason: String,
}

impl MatchError {
    /// Report form of a per-document failure; `None` for request-level errors.
    pub fn into_excluded(self) -> Option<ExcludedDocument> {
        let document = self.document()?.clone();
        Some(ExcludedDocument {
            document,
            kind: self.kind(),
            reason: self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::embeddings::EmbeddingError;

    #[test]
    fn test_kind_serializes_as_code() {
        for kind in [
            ErrorKind::InvalidRequest,
            ErrorKind::InvalidThreshold,
            ErrorKind::InvalidFallbackSize,
            ErrorKind::EmptyQueryDocument,
            ErrorKind::EmptyCorpus,
            ErrorKind::DimensionMismatch,
            ErrorKind::Cancelled,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.code()));
        }
    }

    #[test]
    fn test_degenerate_query_becomes_empty_query() {
        let err: MatchError = ScoreError {
            document: None,
            source: SimilarityError::DegenerateEmbedding,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::EmptyQueryDocument);
    }

    #[test]
    fn test_dimension_mismatch_keeps_document() {
        let err: MatchError = ScoreError {
            document: Some(DocumentId::from("42")),
            source: SimilarityError::DimensionMismatch { expected: 3, got: 2 },
        }
        .into();
        assert_eq!(err.document().map(|d| d.as_str()), Some("42"));
        assert_eq!(err.to_string(), "embedding dimension mismatch for 42: expected 3, got 2");
    }

    #[test]
    fn test_gateway_errors_map_to_service_errors() {
        let err: MatchError = GatewayError::Timeout(Duration::from_secs(2)).into();
        assert_eq!(err.kind(), ErrorKind::EmbeddingTimeout);

        let err: MatchError =
            GatewayError::Provider(EmbeddingError::Unavailable("down".into())).into();
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    }

    #[test]
    fn test_excluded_document_only_for_document_errors() {
        let excluded = MatchError::DocumentUnreadable {
            document: DocumentId::from("cv.pdf"),
            reason: "not a pdf".into(),
        }
        .into_excluded()
        .unwrap();
        assert_eq!(excluded.kind, ErrorKind::DocumentUnreadable);
        assert_eq!(excluded.document.as_str(), "cv.pdf");

        assert!(MatchError::EmptyCorpus { excluded: vec![] }
            .into_excluded()
            .is_none());
    }

    #[test]
    fn test_skipped_documents_join_empty_corpus() {
        let unreadable = |name: &str| ExcludedDocument {
            document: DocumentId::from(name),
            kind: ErrorKind::DocumentUnreadable,
            reason: "not a pdf".into(),
        };
        let degenerate = ExcludedDocument {
            document: DocumentId::from("c.txt"),
            kind: ErrorKind::DegenerateEmbedding,
            reason: "empty".into(),
        };

        let err = MatchError::EmptyCorpus {
            excluded: vec![degenerate.clone()],
        }
        .with_skipped(vec![unreadable("a.pdf"), unreadable("b.pdf")]);
        let names: Vec<&str> = err.excluded().iter().map(|e| e.document.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf", "c.txt"]);

        let err = MatchError::Cancelled.with_skipped(vec![unreadable("a.pdf")]);
        assert!(err.excluded().is_empty());
    }
}
