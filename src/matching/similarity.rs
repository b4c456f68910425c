//! Cosine similarity scoring.
//!
//! The [`Scorer`] trait is the seam for swapping in an index-backed scorer;
//! [`ExhaustiveScorer`] compares the query with every corpus vector.

use crate::matching::store::DocumentId;

/// Vectors with an L2 norm below this are treated as degenerate.
const MIN_NORM: f32 = 1e-12;

/// Errors that can occur while scoring.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimilarityError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot score a zero-norm or non-finite vector")]
    DegenerateEmbedding,
}

/// A scoring failure, naming the corpus document when one is at fault.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{source}")]
pub struct ScoreError {
    pub document: Option<DocumentId>,
    pub source: SimilarityError,
}

/// A corpus vector borrowed for scoring.
#[derive(Debug, Clone, Copy)]
pub struct CorpusVector<'a> {
    pub id: &'a DocumentId,
    pub embedding: &'a [f32],
}

/// Result of scoring one query against a corpus, in corpus order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreBatch {
    pub scored: Vec<(DocumentId, f32)>,
    /// Corpus documents with a degenerate vector, excluded from `scored`
    pub degenerate: Vec<DocumentId>,
}

/// Scores a query vector against a corpus.
pub trait Scorer: Send + Sync {
    /// Score every corpus vector.
    ///
    /// A degenerate query or a dimension mismatch with any corpus vector fails
    /// the whole call; a degenerate corpus vector is reported in
    /// [`ScoreBatch::degenerate`] instead.
    fn score_all(
        &self,
        query: &[f32],
        corpus: &[CorpusVector<'_>],
    ) -> Result<ScoreBatch, ScoreError>;
}

/// Brute-force `O(n·D)` scorer.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExhaustiveScorer;

impl Scorer for ExhaustiveScorer {
    fn score_all(
        &self,
        query: &[f32],
        corpus: &[CorpusVector<'_>],
    ) -> Result<ScoreBatch, ScoreError> {
        checked_norm(query).map_err(|source| ScoreError {
            document: None,
            source,
        })?;

        let mut batch = ScoreBatch {
            scored: Vec::with_capacity(corpus.len()),
            degenerate: Vec::new(),
        };

        for doc in corpus {
            match cosine(query, doc.embedding) {
                Ok(score) => batch.scored.push((doc.id.clone(), score)),
                Err(SimilarityError::DegenerateEmbedding) => batch.degenerate.push(doc.id.clone()),
                Err(source) => {
                    return Err(ScoreError {
                        document: Some(doc.id.clone()),
                        source,
                    })
                }
            }
        }

        Ok(batch)
    }
}

/// Cosine similarity of two vectors, clamped to `[-1, 1]`.
pub fn cosine(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }
    let norm_a = checked_norm(a)?;
    let norm_b = checked_norm(b)?;
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Check that a vector can be scored.
pub fn is_degenerate(v: &[f32]) -> bool {
    checked_norm(v).is_err()
}

fn checked_norm(v: &[f32]) -> Result<f32, SimilarityError> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm < MIN_NORM {
        return Err(SimilarityError::DegenerateEmbedding);
    }
    Ok(norm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> DocumentId {
        DocumentId::from(s)
    }

    #[test]
    fn test_identical_vectors_score_one() {
        let v = vec![0.3, -1.2, 4.0];
        assert!((cosine(&v, &v).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_orthogonal_vectors_score_zero() {
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_opposite_vectors_stay_negative() {
        let score = cosine(&[1.0, 1.0], &[-1.0, -1.0]).unwrap();
        assert!((score + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_scale_invariant() {
        let a = cosine(&[1.0, 2.0, 3.0], &[2.0, 1.0, 0.5]).unwrap();
        let b = cosine(&[10.0, 20.0, 30.0], &[2.0, 1.0, 0.5]).unwrap();
        assert!((a - b).abs() < 1e-6);
    }

    #[test]
    fn test_drift_is_clamped() {
        let v = vec![1e-3f32; 4096];
        let score = cosine(&v, &v).unwrap();
        assert!(score <= 1.0);
    }

    #[test]
    fn test_zero_vector_is_degenerate() {
        assert_eq!(
            cosine(&[0.0, 0.0], &[1.0, 0.0]),
            Err(SimilarityError::DegenerateEmbedding)
        );
        assert!(is_degenerate(&[0.0; 8]));
        assert!(is_degenerate(&[f32::NAN, 1.0]));
        assert!(!is_degenerate(&[0.0, 0.5]));
    }

    #[test]
    fn test_dimension_mismatch() {
        assert!(matches!(
            cosine(&[1.0, 0.0], &[1.0, 0.0, 0.0]),
            Err(SimilarityError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn test_score_all_keeps_corpus_order() {
        let (a, b, c) = (id("a"), id("b"), id("c"));
        let corpus = [
            CorpusVector { id: &a, embedding: &[0.0, 1.0] },
            CorpusVector { id: &b, embedding: &[1.0, 0.0] },
            CorpusVector { id: &c, embedding: &[1.0, 1.0] },
        ];

        let batch = ExhaustiveScorer.score_all(&[1.0, 0.0], &corpus).unwrap();
        let ids: Vec<&str> = batch.scored.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!((batch.scored[1].1 - 1.0).abs() < 1e-6);
        assert!(batch.degenerate.is_empty());
    }

    #[test]
    fn test_score_all_reports_degenerate_documents() {
        let (a, b) = (id("good"), id("empty"));
        let corpus = [
            CorpusVector { id: &a, embedding: &[1.0, 0.0] },
            CorpusVector { id: &b, embedding: &[0.0, 0.0] },
        ];

        let batch = ExhaustiveScorer.score_all(&[1.0, 0.0], &corpus).unwrap();
        assert_eq!(batch.scored.len(), 1);
        assert_eq!(batch.degenerate, vec![id("empty")]);
    }

    #[test]
    fn test_score_all_degenerate_query_fails() {
        let a = id("a");
        let corpus = [CorpusVector { id: &a, embedding: &[1.0, 0.0] }];
        let err = ExhaustiveScorer.score_all(&[0.0, 0.0], &corpus).unwrap_err();
        assert_eq!(err.document, None);
        assert_eq!(err.source, SimilarityError::DegenerateEmbedding);
    }

    #[test]
    fn test_score_all_dimension_mismatch_names_document() {
        let (a, b) = (id("a"), id("short"));
        let corpus = [
            CorpusVector { id: &a, embedding: &[1.0, 0.0, 0.0] },
            CorpusVector { id: &b, embedding: &[1.0, 0.0] },
        ];
        let err = ExhaustiveScorer.score_all(&[1.0, 0.0, 0.0], &corpus).unwrap_err();
        assert_eq!(err.document, Some(id("short")));
        assert!(matches!(err.source, SimilarityError::DimensionMismatch { expected: 3, got: 2 }));
    }
}
