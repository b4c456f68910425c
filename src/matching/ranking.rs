//! Ranking and threshold policy.
//!
//! Turns `(id, score)` pairs into the final response:
//! 1. Stable sort by score, highest first (ties keep corpus order)
//! 2. Keep the entries that clear the threshold
//! 3. If none do, fall back to the best `fallback_size` entries and say so
//! 4. Assign dense 1-based ranks

use serde::{Deserialize, Serialize};

use crate::matching::store::DocumentId;

/// How a score is compared against the threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdComparison {
    /// `score >= threshold`
    #[default]
    AtLeast,
    /// `score > threshold`
    Above,
}

impl ThresholdComparison {
    pub fn passes(self, score: f32, threshold: f32) -> bool {
        match self {
            Self::AtLeast => score >= threshold,
            Self::Above => score > threshold,
        }
    }
}

/// One ranked entry of a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub document_id: DocumentId,
    pub score: f32,
    /// 1-based, dense
    pub rank: usize,
    pub met_threshold: bool,
}

/// Ranked results plus whether they are only the best available.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResponse {
    pub results: Vec<MatchResult>,
    pub used_fallback: bool,
}

/// Stateless ranking policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingPolicy {
    pub fallback_size: usize,
    pub comparison: ThresholdComparison,
}

impl Default for RankingPolicy {
    fn default() -> Self {
        Self {
            fallback_size: crate::matching::DEFAULT_FALLBACK_SIZE,
            comparison: ThresholdComparison::AtLeast,
        }
    }
}

impl RankingPolicy {
    pub fn new(fallback_size: usize, comparison: ThresholdComparison) -> Self {
        Self {
            fallback_size,
            comparison,
        }
    }

    pub fn with_fallback_size(self, fallback_size: usize) -> Self {
        Self {
            fallback_size,
            ..self
        }
    }

    /// Rank scored documents against `threshold`.
    ///
    /// `scored` must be in corpus order; that order breaks score ties.
    /// A non-empty input never produces an empty response.
    pub fn rank(&self, mut scored: Vec<(DocumentId, f32)>, threshold: f32) -> MatchResponse {
        // sort_by is stable
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let qualifying = scored
            .iter()
            .filter(|(_, score)| self.comparison.passes(*score, threshold))
            .count();

        // Passing entries form a prefix of the sorted list
        let (kept, used_fallback) = if qualifying > 0 {
            (qualifying, false)
        } else {
            (self.fallback_size.min(scored.len()), true)
        };
        scored.truncate(kept);

        let results = scored
            .into_iter()
            .enumerate()
            .map(|(idx, (document_id, score))| MatchResult {
                met_threshold: self.comparison.passes(score, threshold),
                document_id,
                score,
                rank: idx + 1,
            })
            .collect();

        MatchResponse {
            results,
            used_fallback,
        }
    }
}
