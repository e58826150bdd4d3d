//! Fuzzy similarity between instruction texts.
//!
//! The score blends two signals over normalized text:
//! - a character-sequence ratio (`2·matches / (|a| + |b|)`, from a
//!   minimal character diff), which rewards overall phrasing similarity
//! - the Jaccard overlap of whitespace token sets, which rewards shared
//!   vocabulary regardless of order
//!
//! Both are in [0, 1], so the weighted mean is too.

use std::collections::HashSet;

use similar::TextDiff;

use crate::normalize::TextNormalizer;

/// Weight of the character-sequence ratio.
pub const DEFAULT_SEQUENCE_WEIGHT: f64 = 0.6;

/// Weight of the token-set overlap.
pub const DEFAULT_TOKEN_WEIGHT: f64 = 0.4;

/// Score at or above which two instructions are duplicates.
pub const DEFAULT_MERGE_THRESHOLD: f64 = 0.85;

/// Scores closer than this are considered tied.
pub const TIE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityWeights {
    pub sequence: f64,
    pub token: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            sequence: DEFAULT_SEQUENCE_WEIGHT,
            token: DEFAULT_TOKEN_WEIGHT,
        }
    }
}

/// Computes a symmetric similarity score in [0, 1].
#[derive(Debug, Clone, Default)]
pub struct SimilarityScorer {
    normalizer: TextNormalizer,
    weights: SimilarityWeights,
}

impl SimilarityScorer {
    pub fn new(normalizer: TextNormalizer, weights: SimilarityWeights) -> Self {
        Self {
            normalizer,
            weights,
        }
    }

    pub fn normalizer(&self) -> &TextNormalizer {
        &self.normalizer
    }

    pub fn weights(&self) -> SimilarityWeights {
        self.weights
    }

    /// Normalize both inputs and score them.
    pub fn score(&self, a: &str, b: &str) -> f64 {
        let a = self.normalizer.normalize(a);
        let b = self.normalizer.normalize(b);
        self.score_normalized(&a, &b)
    }

    /// Score two strings that are already normalized.
    pub fn score_normalized(&self, a: &str, b: &str) -> f64 {
        // Canonical order makes the diff, and so the score, symmetric
        let (a, b) = if a <= b { (a, b) } else { (b, a) };

        let total = self.weights.sequence + self.weights.token;
        if total <= 0.0 {
            return 0.0;
        }

        let blended = self.weights.sequence * sequence_ratio(a, b)
            + self.weights.token * token_overlap(a, b);
        (blended / total).clamp(0.0, 1.0)
    }
}

/// Character-sequence similarity ratio. Two empty strings are identical.
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    f64::from(TextDiff::from_chars(a, b).ratio())
}

/// Jaccard similarity of whitespace-delimited token sets.
///
/// 1.0 when both sets are empty, 0.0 when exactly one is.
pub fn token_overlap(a: &str, b: &str) -> f64 {
    let left: HashSet<&str> = a.split_whitespace().collect();
    let right: HashSet<&str> = b.split_whitespace().collect();

    match (left.is_empty(), right.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        _ => {}
    }

    let shared = left.intersection(&right).count();
    let union = left.union(&right).count();
    shared as f64 / union as f64
}
