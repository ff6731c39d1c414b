/// Weighted score fusion for hybrid search
///
/// Keyword (`ts_rank`) and semantic (cosine similarity) scores live on unrelated scales,
/// so each list is min-max normalized to [0, 1] independently before weighting:
///
///   combined = fts_weight * keyword_norm + semantic_weight * semantic_norm
///
/// A document missing from one list contributes 0.0 on that side. Weights are relative:
/// they need not sum to 1, and (2, 2) ranks exactly like (0.5, 0.5).
///
/// Pure functions, no I/O.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::{FusedResult, MatchSource, ScoredCandidate};
use crate::errors::VaultError;

/// Relative weights of the two retrieval legs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub fts: f64,
    pub semantic: f64,
}

impl FusionWeights {
    /// Build validated weights. Fails with `InvalidWeight` for negative or non-finite values.
    pub fn new(fts: f64, semantic: f64) -> Result<Self, VaultError> {
        let weights = FusionWeights { fts, semantic };
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> Result<(), VaultError> {
        check_weight("fts_weight", self.fts)?;
        check_weight("semantic_weight", self.semantic)
    }
}

fn check_weight(name: &'static str, value: f64) -> Result<(), VaultError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(VaultError::InvalidWeight { name, value })
    }
}

/// Min-max normalization over a slice of values.
///
/// Edge case: if max == min (including single-element slices), returns 1.0 for every
/// finite value so a lone result or all-identical scores count as the best in their list.
/// Non-finite values are left out of the min/max and normalize to 0.0.
pub fn normalize(values: &[f64]) -> Vec<f64> {
    let finite = values.iter().copied().filter(|v| v.is_finite());
    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let span = max - min;

    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                0.0
            } else if span.abs() < f64::EPSILON {
                1.0
            } else {
                (v - min) / span
            }
        })
        .collect()
}

/// First occurrence of each id with its normalized score.
fn normalized_by_id(candidates: &[ScoredCandidate]) -> BTreeMap<&str, (f64, &ScoredCandidate)> {
    let mut seen = HashSet::new();
    let unique: Vec<&ScoredCandidate> = candidates
        .iter()
        .filter(|c| seen.insert(c.id.as_str()))
        .collect();
    let raw: Vec<f64> = unique.iter().map(|c| c.score).collect();

    unique
        .into_iter()
        .zip(normalize(&raw))
        .map(|(c, norm)| (c.id.as_str(), (norm, c)))
        .collect()
}

/// Fuse keyword and semantic candidates into one ranked list.
///
/// Steps:
/// 1. Reject negative / non-finite weights and a zero limit before reading either list
/// 2. Normalize each list independently via min-max
/// 3. Union by id; a missing side scores 0.0
/// 4. Weighted sum
/// 5. Sort by combined score descending. On a tie, documents found by a leg with
///    non-zero weight come before documents only found by a zero-weight leg, then id ascending
/// 6. Truncate to `limit` and assign 1-based ranks
pub fn fuse(
    keyword: &[ScoredCandidate],
    semantic: &[ScoredCandidate],
    fts_weight: f64,
    semantic_weight: f64,
    limit: usize,
) -> Result<Vec<FusedResult>, VaultError> {
    let weights = FusionWeights::new(fts_weight, semantic_weight)?;
    if limit == 0 {
        return Err(VaultError::validation("limit", "limit must be at least 1"));
    }

    // id -> (keyword_norm, semantic_norm, display source); keyword hits carry the snippet
    let mut union: BTreeMap<&str, (Option<f64>, Option<f64>, &ScoredCandidate)> = BTreeMap::new();
    for (id, (norm, c)) in normalized_by_id(keyword) {
        union.insert(id, (Some(norm), None, c));
    }
    for (id, (norm, c)) in normalized_by_id(semantic) {
        union.entry(id).or_insert((None, None, c)).1 = Some(norm);
    }

    // Evidence means the document was found by a leg whose weight counts
    let mut ranked: Vec<(bool, FusedResult)> = union
        .into_iter()
        .map(|(id, (k, s, display))| {
            let keyword_score = k.unwrap_or(0.0);
            let semantic_score = s.unwrap_or(0.0);
            let match_source = match (k, s) {
                (Some(_), Some(_)) => MatchSource::Both,
                (Some(_), None) => MatchSource::KeywordOnly,
                _ => MatchSource::SemanticOnly,
            };
            let evidence =
                (k.is_some() && weights.fts > 0.0) || (s.is_some() && weights.semantic > 0.0);

            let result = FusedResult {
                id: id.to_string(),
                score: weights.fts * keyword_score + weights.semantic * semantic_score,
                rank: 0,
                keyword_score,
                semantic_score,
                match_source,
                title: display.title.clone(),
                doc_type: display.doc_type,
                snippet: display.snippet.clone(),
            };
            (evidence, result)
        })
        .collect();

    ranked.sort_by(compare_ranked);
    ranked.truncate(limit);
    let fused = ranked
        .into_iter()
        .enumerate()
        .map(|(i, (_, mut result))| {
            result.rank = i + 1;
            result
        })
        .collect();

    Ok(fused)
}

/// Score descending, then weighted evidence first, then id ascending.
fn compare_ranked(a: &(bool, FusedResult), b: &(bool, FusedResult)) -> Ordering {
    b.1.score
        .total_cmp(&a.1.score)
        .then_with(|| b.0.cmp(&a.0))
        .then_with(|| a.1.id.cmp(&b.1.id))
}
