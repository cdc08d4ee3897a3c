//! Hybrid score fusion.
//!
//! Takes the raw candidate lists from the lexical and vector indexes and
//! merges them into one ranking. The scorer never touches an index itself;
//! [`crate::corpus::Corpus::search`] fetches the candidates and hands them
//! over.
//!
//! # Algorithm
//!
//! 1. Each index is asked for `limit × candidate_multiplier` candidates.
//! 2. Both lists are min-max normalized to `[0, 1]` independently.
//! 3. For every chunk in either list:
//!    `fused = α × vector_norm + (1 − α) × lexical_norm`,
//!    where a chunk missing from one list contributes `0` for that term.
//! 4. Sort by fused score (desc), then chunk id (asc).
//! 5. Truncate to `limit` and assign 1-based ranks.
//!
//! At `α = 0` the vector list is not consulted at all (and at `α = 1` the
//! lexical list is not), so the extremes reproduce single-index ordering
//! exactly instead of mixing in zero-scored candidates from the other side.

use std::collections::{BTreeMap, HashMap};

use crate::error::QueryError;
use crate::models::ChunkId;

/// Retrieval tuning, decoupled from application config.
#[derive(Debug, Clone, Copy)]
pub struct HybridParams {
    /// `0.0` = pure lexical, `1.0` = pure vector.
    pub alpha: f64,
    /// Maximum results returned.
    pub limit: usize,
    /// Candidates fetched per index = `limit × candidate_multiplier`.
    pub candidate_multiplier: usize,
}

impl HybridParams {
    pub fn new(alpha: f64, limit: usize) -> Self {
        Self {
            alpha,
            limit,
            candidate_multiplier: 3,
        }
    }

    pub fn candidate_limit(&self) -> usize {
        self.limit.saturating_mul(self.candidate_multiplier.max(1))
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if !self.alpha.is_finite() || !(0.0..=1.0).contains(&self.alpha) {
            return Err(QueryError::InvalidAlpha(self.alpha));
        }
        Ok(())
    }

    pub fn uses_lexical(&self) -> bool {
        self.alpha < 1.0
    }

    pub fn uses_vector(&self) -> bool {
        self.alpha > 0.0
    }
}

/// One fused candidate before it is joined with its chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub id: ChunkId,
    pub raw_lexical: Option<f64>,
    pub raw_vector: Option<f64>,
    pub lexical_norm: f64,
    pub vector_norm: f64,
    pub fused: f64,
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// A constant list has no spread to normalize; every entry maps to `1.0`
/// when the shared score is positive (a genuine match) and to `0.0`
/// otherwise. An empty list yields an empty map.
pub fn normalize_scores(candidates: &[(ChunkId, f64)]) -> HashMap<ChunkId, f64> {
    if candidates.is_empty() {
        return HashMap::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.1)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.1)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|(id, raw)| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                if s_max > 0.0 {
                    1.0
                } else {
                    0.0
                }
            } else {
                (raw - s_min) / (s_max - s_min)
            };
            (id.clone(), norm.clamp(0.0, 1.0))
        })
        .collect()
}

/// Fuse lexical and vector candidates. `vector` holds similarities, not
/// distances.
pub fn fuse(
    lexical: &[(ChunkId, f64)],
    vector: &[(ChunkId, f64)],
    params: &HybridParams,
) -> Vec<FusedCandidate> {
    let alpha = params.alpha.clamp(0.0, 1.0);
    let lexical: &[(ChunkId, f64)] = if params.uses_lexical() { lexical } else { &[] };
    let vector: &[(ChunkId, f64)] = if params.uses_vector() { vector } else { &[] };

    let lex_norm = normalize_scores(lexical);
    let vec_norm = normalize_scores(vector);

    let mut merged: BTreeMap<&ChunkId, (Option<f64>, Option<f64>)> = BTreeMap::new();
    for (id, raw) in lexical {
        merged.entry(id).or_default().0 = Some(*raw);
    }
    for (id, raw) in vector {
        merged.entry(id).or_default().1 = Some(*raw);
    }

    let mut fused: Vec<FusedCandidate> = merged
        .into_iter()
        .map(|(id, (raw_lexical, raw_vector))| {
            let k = lex_norm.get(id).copied().unwrap_or(0.0);
            let v = vec_norm.get(id).copied().unwrap_or(0.0);
            FusedCandidate {
                id: id.clone(),
                raw_lexical,
                raw_vector,
                lexical_norm: k,
                vector_norm: v,
                fused: (alpha * v + (1.0 - alpha) * k).clamp(0.0, 1.0),
            }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    fused.truncate(params.limit);
    fused
}
