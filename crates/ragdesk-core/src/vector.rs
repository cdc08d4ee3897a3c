//! Exhaustive nearest-neighbour index over fixed-dimension embeddings.
//!
//! Vectors are stored contiguously in one `Vec<f32>` (row-major, `dims`
//! floats per chunk) and every query scans all of them. Flat search is
//! exact, so top-k never depends on insertion order or index tuning.
//!
//! # Metrics
//!
//! | Metric | Distance | Range |
//! |--------|----------|-------|
//! | [`Metric::Euclidean`] | `‖a - b‖₂` | `[0, ∞)` |
//! | [`Metric::Cosine`] | `1 - cos(a, b)` | `[0, 2]` |
//!
//! Fusion consumes [`similarity`], `1 / (1 + distance)`, which maps either
//! metric into `(0, 1]`.
//!
//! The blob helpers at the bottom encode vectors as little-endian `f32`
//! bytes for the on-disk `vectors.bin` artifact.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::IndexConsistencyError;
use crate::models::ChunkId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Euclidean,
    Cosine,
}

impl Metric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Euclidean => euclidean_distance(a, b),
            Metric::Cosine => 1.0 - cosine_similarity(a, b),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Euclidean => "euclidean",
            Metric::Cosine => "cosine",
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "cosine" => Ok(Metric::Cosine),
            other => Err(format!("unknown metric '{}': use euclidean or cosine", other)),
        }
    }
}

/// Convert a distance into a fusion similarity in `(0, 1]`.
pub fn similarity(distance: f32) -> f64 {
    1.0 / (1.0 + distance.max(0.0) as f64)
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    dims: usize,
    metric: Metric,
    ids: Vec<ChunkId>,
    data: Vec<f32>,
    positions: HashMap<ChunkId, usize>,
}

impl VectorIndex {
    pub fn new(dims: usize, metric: Metric) -> Self {
        Self {
            dims,
            metric,
            ids: Vec::new(),
            data: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.positions.contains_key(id)
    }

    /// Check a vector would be accepted by [`VectorIndex::add`] without
    /// inserting it.
    pub fn validate(&self, id: &ChunkId, vector: &[f32]) -> Result<(), IndexConsistencyError> {
        if vector.len() != self.dims {
            return Err(IndexConsistencyError::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(IndexConsistencyError::NonFiniteVector(id.clone()));
        }
        if self.contains(id) {
            return Err(IndexConsistencyError::DuplicateChunk(id.clone()));
        }
        Ok(())
    }

    pub fn add(&mut self, id: ChunkId, vector: &[f32]) -> Result<(), IndexConsistencyError> {
        self.validate(&id, vector)?;
        self.positions.insert(id.clone(), self.ids.len());
        self.ids.push(id);
        self.data.extend_from_slice(vector);
        Ok(())
    }

    /// Remove a vector. The last row is swapped into the freed slot.
    pub fn remove(&mut self, id: &ChunkId) -> bool {
        let Some(pos) = self.positions.remove(id) else {
            return false;
        };
        let last = self.ids.len() - 1;
        if pos != last {
            let (head, tail) = self.data.split_at_mut(last * self.dims);
            head[pos * self.dims..(pos + 1) * self.dims].copy_from_slice(&tail[..self.dims]);
            self.ids.swap(pos, last);
            self.positions.insert(self.ids[pos].clone(), pos);
        }
        self.ids.pop();
        self.data.truncate(last * self.dims);
        true
    }

    pub fn get(&self, id: &ChunkId) -> Option<&[f32]> {
        self.positions
            .get(id)
            .map(|&pos| &self.data[pos * self.dims..(pos + 1) * self.dims])
    }

    /// Nearest `limit` chunks by ascending distance. Equal distances are
    /// ordered by chunk id.
    pub fn query(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<(ChunkId, f32)>, IndexConsistencyError> {
        if vector.len() != self.dims {
            return Err(IndexConsistencyError::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }
        if limit == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(ChunkId, f32)> = self
            .ids
            .iter()
            .enumerate()
            .map(|(pos, id)| {
                let row = &self.data[pos * self.dims..(pos + 1) * self.dims];
                (id.clone(), self.metric.distance(vector, row))
            })
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty, zero-norm, or
/// mismatched-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Encode a float vector as little-endian `f32` bytes.
///
/// ```rust
/// use ragdesk_core::vector::{blob_to_vec, vec_to_blob};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes. Trailing bytes that do not form a
/// full float are ignored; callers check `blob.len() % 4` first.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(doc: &str, i: usize) -> ChunkId {
        ChunkId::new(doc, i)
    }

    fn sample(metric: Metric) -> VectorIndex {
        let mut idx = VectorIndex::new(2, metric);
        idx.add(id("a", 0), &[0.0, 0.0]).unwrap();
        idx.add(id("a", 1), &[3.0, 4.0]).unwrap();
        idx.add(id("b", 0), &[1.0, 0.0]).unwrap();
        idx
    }

    #[test]
    fn test_euclidean_query_orders_by_distance() {
        let idx = sample(Metric::Euclidean);
        let results = idx.query(&[0.0, 0.0], 10).unwrap();
        let order: Vec<ChunkId> = results.iter().map(|r| r.0.clone()).collect();
        assert_eq!(order, vec![id("a", 0), id("b", 0), id("a", 1)]);
        assert!((results[2].1 - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_bounds() {
        assert!((similarity(0.0) - 1.0).abs() < 1e-12);
        assert!((similarity(1.0) - 0.5).abs() < 1e-12);
        let far = similarity(1e6);
        assert!(far > 0.0 && far < 1e-5);
    }

    #[test]
    fn test_cosine_metric() {
        let idx = sample(Metric::Cosine);
        let results = idx.query(&[2.0, 0.0], 1).unwrap();
        assert_eq!(results[0].0, id("b", 0));
        assert!(results[0].1.abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut idx = sample(Metric::Euclidean);
        let err = idx.add(id("c", 0), &[1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(
            err,
            IndexConsistencyError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
        assert!(idx.query(&[1.0], 3).is_err());
        assert_eq!(idx.len(), 3);
    }

    #[test]
    fn test_non_finite_and_duplicate_rejected() {
        let mut idx = sample(Metric::Euclidean);
        assert!(matches!(
            idx.add(id("c", 0), &[f32::NAN, 0.0]),
            Err(IndexConsistencyError::NonFiniteVector(_))
        ));
        assert!(matches!(
            idx.add(id("a", 0), &[9.0, 9.0]),
            Err(IndexConsistencyError::DuplicateChunk(_))
        ));
    }

    #[test]
    fn test_remove_swaps_last_row() {
        let mut idx = sample(Metric::Euclidean);
        assert!(idx.remove(&id("a", 0)));
        assert!(!idx.remove(&id("a", 0)));
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.get(&id("b", 0)), Some(&[1.0f32, 0.0][..]));
        assert_eq!(idx.get(&id("a", 1)), Some(&[3.0f32, 4.0][..]));
        let results = idx.query(&[0.0, 0.0], 10).unwrap();
        assert!(results.iter().all(|r| r.0 != id("a", 0)));
        assert!(idx.remove(&id("b", 0)));
        assert!(idx.remove(&id("a", 1)));
        assert!(idx.is_empty());
    }

    #[test]
    fn test_equal_distances_tie_break_by_id() {
        let mut idx = VectorIndex::new(1, Metric::Euclidean);
        idx.add(id("z", 0), &[1.0]).unwrap();
        idx.add(id("a", 5), &[-1.0]).unwrap();
        let results = idx.query(&[0.0], 2).unwrap();
        assert_eq!(results[0].0, id("a", 5));
        assert_eq!(results[1].0, id("z", 0));
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("cosine".parse::<Metric>().unwrap(), Metric::Cosine);
        assert_eq!("l2".parse::<Metric>().unwrap(), Metric::Euclidean);
        assert!("dot".parse::<Metric>().is_err());
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }
}
