//! In-memory BM25 keyword index.
//!
//! Scores chunks by term overlap with the query: terms frequent in a chunk
//! but rare across the corpus score highest, and long chunks are penalised
//! through length normalization.
//!
//! ```text
//! score(q, d) = Σ idf(t) · tf(t,d) · (k1 + 1) / (tf(t,d) + k1 · (1 - b + b · |d| / avgdl))
//! idf(t)      = ln(1 + (N - df(t) + 0.5) / (df(t) + 0.5))
//! ```
//!
//! Scores are unbounded and positive; normalization is the hybrid scorer's
//! job. A query with no matching terms returns an empty list.

use std::collections::HashMap;

use crate::error::IndexConsistencyError;
use crate::models::ChunkId;

/// BM25 term-frequency saturation.
const K1: f64 = 1.2;
/// BM25 length normalization strength.
const B: f64 = 0.75;

/// Lowercased alphanumeric tokens. Single characters are dropped unless
/// they are digits, so `"30%"` and `"2023"` still match.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .filter(|t| t.chars().count() > 1 || t.chars().all(|c| c.is_ascii_digit()))
        .map(|t| t.to_lowercase())
        .collect()
}

#[derive(Debug, Default, Clone)]
pub struct LexicalIndex {
    /// term → (chunk → term frequency)
    postings: HashMap<String, HashMap<ChunkId, u32>>,
    /// chunk → (term → term frequency), kept for removal
    forward: HashMap<ChunkId, HashMap<String, u32>>,
    /// chunk → token count
    lengths: HashMap<ChunkId, usize>,
    total_length: usize,
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.lengths.contains_key(id)
    }

    /// Add a chunk's text under `id`.
    ///
    /// Re-indexing an existing id is rejected; callers remove first.
    pub fn index(&mut self, id: ChunkId, text: &str) -> Result<(), IndexConsistencyError> {
        if self.contains(&id) {
            return Err(IndexConsistencyError::DuplicateChunk(id));
        }

        let tokens = tokenize(text);
        let mut tf: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.clone()).or_insert(0) += 1;
        }

        for (term, count) in &tf {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(id.clone(), *count);
        }
        self.total_length += tokens.len();
        self.lengths.insert(id.clone(), tokens.len());
        self.forward.insert(id, tf);
        Ok(())
    }

    /// Remove a chunk. Returns `false` if it was not indexed.
    pub fn remove(&mut self, id: &ChunkId) -> bool {
        let Some(terms) = self.forward.remove(id) else {
            return false;
        };
        for term in terms.keys() {
            if let Some(postings) = self.postings.get_mut(term) {
                postings.remove(id);
                if postings.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        if let Some(len) = self.lengths.remove(id) {
            self.total_length -= len;
        }
        true
    }

    /// Rank chunks against `text`, best first, at most `limit` entries.
    ///
    /// Equal scores are ordered by chunk id so results are reproducible.
    pub fn query(&self, text: &str, limit: usize) -> Vec<(ChunkId, f64)> {
        if limit == 0 || self.is_empty() {
            return Vec::new();
        }

        let mut terms = tokenize(text);
        terms.sort();
        terms.dedup();

        let n = self.len() as f64;
        let avgdl = (self.total_length as f64 / n).max(1.0);
        let mut scores: HashMap<&ChunkId, f64> = HashMap::new();

        for term in &terms {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let df = postings.len() as f64;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();

            for (id, tf) in postings {
                let tf = *tf as f64;
                let dl = self.lengths.get(id).copied().unwrap_or(0) as f64;
                let norm = tf + K1 * (1.0 - B + B * dl / avgdl);
                *scores.entry(id).or_insert(0.0) += idf * tf * (K1 + 1.0) / norm;
            }
        }

        let mut ranked: Vec<(ChunkId, f64)> = scores
            .into_iter()
            .filter(|(_, s)| *s > 0.0)
            .map(|(id, s)| (id.clone(), s))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(doc: &str, i: usize) -> ChunkId {
        ChunkId::new(doc, i)
    }

    fn sample() -> LexicalIndex {
        let mut idx = LexicalIndex::new();
        idx.index(id("a", 0), "Our company reduced emissions by 30% in 2023.")
            .unwrap();
        idx.index(id("b", 0), "Water usage increased at the main plant.")
            .unwrap();
        idx.index(
            id("c", 0),
            "Emissions emissions emissions reporting under the new directive.",
        )
        .unwrap();
        idx
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Reduced CO2 by 30% in 2023!"),
            vec!["reduced", "co2", "by", "30", "in", "2023"]
        );
        assert!(tokenize("a - ; ,").is_empty());
    }

    #[test]
    fn test_query_ranks_matching_chunks() {
        let idx = sample();
        let results = idx.query("emissions", 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, id("c", 0));
        assert!(results[0].1 > results[1].1);
        assert!(results.iter().all(|(_, s)| *s > 0.0));
    }

    #[test]
    fn test_rare_terms_weigh_more() {
        let idx = sample();
        let results = idx.query("water emissions", 10);
        let water = results.iter().find(|(i, _)| *i == id("b", 0)).unwrap().1;
        let a = results.iter().find(|(i, _)| *i == id("a", 0)).unwrap().1;
        assert!(water > a);
    }

    #[test]
    fn test_no_matches_is_empty() {
        let idx = sample();
        assert!(idx.query("biodiversity", 5).is_empty());
        assert!(LexicalIndex::new().query("anything", 5).is_empty());
    }

    #[test]
    fn test_limit_truncates() {
        let idx = sample();
        assert_eq!(idx.query("emissions", 1).len(), 1);
        assert!(idx.query("emissions", 0).is_empty());
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let mut idx = sample();
        let err = idx.index(id("a", 0), "again").unwrap_err();
        assert_eq!(err, IndexConsistencyError::DuplicateChunk(id("a", 0)));
    }

    #[test]
    fn test_remove_forgets_chunk() {
        let mut idx = sample();
        assert!(idx.remove(&id("c", 0)));
        assert!(!idx.remove(&id("c", 0)));
        assert_eq!(idx.len(), 2);
        let results = idx.query("emissions directive", 10);
        assert!(results.iter().all(|(i, _)| *i != id("c", 0)));
        assert!(idx.query("directive", 10).is_empty());
    }

    #[test]
    fn test_ties_broken_by_chunk_id() {
        let mut idx = LexicalIndex::new();
        idx.index(id("b", 1), "solar panels").unwrap();
        idx.index(id("a", 3), "solar panels").unwrap();
        idx.index(id("a", 2), "solar panels").unwrap();
        let order: Vec<ChunkId> = idx.query("solar", 10).into_iter().map(|r| r.0).collect();
        assert_eq!(order, vec![id("a", 2), id("a", 3), id("b", 1)]);
    }
}
