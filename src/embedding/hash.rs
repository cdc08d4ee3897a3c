//! Deterministic feature-hashing embedder.
//!
//! Needs no model, no network, and no API key, so it is the default
//! provider and the one every test uses. Each text becomes a signed,
//! L2-normalized bag of hashed features:
//!
//! - every token (lowercased, alphanumeric)
//! - every character trigram of `" token "`, so `reduced` and
//!   `reduction` land near each other
//!
//! Texts with no tokens embed to the zero vector.

use anyhow::Result;
use async_trait::async_trait;
use ragdesk_core::embedding::EmbeddingProvider;
use ragdesk_core::lexical::tokenize;

use super::Embedder;

pub const HASH_MODEL: &str = "feature-hash-v1";
pub const DEFAULT_HASH_DIMS: usize = 256;

/// Token features count this much more than a single trigram.
const TOKEN_WEIGHT: f32 = 2.0;

pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            self.add_feature(&mut v, token.as_bytes(), TOKEN_WEIGHT);

            let padded: Vec<char> = format!(" {} ", token).chars().collect();
            for window in padded.windows(3) {
                let gram: String = window.iter().collect();
                self.add_feature(&mut v, gram.as_bytes(), 1.0);
            }
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }

    fn add_feature(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let h = fnv1a(feature);
        let slot = (h % self.dims as u64) as usize;
        let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        v[slot] += sign * weight;
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMS)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        HASH_MODEL
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragdesk_core::vector::cosine_similarity;

    #[test]
    fn test_deterministic_and_normalized() {
        let e = HashEmbedder::new(64);
        let a = e.embed_one("Scope 3 emissions");
        let b = e.embed_one("Scope 3 emissions");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_related_words_are_closer() {
        let e = HashEmbedder::default();
        let q = e.embed_one("emissions reduction");
        let related = e.embed_one("Our company reduced emissions by 30% in 2023.");
        let unrelated = e.embed_one("The cafeteria serves vegetarian lunches.");
        assert!(cosine_similarity(&q, &related) > cosine_similarity(&q, &unrelated));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let e = HashEmbedder::new(8);
        assert!(e.embed_one("  ... ").iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let e = HashEmbedder::new(32);
        let texts = vec!["first".to_string(), "second".to_string()];
        let out = e.embed(&texts).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], e.embed_one("first"));
        assert_eq!(out[1], e.embed_one("second"));
    }
}
