//! Embedding provider metadata.
//!
//! Concrete providers (feature hashing, OpenAI, Ollama, fastembed) live in
//! the `ragdesk` app crate; the core only needs to know which model produced
//! the vectors it stores and how long they are.

use crate::error::IndexConsistencyError;

/// Trait for embedding providers.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
}

/// Check a provider's response against the batch that was sent: one vector
/// per input text, each of `dims` floats.
pub fn check_batch(
    sent: usize,
    vectors: &[Vec<f32>],
    dims: usize,
) -> Result<(), IndexConsistencyError> {
    if vectors.len() != sent {
        return Err(IndexConsistencyError::EmbeddingCountMismatch {
            expected: sent,
            actual: vectors.len(),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(IndexConsistencyError::DimensionMismatch {
            expected: dims,
            actual: bad.len(),
        });
    }
    Ok(())
}
