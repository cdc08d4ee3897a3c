//! Typed error taxonomy.
//!
//! | Error | Raised by | Recovery |
//! |-------|-----------|----------|
//! | [`IngestionError`] | chunking, extraction, embedding during ingest | abort the document, nothing persisted |
//! | [`IndexConsistencyError`] | dual indexing, persisted artifacts | roll back partial entries, fatal for the operation |
//! | [`QueryError`] | search path | empty results where safe, explicit failure otherwise |
//! | [`GenerationError`] | generation collaborator | fallback message recorded, failure surfaced |
//!
//! An unknown session id is deliberately *not* an error: read paths return
//! an empty history or `false`.

use std::time::Duration;

use thiserror::Error;

use crate::models::ChunkId;

/// Invalid chunking parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("chunk_size must be > 0")]
    ZeroChunkSize,
    #[error("chunk_overlap {overlap} leaves no room for content within chunk_size {chunk_size}")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },
}

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("document '{filename}' has no text content")]
    EmptyContent { filename: String },
    #[error("document '{filename}' produced no chunks")]
    NoChunks { filename: String },
    #[error("could not read '{filename}': {reason}")]
    Unreadable { filename: String, reason: String },
    #[error("'{filename}' is {size} bytes, above the {limit} byte limit")]
    TooLarge {
        filename: String,
        size: u64,
        limit: u64,
    },
    #[error("embedding failed for '{filename}': {reason}")]
    Embedding { filename: String, reason: String },
    #[error("index is not loaded: {0}")]
    IndexUnavailable(String),
    #[error(transparent)]
    Consistency(#[from] IndexConsistencyError),
    #[error("invalid chunking parameters: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndexConsistencyError {
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding count mismatch: sent {expected} texts, received {actual} vectors")]
    EmbeddingCountMismatch { expected: usize, actual: usize },
    #[error("chunk {0} is already indexed")]
    DuplicateChunk(ChunkId),
    #[error("document {0} is already indexed")]
    DuplicateDocument(String),
    #[error("vector for chunk {0} contains non-finite values")]
    NonFiniteVector(ChunkId),
    #[error("chunk {chunk} partially indexed: {reason}")]
    PartialIndex { chunk: ChunkId, reason: String },
    #[error("index artifact missing: {0}")]
    MissingArtifact(String),
    #[error("index artifacts disagree: {0}")]
    ArtifactMismatch(String),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("index is not loaded")]
    NotLoaded,
    #[error("alpha must be within [0, 1], got {0}")]
    InvalidAlpha(f64),
    #[error("query embedding failed: {0}")]
    Embedding(String),
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Consistency(#[from] IndexConsistencyError),
}

impl QueryError {
    /// Transient failures a caller may retry; `NotLoaded` and consistency
    /// failures are fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::Timeout(_) | QueryError::Embedding(_))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("generation was cancelled")]
    Cancelled,
    #[error("transient generation failure: {0}")]
    Transient(String),
    #[error("generation failed: {0}")]
    Permanent(String),
    #[error("malformed generation response: {0}")]
    Malformed(String),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerationError::Transient(_) | GenerationError::Timeout(_))
    }
}
