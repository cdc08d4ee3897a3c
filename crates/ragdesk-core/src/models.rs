//! Core data models shared by ingestion, retrieval, and conversation.
//!
//! These types replace loosely-typed records with explicit structs. Only
//! [`Metadata`] stays open-ended, because caller-supplied document metadata
//! has no fixed schema.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Schema-less key/value metadata. A `BTreeMap` keeps serialization order
/// stable, which keeps persisted artifacts byte-for-byte reproducible.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Identity of a chunk: its parent document plus its position.
///
/// The derived ordering (document id, then chunk index) is the
/// deterministic tie-break used everywhere results are ranked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId {
    pub document_id: String,
    pub chunk_index: usize,
}

impl ChunkId {
    pub fn new(document_id: impl Into<String>, chunk_index: usize) -> Self {
        Self {
            document_id: document_id.into(),
            chunk_index,
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document_id, self.chunk_index)
    }
}

/// A raw document handed to ingestion.
///
/// Immutable once chunked; the text itself is not retained by the corpus,
/// only its chunks and a [`DocumentRecord`].
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub text: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Create a document with a fresh UUID and the current timestamp.
    pub fn new(filename: impl Into<String>, text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            filename: filename.into(),
            text: text.into(),
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// What the corpus remembers about an ingested document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub filename: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub chunk_count: usize,
    /// Sum of chunk content lengths, in characters.
    pub total_chars: usize,
    /// Length of the extracted text before chunking, in characters.
    pub original_length: usize,
}

/// A bounded, contiguous slice of a document's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub filename: String,
    pub content: String,
    /// SHA-256 of `content`, hex encoded.
    pub hash: String,
    /// Document metadata plus chunk-specific fields (`chunk_size`,
    /// `total_chunks`, `created_at`, ...).
    pub metadata: Metadata,
}

impl Chunk {
    pub fn id(&self) -> ChunkId {
        ChunkId::new(self.document_id.clone(), self.chunk_index)
    }
}

/// One ranked hit from the hybrid scorer.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    /// BM25 score, if the chunk was a lexical candidate.
    pub raw_lexical_score: Option<f64>,
    /// `1 / (1 + distance)`, if the chunk was a vector candidate.
    pub raw_vector_score: Option<f64>,
    /// Min-max normalized lexical score (0.0 when absent).
    pub lexical_norm: f64,
    /// Min-max normalized vector score (0.0 when absent).
    pub vector_norm: f64,
    /// `alpha * vector_norm + (1 - alpha) * lexical_norm`, in `[0, 1]`.
    pub fused_score: f64,
    /// 1-based position in the result list.
    pub rank: usize,
}

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_ordering_by_document_then_index() {
        let mut ids = vec![
            ChunkId::new("b", 0),
            ChunkId::new("a", 2),
            ChunkId::new("a", 10),
            ChunkId::new("a", 1),
        ];
        ids.sort();
        let rendered: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        assert_eq!(rendered, vec!["a#1", "a#2", "a#10", "b#0"]);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert!(json.contains("\"role\":\"assistant\""));
    }
}
