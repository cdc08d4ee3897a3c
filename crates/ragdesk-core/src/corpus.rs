//! The chunk store and both retrieval indexes, kept in lock-step.
//!
//! Every chunk in a [`Corpus`] has exactly one lexical entry and exactly one
//! vector entry. Insertion is all-or-nothing per document: vectors are
//! validated before anything is written, and if either index still rejects
//! a chunk mid-way, every entry written for that document is removed again
//! before the error is returned. Deletion cascades to both indexes.
//!
//! The corpus is plain data with `&mut self` mutators; the application
//! wraps it in a `RwLock` for the single-writer, multi-reader discipline.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{IndexConsistencyError, QueryError};
use crate::hybrid::{self, HybridParams};
use crate::lexical::LexicalIndex;
use crate::models::{Chunk, ChunkId, DocumentRecord, SearchResult};
use crate::vector::{self, Metric, VectorIndex};

/// Aggregate counters over the whole corpus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusStats {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub total_characters: usize,
    pub average_chunk_size: f64,
    pub embedding_dims: usize,
}

#[derive(Debug, Clone)]
pub struct Corpus {
    documents: BTreeMap<String, DocumentRecord>,
    chunks: BTreeMap<ChunkId, Chunk>,
    lexical: LexicalIndex,
    vectors: VectorIndex,
}

impl Corpus {
    pub fn new(dims: usize, metric: Metric) -> Self {
        Self {
            documents: BTreeMap::new(),
            chunks: BTreeMap::new(),
            lexical: LexicalIndex::new(),
            vectors: VectorIndex::new(dims, metric),
        }
    }

    pub fn dims(&self) -> usize {
        self.vectors.dims()
    }

    pub fn metric(&self) -> Metric {
        self.vectors.metric()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Total indexed chunks across all documents.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn document(&self, id: &str) -> Option<&DocumentRecord> {
        self.documents.get(id)
    }

    /// Documents ordered by creation time, then id.
    pub fn documents(&self) -> Vec<&DocumentRecord> {
        let mut docs: Vec<&DocumentRecord> = self.documents.values().collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        docs
    }

    pub fn chunk(&self, id: &ChunkId) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    /// A document's chunks in `chunk_index` order.
    pub fn chunks_of<'a>(&'a self, document_id: &str) -> impl Iterator<Item = &'a Chunk> + 'a {
        let start = ChunkId::new(document_id, 0);
        let end = ChunkId::new(document_id, usize::MAX);
        self.chunks.range(start..=end).map(|(_, c)| c)
    }

    /// Every chunk with its vector, in chunk-id order.
    pub fn entries(&self) -> impl Iterator<Item = (&Chunk, Option<&[f32]>)> {
        self.chunks
            .iter()
            .map(move |(id, chunk)| (chunk, self.vectors.get(id)))
    }

    pub fn stats(&self) -> CorpusStats {
        let total_characters: usize = self.chunks.values().map(|c| c.content.chars().count()).sum();
        let total_chunks = self.chunks.len();
        CorpusStats {
            total_documents: self.documents.len(),
            total_chunks,
            total_characters,
            average_chunk_size: if total_chunks == 0 {
                0.0
            } else {
                total_characters as f64 / total_chunks as f64
            },
            embedding_dims: self.vectors.dims(),
        }
    }

    /// Index a document's chunks under both strategies.
    ///
    /// `embeddings[i]` belongs to `chunks[i]`. On error the corpus is left
    /// exactly as it was before the call.
    pub fn insert_document(
        &mut self,
        record: DocumentRecord,
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Vec<ChunkId>, IndexConsistencyError> {
        if self.documents.contains_key(&record.id) {
            return Err(IndexConsistencyError::DuplicateDocument(record.id));
        }
        if chunks.len() != embeddings.len() {
            return Err(IndexConsistencyError::EmbeddingCountMismatch {
                expected: chunks.len(),
                actual: embeddings.len(),
            });
        }
        for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
            let id = chunk.id();
            if chunk.document_id != record.id {
                return Err(IndexConsistencyError::PartialIndex {
                    chunk: id,
                    reason: format!("chunk belongs to document {}", chunk.document_id),
                });
            }
            if self.chunks.contains_key(&id) {
                return Err(IndexConsistencyError::DuplicateChunk(id));
            }
            self.vectors.validate(&id, embedding)?;
        }

        let mut written: Vec<ChunkId> = Vec::with_capacity(chunks.len());
        for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
            let id = chunk.id();
            if let Err(e) = self.lexical.index(id.clone(), &chunk.content) {
                self.rollback(&written);
                return Err(e);
            }
            if let Err(e) = self.vectors.add(id.clone(), &embedding) {
                self.lexical.remove(&id);
                self.rollback(&written);
                return Err(IndexConsistencyError::PartialIndex {
                    chunk: id,
                    reason: e.to_string(),
                });
            }
            self.chunks.insert(id.clone(), chunk);
            written.push(id);
        }

        debug!(document_id = %record.id, chunks = written.len(), "document indexed");
        self.documents.insert(record.id.clone(), record);
        Ok(written)
    }

    fn rollback(&mut self, written: &[ChunkId]) {
        warn!(chunks = written.len(), "rolling back partially indexed document");
        for id in written {
            self.lexical.remove(id);
            self.vectors.remove(id);
            self.chunks.remove(id);
        }
    }

    /// Remove a document and all of its chunks from both indexes.
    pub fn remove_document(&mut self, document_id: &str) -> Option<DocumentRecord> {
        let record = self.documents.remove(document_id)?;
        let ids: Vec<ChunkId> = self.chunks_of(document_id).map(|c| c.id()).collect();
        for id in &ids {
            self.lexical.remove(id);
            self.vectors.remove(id);
            self.chunks.remove(id);
        }
        debug!(document_id, chunks = ids.len(), "document removed");
        Some(record)
    }

    /// Check that the chunk store and both indexes hold the same entries.
    pub fn verify(&self) -> Result<(), IndexConsistencyError> {
        for id in self.chunks.keys() {
            let lexical = self.lexical.contains(id);
            let vector = self.vectors.contains(id);
            if !(lexical && vector) {
                return Err(IndexConsistencyError::PartialIndex {
                    chunk: id.clone(),
                    reason: format!("lexical entry: {}, vector entry: {}", lexical, vector),
                });
            }
        }
        if self.lexical.len() != self.chunks.len() || self.vectors.len() != self.chunks.len() {
            return Err(IndexConsistencyError::ArtifactMismatch(format!(
                "{} chunks, {} lexical entries, {} vectors",
                self.chunks.len(),
                self.lexical.len(),
                self.vectors.len()
            )));
        }
        Ok(())
    }

    /// Hybrid search over both indexes.
    ///
    /// `query_vector` is required whenever `params.alpha > 0`. A blank query
    /// returns no results.
    pub fn search(
        &self,
        query: &str,
        query_vector: Option<&[f32]>,
        params: &HybridParams,
    ) -> Result<Vec<SearchResult>, QueryError> {
        params.validate()?;
        if query.trim().is_empty() || params.limit == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let candidate_limit = params.candidate_limit();
        let lexical = if params.uses_lexical() {
            self.lexical.query(query, candidate_limit)
        } else {
            Vec::new()
        };

        let vector_hits: Vec<(ChunkId, f64)> = if params.uses_vector() {
            let qv = query_vector.ok_or_else(|| {
                QueryError::Embedding("a query vector is required when alpha > 0".to_string())
            })?;
            self.vectors
                .query(qv, candidate_limit)?
                .into_iter()
                .map(|(id, distance)| (id, vector::similarity(distance)))
                .collect()
        } else {
            Vec::new()
        };

        let fused = hybrid::fuse(&lexical, &vector_hits, params);
        let mut results = Vec::with_capacity(fused.len());
        for candidate in fused {
            let Some(chunk) = self.chunks.get(&candidate.id) else {
                return Err(IndexConsistencyError::PartialIndex {
                    chunk: candidate.id,
                    reason: "indexed but missing from the chunk store".to_string(),
                }
                .into());
            };
            results.push(SearchResult {
                chunk: chunk.clone(),
                raw_lexical_score: candidate.raw_lexical,
                raw_vector_score: candidate.raw_vector,
                lexical_norm: candidate.lexical_norm,
                vector_norm: candidate.vector_norm,
                fused_score: candidate.fused,
                rank: results.len() + 1,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_document, ChunkParams};
    use crate::models::{Document, Metadata};

    fn embed(text: &str) -> Vec<f32> {
        // Tiny deterministic embedding: letter frequencies for a-d.
        let mut v = vec![0.0f32; 4];
        for ch in text.to_lowercase().chars() {
            if let Some(i) = "abcd".find(ch) {
                v[i] += 1.0;
            }
        }
        v
    }

    fn ingest(corpus: &mut Corpus, filename: &str, text: &str) -> (String, Vec<ChunkId>) {
        let doc = Document::new(filename, text, Metadata::new());
        let params = ChunkParams::new(60, 10).unwrap();
        let chunks = chunk_document(&doc, params).unwrap();
        let embeddings = chunks.iter().map(|c| embed(&c.content)).collect();
        let record = DocumentRecord {
            id: doc.id.clone(),
            filename: doc.filename.clone(),
            metadata: doc.metadata.clone(),
            created_at: doc.created_at,
            chunk_count: chunks.len(),
            total_chars: chunks.iter().map(|c| c.content.chars().count()).sum(),
            original_length: text.chars().count(),
        };
        let ids = corpus.insert_document(record, chunks, embeddings).unwrap();
        (doc.id, ids)
    }

    #[test]
    fn test_insert_indexes_both_sides() {
        let mut corpus = Corpus::new(4, Metric::Euclidean);
        let (doc_id, ids) = ingest(
            &mut corpus,
            "a.txt",
            "Solar capacity doubled. Wind output was flat. Batteries were added at two sites.",
        );
        assert!(ids.len() > 1);
        assert_eq!(corpus.chunk_count(), ids.len());
        assert_eq!(corpus.document(&doc_id).unwrap().chunk_count, ids.len());
        corpus.verify().unwrap();
    }

    #[test]
    fn test_embedding_count_mismatch_leaves_corpus_untouched() {
        let mut corpus = Corpus::new(4, Metric::Euclidean);
        let doc = Document::new("x.txt", "Alpha beta.", Metadata::new());
        let chunks = chunk_document(&doc, ChunkParams::new(100, 0).unwrap()).unwrap();
        let record = DocumentRecord {
            id: doc.id.clone(),
            filename: doc.filename.clone(),
            metadata: Metadata::new(),
            created_at: doc.created_at,
            chunk_count: 1,
            total_chars: 11,
            original_length: 11,
        };
        let err = corpus.insert_document(record, chunks, vec![]).unwrap_err();
        assert!(matches!(err, IndexConsistencyError::EmbeddingCountMismatch { .. }));
        assert!(corpus.is_empty());
        assert_eq!(corpus.document_count(), 0);
    }

    #[test]
    fn test_bad_vector_rolls_back_every_chunk() {
        let mut corpus = Corpus::new(4, Metric::Euclidean);
        let doc = Document::new(
            "y.txt",
            "One sentence here. Another sentence there. A third one too.",
            Metadata::new(),
        );
        let chunks = chunk_document(&doc, ChunkParams::new(25, 0).unwrap()).unwrap();
        assert!(chunks.len() >= 2);
        let mut embeddings: Vec<Vec<f32>> = chunks.iter().map(|c| embed(&c.content)).collect();
        let last = embeddings.len() - 1;
        embeddings[last] = vec![1.0, 2.0];
        let record = DocumentRecord {
            id: doc.id.clone(),
            filename: doc.filename.clone(),
            metadata: Metadata::new(),
            created_at: doc.created_at,
            chunk_count: chunks.len(),
            total_chars: 0,
            original_length: 0,
        };
        let err = corpus.insert_document(record, chunks, embeddings).unwrap_err();
        assert!(matches!(err, IndexConsistencyError::DimensionMismatch { .. }));
        assert!(corpus.is_empty());
        assert!(corpus.search("sentence", None, &HybridParams::new(0.0, 5)).unwrap().is_empty());
        corpus.verify().unwrap();
    }

    #[test]
    fn test_remove_document_cascades() {
        let mut corpus = Corpus::new(4, Metric::Euclidean);
        let (first, _) = ingest(&mut corpus, "a.txt", "Zeppelins carried cargo across the sea.");
        let (_, second_ids) = ingest(&mut corpus, "b.txt", "Bicycles dominate the city commute.");

        assert!(corpus.remove_document(&first).is_some());
        assert!(corpus.remove_document(&first).is_none());
        assert_eq!(corpus.chunk_count(), second_ids.len());
        corpus.verify().unwrap();

        let results = corpus
            .search("zeppelins cargo", Some(&embed("zeppelins cargo")), &HybridParams::new(0.5, 10))
            .unwrap();
        assert!(results.iter().all(|r| r.chunk.document_id != first));
    }

    #[test]
    fn test_search_ranks_and_bounds() {
        let mut corpus = Corpus::new(4, Metric::Euclidean);
        ingest(&mut corpus, "a.txt", "Our company reduced emissions by 30% in 2023.");
        ingest(&mut corpus, "b.txt", "The cafeteria added a new vegetarian menu.");
        let q = "emissions reduction";
        let results = corpus
            .search(q, Some(&embed(q)), &HybridParams::new(0.5, 5))
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk.filename, "a.txt");
        assert!(results[0].fused_score > 0.0);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.rank, i + 1);
            assert!((0.0..=1.0).contains(&r.fused_score));
        }
    }

    #[test]
    fn test_search_requires_vector_when_alpha_positive() {
        let mut corpus = Corpus::new(4, Metric::Euclidean);
        ingest(&mut corpus, "a.txt", "Some text about data.");
        assert!(matches!(
            corpus.search("data", None, &HybridParams::new(0.5, 5)),
            Err(QueryError::Embedding(_))
        ));
        assert!(corpus.search("data", None, &HybridParams::new(0.0, 5)).is_ok());
    }

    #[test]
    fn test_blank_query_and_empty_corpus() {
        let corpus = Corpus::new(4, Metric::Euclidean);
        assert!(corpus.search("anything", Some(&[0.0; 4]), &HybridParams::new(0.5, 5)).unwrap().is_empty());
        assert!(corpus.search("   ", None, &HybridParams::new(0.5, 5)).unwrap().is_empty());
    }

    #[test]
    fn test_stats() {
        let mut corpus = Corpus::new(4, Metric::Euclidean);
        ingest(&mut corpus, "a.txt", "abcd abcd.");
        let stats = corpus.stats();
        assert_eq!(stats.total_documents, 1);
        assert_eq!(stats.total_chunks, 1);
        assert_eq!(stats.total_characters, 10);
        assert!((stats.average_chunk_size - 10.0).abs() < 1e-9);
        assert_eq!(stats.embedding_dims, 4);
    }
}
