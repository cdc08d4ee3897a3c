//! Index lifecycle: ingestion, deletion, search, and persistence wiring.
//!
//! [`IndexManager`] owns the [`Corpus`] behind a `RwLock` (single writer,
//! many readers) together with the embedding collaborator. The slow part of
//! ingestion, embedding, runs before the write lock is taken, so searches
//! keep running while a document is being embedded and only see it once it
//! is fully indexed.
//!
//! # Ingestion
//!
//! 1. Chunk the text (`chunk_size` / `chunk_overlap`).
//! 2. Embed every chunk in `batch_size` batches, outside any lock.
//! 3. Insert chunks and vectors into both indexes under the write lock;
//!    the corpus rolls back on any consistency failure.
//! 4. Save the index directory when `[index] autosave` is on. A directory
//!    ingest saves once after the whole batch.
//!
//! Saving encodes the corpus under the read lock, then writes the files on
//! the blocking pool. Saves are serialized so an older generation never
//! lands on disk after a newer one.
//!
//! # Unavailable index
//!
//! When the persisted index cannot be loaded, [`IndexManager::unavailable`]
//! builds a manager that refuses searches ([`QueryError::NotLoaded`]) and
//! writes, and never saves over the damaged artifacts.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use ragdesk_core::chunk::{chunk_document, ChunkParams};
use ragdesk_core::corpus::{Corpus, CorpusStats};
use ragdesk_core::error::{IndexConsistencyError, IngestionError, QueryError};
use ragdesk_core::hybrid::HybridParams;
use ragdesk_core::models::{ChunkId, Document, DocumentRecord, Metadata, SearchResult};

use crate::config::Config;
use crate::embedding::{embed_all, embed_query, Embedder};
use crate::extract::extract_file;
use crate::persist::{self, IndexSpec, Manifest, PersistError};

/// Result of indexing one document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub document_id: String,
    pub filename: String,
    pub chunk_ids: Vec<ChunkId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Per-file results of a directory ingest. One bad file never aborts the
/// rest of the batch.
#[derive(Debug, Default, Serialize)]
pub struct IngestSummary {
    pub ingested: Vec<IngestOutcome>,
    pub failed: Vec<FileFailure>,
    pub skipped: usize,
}

impl IngestSummary {
    pub fn total_chunks(&self) -> usize {
        self.ingested.iter().map(|o| o.chunk_ids.len()).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    #[serde(flatten)]
    pub corpus: CorpusStats,
    pub embedding_model: String,
    pub metric: &'static str,
    pub persisted: bool,
}

pub struct IndexManager {
    corpus: RwLock<Corpus>,
    embedder: Arc<dyn Embedder>,
    params: ChunkParams,
    spec: IndexSpec,
    dir: Option<PathBuf>,
    autosave: bool,
    batch_size: usize,
    query_timeout: Duration,
    max_file_bytes: u64,
    include_globs: Vec<String>,
    exclude_globs: Vec<String>,
    load_error: Option<String>,
    save_lock: Mutex<()>,
    saves: AtomicU64,
}

impl IndexManager {
    /// Build a manager, loading `[index] dir` when it holds a saved index.
    pub fn open(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self, PersistError> {
        let mut manager = Self::empty(config, embedder)?;
        if let Some(dir) = manager.dir.clone() {
            if let Some((corpus, manifest)) = persist::load(&dir, &manager.spec)? {
                info!(
                    dir = %dir.display(),
                    documents = corpus.document_count(),
                    chunks = corpus.chunk_count(),
                    saved_at = %manifest.saved_at,
                    "opened index"
                );
                manager.corpus = RwLock::new(corpus);
            } else {
                info!(dir = %dir.display(), "starting a new index");
            }
        }
        Ok(manager)
    }

    /// A manager for an index that failed to load. Reads return nothing,
    /// searches fail with [`QueryError::NotLoaded`], writes are refused.
    pub fn unavailable(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        reason: impl Into<String>,
    ) -> Result<Self, PersistError> {
        let mut manager = Self::empty(config, embedder)?;
        manager.load_error = Some(reason.into());
        Ok(manager)
    }

    fn empty(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self, PersistError> {
        let params = ChunkParams::new(config.chunking.chunk_size, config.chunking.chunk_overlap)
            .map_err(|e| IndexConsistencyError::ArtifactMismatch(e.to_string()))?;
        let spec = IndexSpec {
            model: embedder.model_name().to_string(),
            dims: embedder.dims(),
            metric: config.retrieval.metric,
            chunk_size: params.chunk_size(),
            chunk_overlap: params.overlap(),
        };
        Ok(Self {
            corpus: RwLock::new(Corpus::new(spec.dims, spec.metric)),
            embedder,
            params,
            spec,
            dir: config.index.dir.clone(),
            autosave: config.index.autosave,
            batch_size: config.embedding.batch_size,
            query_timeout: Duration::from_secs(config.embedding.timeout_secs.max(1)),
            max_file_bytes: config.ingest.max_file_size_bytes(),
            include_globs: config.ingest.include_globs.clone(),
            exclude_globs: config.ingest.exclude_globs.clone(),
            load_error: None,
            save_lock: Mutex::new(()),
            saves: AtomicU64::new(0),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Corpus> {
        self.corpus.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Corpus> {
        self.corpus.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn chunk_params(&self) -> ChunkParams {
        self.params
    }

    pub fn is_loaded(&self) -> bool {
        self.load_error.is_none()
    }

    /// Why the index is unavailable, if it is.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    // ============ Ingestion ============

    /// Chunk, embed, and index one document.
    ///
    /// On any error nothing is added to either index.
    pub async fn ingest_text(
        &self,
        filename: &str,
        text: &str,
        metadata: Metadata,
    ) -> Result<IngestOutcome, IngestionError> {
        let outcome = self.index_text(filename, text, metadata).await?;
        self.autosave().await;
        Ok(outcome)
    }

    async fn index_text(
        &self,
        filename: &str,
        text: &str,
        metadata: Metadata,
    ) -> Result<IngestOutcome, IngestionError> {
        if let Some(reason) = &self.load_error {
            return Err(IngestionError::IndexUnavailable(reason.clone()));
        }
        let start = Instant::now();
        let doc = Document::new(filename, text, metadata);
        let chunks = chunk_document(&doc, self.params)?;

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = embed_all(self.embedder.as_ref(), &texts, self.batch_size)
            .await
            .map_err(|e| match e.downcast_ref::<IndexConsistencyError>() {
                Some(consistency) => IngestionError::Consistency(consistency.clone()),
                None => IngestionError::Embedding {
                    filename: filename.to_string(),
                    reason: format!("{:#}", e),
                },
            })?;

        let record = DocumentRecord {
            id: doc.id.clone(),
            filename: doc.filename.clone(),
            metadata: doc.metadata.clone(),
            created_at: doc.created_at,
            chunk_count: chunks.len(),
            total_chars: chunks.iter().map(|c| c.content.chars().count()).sum(),
            original_length: doc.text.chars().count(),
        };

        let chunk_ids = self.write().insert_document(record, chunks, vectors)?;
        info!(
            document_id = %doc.id,
            filename,
            chunks = chunk_ids.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "document ingested"
        );

        Ok(IngestOutcome {
            document_id: doc.id,
            filename: doc.filename,
            chunk_ids,
        })
    }

    /// Extract and ingest a single file. Adds `file_size` and
    /// `source_path` to the caller's metadata.
    pub async fn ingest_file(
        &self,
        path: &Path,
        metadata: Metadata,
    ) -> Result<IngestOutcome, IngestionError> {
        let outcome = self.index_file(path, metadata).await?;
        self.autosave().await;
        Ok(outcome)
    }

    async fn index_file(
        &self,
        path: &Path,
        metadata: Metadata,
    ) -> Result<IngestOutcome, IngestionError> {
        let file = extract_file(path, self.max_file_bytes)?;
        debug!(path = %path.display(), format = file.format.as_str(), bytes = file.size, "extracted");

        let mut metadata = metadata;
        metadata.insert("file_size".to_string(), serde_json::json!(file.size));
        metadata.insert(
            "source_path".to_string(),
            serde_json::json!(path.display().to_string()),
        );
        self.index_text(&file.filename, &file.text, metadata).await
    }

    /// Ingest a file, or every matching file under a directory.
    ///
    /// Directory entries are filtered by `[ingest] include_globs` and
    /// `exclude_globs`, matched against the path relative to `root`, and
    /// visited in sorted order. An explicitly named file skips the glob
    /// filters.
    pub async fn ingest_path(
        &self,
        root: &Path,
        metadata: &Metadata,
    ) -> anyhow::Result<IngestSummary> {
        let mut summary = IngestSummary::default();

        if root.is_file() {
            self.record_file(root, metadata, &mut summary).await;
            if !summary.ingested.is_empty() {
                self.autosave().await;
            }
            return Ok(summary);
        }
        if !root.is_dir() {
            anyhow::bail!("Path does not exist: {}", root.display());
        }

        let include_set = build_globset(&self.include_globs)?;
        let exclude_set = build_globset(&self.exclude_globs)?;

        let mut files = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let rel_str = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string();
            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                summary.skipped += 1;
                continue;
            }
            files.push(path.to_path_buf());
        }

        for path in files {
            self.record_file(&path, metadata, &mut summary).await;
        }
        if !summary.ingested.is_empty() {
            self.autosave().await;
        }
        info!(
            root = %root.display(),
            ingested = summary.ingested.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped,
            "directory ingest finished"
        );
        Ok(summary)
    }

    async fn record_file(&self, path: &Path, metadata: &Metadata, summary: &mut IngestSummary) {
        match self.index_file(path, metadata.clone()).await {
            Ok(outcome) => summary.ingested.push(outcome),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "file not ingested");
                summary.failed.push(FileFailure {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                });
            }
        }
    }

    // ============ Deletion & listing ============

    /// Remove a document and every one of its chunks from both indexes.
    /// Returns `Ok(None)` for an unknown id.
    pub async fn delete_document(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentRecord>, QueryError> {
        if self.load_error.is_some() {
            return Err(QueryError::NotLoaded);
        }
        let removed = self.write().remove_document(document_id);
        if let Some(record) = &removed {
            info!(document_id, chunks = record.chunk_count, "document deleted");
            self.autosave().await;
        }
        Ok(removed)
    }

    /// Documents, oldest first.
    pub fn list_documents(&self) -> Vec<DocumentRecord> {
        self.read().documents().into_iter().cloned().collect()
    }

    pub fn document(&self, document_id: &str) -> Option<DocumentRecord> {
        self.read().document(document_id).cloned()
    }

    /// Total indexed chunks across all documents.
    pub fn get_document_count(&self) -> usize {
        self.read().chunk_count()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            corpus: self.read().stats(),
            embedding_model: self.spec.model.clone(),
            metric: self.spec.metric.as_str(),
            persisted: self.dir.is_some(),
        }
    }

    // ============ Search ============

    /// Hybrid search. `alpha = 0` is pure lexical and never calls the
    /// embedder; any `alpha > 0` embeds the query first, even on an empty
    /// index, since a document may land before the corpus is read. The
    /// embedding is bounded by `[embedding] timeout_secs`
    /// ([`QueryError::Timeout`]).
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        alpha: f64,
        candidate_multiplier: usize,
    ) -> Result<Vec<SearchResult>, QueryError> {
        if self.load_error.is_some() {
            return Err(QueryError::NotLoaded);
        }
        let params = HybridParams {
            alpha,
            limit,
            candidate_multiplier,
        };
        params.validate()?;
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let query_vector = if params.uses_vector() {
            let embedded = tokio::time::timeout(
                self.query_timeout,
                embed_query(self.embedder.as_ref(), query),
            )
            .await
            .map_err(|_| QueryError::Timeout(self.query_timeout))?;
            Some(embedded.map_err(|e| QueryError::Embedding(format!("{:#}", e)))?)
        } else {
            None
        };

        let results = self.read().search(query, query_vector.as_deref(), &params)?;
        debug!(
            query,
            alpha,
            results = results.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "search"
        );
        Ok(results)
    }

    // ============ Persistence ============

    /// Write the index directory. Returns `Ok(None)` for an in-memory index.
    pub async fn save(&self) -> Result<Option<Manifest>, PersistError> {
        let Some(dir) = self.dir.clone() else {
            return Ok(None);
        };
        if let Some(reason) = &self.load_error {
            return Err(IndexConsistencyError::ArtifactMismatch(format!(
                "refusing to overwrite an index that failed to load: {}",
                reason
            ))
            .into());
        }
        let _guard = self.save_lock.lock().await;
        let snapshot = persist::snapshot(&self.read(), &self.spec)?;
        let manifest = tokio::task::spawn_blocking(move || snapshot.write(&dir)).await??;
        let generation = self.saves.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(generation, vectors = manifest.vector_count, "index generation written");
        Ok(Some(manifest))
    }

    /// Index generations written by this manager.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    async fn autosave(&self) {
        if !self.autosave {
            return;
        }
        if let Err(e) = self.save().await {
            error!(error = %e, "autosave failed; in-memory index is ahead of disk");
        }
    }
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
