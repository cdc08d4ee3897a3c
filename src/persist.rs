//! On-disk index layout.
//!
//! An index directory holds four artifacts that together describe one
//! generation of the corpus:
//!
//! | File | Contents |
//! |------|----------|
//! | `vectors.bin` | `vector_count × dims` little-endian `f32`s, row per chunk |
//! | `chunks.json` | chunk text and identity, same row order |
//! | `metadata.json` | document records plus per-chunk metadata, same row order |
//! | `manifest.json` | format version, dims, model, chunking, metric, counts |
//!
//! Every file is written to a `.tmp` sibling and renamed into place; the
//! manifest goes last. A directory with none of the four is a fresh index.
//! A directory with only some of them, or whose files disagree on counts,
//! is corrupt and refuses to load. The lexical index is not stored: it is
//! rebuilt from `chunks.json`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use ragdesk_core::corpus::Corpus;
use ragdesk_core::error::IndexConsistencyError;
use ragdesk_core::models::{Chunk, DocumentRecord, Metadata};
use ragdesk_core::vector::{blob_to_vec, vec_to_blob, Metric};

pub const VECTORS_FILE: &str = "vectors.bin";
pub const CHUNKS_FILE: &str = "chunks.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const FORMAT_VERSION: u32 = 1;

const ARTIFACTS: [&str; 4] = [VECTORS_FILE, CHUNKS_FILE, METADATA_FILE, MANIFEST_FILE];

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Consistency(#[from] IndexConsistencyError),
    #[error("save task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// The config/version record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub dims: usize,
    pub model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub metric: Metric,
    pub vector_count: usize,
    pub document_count: usize,
    pub saved_at: DateTime<Utc>,
}

/// What the running process expects a loadable index to match.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub model: String,
    pub dims: usize,
    pub metric: Metric,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredChunk {
    document_id: String,
    chunk_index: usize,
    filename: String,
    content: String,
    hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredMetadata {
    documents: Vec<DocumentRecord>,
    chunks: Vec<Metadata>,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), PersistError> {
    let target = dir.join(name);
    let tmp = dir.join(format!("{}.tmp", name));
    fs::write(&tmp, bytes).map_err(io_err(&tmp))?;
    fs::rename(&tmp, &target).map_err(io_err(&target))?;
    Ok(())
}

fn to_json<T: Serialize>(name: &str, value: &T) -> Result<Vec<u8>, PersistError> {
    serde_json::to_vec(value).map_err(|source| PersistError::Json {
        path: PathBuf::from(name),
        source,
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistError> {
    let bytes = fs::read(path).map_err(io_err(path))?;
    serde_json::from_slice(&bytes).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Encoded artifacts of one corpus generation, ready to be written without
/// holding any lock on the corpus.
#[derive(Debug)]
pub struct Snapshot {
    blob: Vec<u8>,
    chunks: Vec<u8>,
    metadata: Vec<u8>,
    manifest: Manifest,
}

impl Snapshot {
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Write all four artifacts to `dir`, creating it if needed.
    pub fn write(self, dir: &Path) -> Result<Manifest, PersistError> {
        fs::create_dir_all(dir).map_err(io_err(dir))?;
        let manifest_json = serde_json::to_vec_pretty(&self.manifest).map_err(|source| {
            PersistError::Json {
                path: dir.join(MANIFEST_FILE),
                source,
            }
        })?;

        write_atomic(dir, VECTORS_FILE, &self.blob)?;
        write_atomic(dir, CHUNKS_FILE, &self.chunks)?;
        write_atomic(dir, METADATA_FILE, &self.metadata)?;
        write_atomic(dir, MANIFEST_FILE, &manifest_json)?;

        info!(
            dir = %dir.display(),
            vectors = self.manifest.vector_count,
            documents = self.manifest.document_count,
            "index saved"
        );
        Ok(self.manifest)
    }
}

/// Write the corpus to `dir`, creating it if needed.
pub fn save(dir: &Path, corpus: &Corpus, spec: &IndexSpec) -> Result<Manifest, PersistError> {
    snapshot(corpus, spec)?.write(dir)
}

/// Encode the corpus into its four artifacts.
pub fn snapshot(corpus: &Corpus, spec: &IndexSpec) -> Result<Snapshot, PersistError> {
    let mut blob = Vec::with_capacity(corpus.chunk_count() * corpus.dims() * 4);
    let mut chunks = Vec::with_capacity(corpus.chunk_count());
    let mut chunk_meta = Vec::with_capacity(corpus.chunk_count());

    for (chunk, vector) in corpus.entries() {
        let vector = vector.ok_or_else(|| IndexConsistencyError::PartialIndex {
            chunk: chunk.id(),
            reason: "no vector entry".to_string(),
        })?;
        blob.extend_from_slice(&vec_to_blob(vector));
        chunks.push(StoredChunk {
            document_id: chunk.document_id.clone(),
            chunk_index: chunk.chunk_index,
            filename: chunk.filename.clone(),
            content: chunk.content.clone(),
            hash: chunk.hash.clone(),
        });
        chunk_meta.push(chunk.metadata.clone());
    }

    let metadata = StoredMetadata {
        documents: corpus.documents().into_iter().cloned().collect(),
        chunks: chunk_meta,
    };
    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        dims: corpus.dims(),
        model: spec.model.clone(),
        chunk_size: spec.chunk_size,
        chunk_overlap: spec.chunk_overlap,
        metric: corpus.metric(),
        vector_count: chunks.len(),
        document_count: metadata.documents.len(),
        saved_at: Utc::now(),
    };

    Ok(Snapshot {
        blob,
        chunks: to_json(CHUNKS_FILE, &chunks)?,
        metadata: to_json(METADATA_FILE, &metadata)?,
        manifest,
    })
}

/// Load the index in `dir`. Returns `Ok(None)` when no artifact exists.
pub fn load(dir: &Path, spec: &IndexSpec) -> Result<Option<(Corpus, Manifest)>, PersistError> {
    let present: Vec<&str> = ARTIFACTS
        .iter()
        .copied()
        .filter(|name| dir.join(name).is_file())
        .collect();
    if present.is_empty() {
        return Ok(None);
    }
    if let Some(missing) = ARTIFACTS.iter().find(|name| !present.contains(name)) {
        return Err(IndexConsistencyError::MissingArtifact(missing.to_string()).into());
    }

    let manifest: Manifest = read_json(&dir.join(MANIFEST_FILE))?;
    let mismatch = |msg: String| -> PersistError { IndexConsistencyError::ArtifactMismatch(msg).into() };

    if manifest.format_version != FORMAT_VERSION {
        return Err(mismatch(format!(
            "format version {} is not supported (expected {})",
            manifest.format_version, FORMAT_VERSION
        )));
    }
    if manifest.dims != spec.dims || manifest.model != spec.model {
        return Err(mismatch(format!(
            "index was built with {} ({} dims) but the embedder is {} ({} dims)",
            manifest.model, manifest.dims, spec.model, spec.dims
        )));
    }
    if manifest.chunk_size != spec.chunk_size || manifest.chunk_overlap != spec.chunk_overlap {
        warn!(
            stored_size = manifest.chunk_size,
            stored_overlap = manifest.chunk_overlap,
            "chunking settings changed since the index was built; new documents use the current settings"
        );
    }

    let vectors_path = dir.join(VECTORS_FILE);
    let blob = fs::read(&vectors_path).map_err(io_err(&vectors_path))?;
    let chunks: Vec<StoredChunk> = read_json(&dir.join(CHUNKS_FILE))?;
    let metadata: StoredMetadata = read_json(&dir.join(METADATA_FILE))?;

    let expected_bytes = manifest.vector_count * manifest.dims * 4;
    if blob.len() != expected_bytes {
        return Err(mismatch(format!(
            "{} holds {} bytes, expected {} for {} vectors",
            VECTORS_FILE,
            blob.len(),
            expected_bytes,
            manifest.vector_count
        )));
    }
    if chunks.len() != manifest.vector_count || metadata.chunks.len() != manifest.vector_count {
        return Err(mismatch(format!(
            "manifest lists {} vectors, {} has {} chunks, {} has {} chunk records",
            manifest.vector_count,
            CHUNKS_FILE,
            chunks.len(),
            METADATA_FILE,
            metadata.chunks.len()
        )));
    }
    if metadata.documents.len() != manifest.document_count {
        return Err(mismatch(format!(
            "manifest lists {} documents, {} has {}",
            manifest.document_count,
            METADATA_FILE,
            metadata.documents.len()
        )));
    }

    let vectors = blob_to_vec(&blob);
    let mut grouped: BTreeMap<String, (Vec<Chunk>, Vec<Vec<f32>>)> = BTreeMap::new();
    for (row, (stored, chunk_metadata)) in chunks.into_iter().zip(metadata.chunks).enumerate() {
        let vector = vectors[row * manifest.dims..(row + 1) * manifest.dims].to_vec();
        let entry = grouped.entry(stored.document_id.clone()).or_default();
        entry.0.push(Chunk {
            document_id: stored.document_id,
            chunk_index: stored.chunk_index,
            filename: stored.filename,
            content: stored.content,
            hash: stored.hash,
            metadata: chunk_metadata,
        });
        entry.1.push(vector);
    }

    let mut corpus = Corpus::new(spec.dims, spec.metric);
    for record in metadata.documents {
        let (doc_chunks, doc_vectors) = grouped.remove(&record.id).unwrap_or_default();
        if doc_chunks.len() != record.chunk_count {
            return Err(mismatch(format!(
                "document {} records {} chunks but {} were stored",
                record.id,
                record.chunk_count,
                doc_chunks.len()
            )));
        }
        corpus.insert_document(record, doc_chunks, doc_vectors)?;
    }
    if let Some(orphan) = grouped.keys().next() {
        return Err(mismatch(format!("chunks stored for unknown document {}", orphan)));
    }
    corpus.verify()?;

    info!(
        dir = %dir.display(),
        vectors = manifest.vector_count,
        documents = manifest.document_count,
        "index loaded"
    );
    Ok(Some((corpus, manifest)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragdesk_core::chunk::{chunk_document, ChunkParams};
    use ragdesk_core::models::Document;

    fn spec() -> IndexSpec {
        IndexSpec {
            model: "test-model".to_string(),
            dims: 3,
            metric: Metric::Euclidean,
            chunk_size: 40,
            chunk_overlap: 0,
        }
    }

    fn sample_corpus() -> Corpus {
        let mut corpus = Corpus::new(3, Metric::Euclidean);
        for (name, text) in [
            ("a.txt", "First document. It has two sentences here."),
            ("b.txt", "Second document text."),
        ] {
            let doc = Document::new(name, text, Metadata::new());
            let chunks = chunk_document(&doc, ChunkParams::new(40, 0).unwrap()).unwrap();
            let vectors = chunks
                .iter()
                .map(|c| vec![c.content.len() as f32, c.chunk_index as f32, 1.0])
                .collect();
            let record = DocumentRecord {
                id: doc.id.clone(),
                filename: doc.filename.clone(),
                metadata: doc.metadata.clone(),
                created_at: doc.created_at,
                chunk_count: chunks.len(),
                total_chars: chunks.iter().map(|c| c.content.chars().count()).sum(),
                original_length: text.chars().count(),
            };
            corpus.insert_document(record, chunks, vectors).unwrap();
        }
        corpus
    }

    #[test]
    fn test_save_then_load_restores_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = sample_corpus();
        let manifest = save(dir.path(), &corpus, &spec()).unwrap();
        assert_eq!(manifest.vector_count, corpus.chunk_count());

        let (loaded, loaded_manifest) = load(dir.path(), &spec()).unwrap().unwrap();
        assert_eq!(loaded_manifest, manifest);
        assert_eq!(loaded.chunk_count(), corpus.chunk_count());
        assert_eq!(loaded.document_count(), 2);
        for (chunk, vector) in corpus.entries() {
            assert_eq!(loaded.chunk(&chunk.id()), Some(chunk));
            let restored = loaded.entries().find(|(c, _)| c.id() == chunk.id()).unwrap().1;
            assert_eq!(restored, vector);
        }
        for name in ARTIFACTS {
            assert!(!dir.path().join(format!("{}.tmp", name)).exists());
        }
    }

    #[test]
    fn test_snapshot_is_detached_from_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let mut corpus = sample_corpus();
        let snap = snapshot(&corpus, &spec()).unwrap();
        assert_eq!(snap.manifest().document_count, 2);

        let first = corpus.documents()[0].id.clone();
        corpus.remove_document(&first).unwrap();
        snap.write(dir.path()).unwrap();

        let (loaded, _) = load(dir.path(), &spec()).unwrap().unwrap();
        assert_eq!(loaded.document_count(), 2);
    }

    #[test]
    fn test_empty_dir_is_fresh_index() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path(), &spec()).unwrap().is_none());
    }

    #[test]
    fn test_missing_artifact_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), &sample_corpus(), &spec()).unwrap();
        fs::remove_file(dir.path().join(METADATA_FILE)).unwrap();
        let err = load(dir.path(), &spec()).unwrap_err();
        assert!(matches!(
            err,
            PersistError::Consistency(IndexConsistencyError::MissingArtifact(ref f)) if f == METADATA_FILE
        ));
    }

    #[test]
    fn test_truncated_vectors_rejected() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), &sample_corpus(), &spec()).unwrap();
        let path = dir.path().join(VECTORS_FILE);
        let mut blob = fs::read(&path).unwrap();
        blob.truncate(blob.len() - 4);
        fs::write(&path, blob).unwrap();
        assert!(matches!(
            load(dir.path(), &spec()),
            Err(PersistError::Consistency(IndexConsistencyError::ArtifactMismatch(_)))
        ));
    }

    #[test]
    fn test_model_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), &sample_corpus(), &spec()).unwrap();
        let mut other = spec();
        other.model = "another-model".to_string();
        assert!(matches!(
            load(dir.path(), &other),
            Err(PersistError::Consistency(IndexConsistencyError::ArtifactMismatch(_)))
        ));
    }

    #[test]
    fn test_invalid_json_reported() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), &sample_corpus(), &spec()).unwrap();
        fs::write(dir.path().join(CHUNKS_FILE), b"{not json").unwrap();
        assert!(matches!(load(dir.path(), &spec()), Err(PersistError::Json { .. })));
    }
}
