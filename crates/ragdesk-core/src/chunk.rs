//! Sentence-aware text chunker with character overlap.
//!
//! Splits extracted document text into bounded, overlapping pieces that
//! become the unit of retrieval. All lengths are measured in characters,
//! never bytes, so multi-byte text is bounded the same way ASCII is.
//!
//! # Algorithm
//!
//! 1. Collapse all whitespace runs to single spaces.
//! 2. Split into sentences after runs of terminal punctuation (`.`, `!`, `?`)
//!    that are followed by whitespace or end of text.
//! 3. Greedily pack sentences into a buffer of at most `budget` characters,
//!    where `budget = chunk_size - overlap - 1` (or `chunk_size` without
//!    overlap).
//! 4. A sentence longer than `budget` is packed word by word into the open
//!    buffer; a word longer than `budget` is hard-split on character
//!    boundaries.
//! 5. Every chunk after the first is prefixed with the trailing `overlap`
//!    characters of the previous *final* chunk and a single space, so
//!    consecutive chunks share exactly `overlap` characters and no chunk
//!    exceeds `chunk_size`. When the cut lands on a space that space is
//!    dropped rather than starting the chunk with it. A first piece shorter
//!    than `overlap` is merged into the second.
//!
//! Identical input and parameters always produce the identical sequence.
//!
//! # Example
//!
//! ```rust
//! use ragdesk_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("Our company reduced emissions by 30% in 2023.", 200, 20).unwrap();
//! assert_eq!(chunks, vec!["Our company reduced emissions by 30% in 2023.".to_string()]);
//! ```

use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::{ConfigError, IngestionError};
use crate::models::{Chunk, Document};

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkParams {
    /// Validate `chunk_size` and `overlap`.
    ///
    /// With a non-zero overlap the chunk must still hold the overlap, a
    /// separating space, and at least one character of new content.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ConfigError> {
        if chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if overlap > 0 && overlap + 1 >= chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Characters of fresh content each chunk may carry.
    fn budget(&self) -> usize {
        if self.overlap == 0 {
            self.chunk_size
        } else {
            self.chunk_size - self.overlap - 1
        }
    }
}

/// Split `text` into ordered chunk strings.
///
/// Empty or whitespace-only input yields an empty vector.
pub fn chunk_text(text: &str, max_size: usize, overlap: usize) -> Result<Vec<String>, ConfigError> {
    let params = ChunkParams::new(max_size, overlap)?;
    Ok(split_text(text, params))
}

/// Split `text` with already-validated parameters.
pub fn split_text(text: &str, params: ChunkParams) -> Vec<String> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return Vec::new();
    }

    let budget = params.budget();
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;

    for sentence in split_sentences(&normalized) {
        let sentence_len = char_len(sentence);

        if sentence_len > budget {
            let mut words = pack_words(std::mem::take(&mut buf), buf_len, sentence, budget);
            // The tail of an oversized sentence stays open for the next one.
            match words.pop() {
                Some(last) => {
                    buf_len = char_len(&last);
                    buf = last;
                }
                None => buf_len = 0,
            }
            pieces.extend(words);
            continue;
        }

        let would_be = if buf.is_empty() {
            sentence_len
        } else {
            buf_len + 1 + sentence_len
        };

        if would_be > budget {
            pieces.push(std::mem::take(&mut buf));
            buf.push_str(sentence);
            buf_len = sentence_len;
        } else {
            if !buf.is_empty() {
                buf.push(' ');
            }
            buf.push_str(sentence);
            buf_len = would_be;
        }
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }

    apply_overlap(pieces, params.overlap)
}

/// Chunk a document into [`Chunk`] records with inherited metadata.
///
/// # Errors
///
/// - [`IngestionError::EmptyContent`] when the text is empty or whitespace.
/// - [`IngestionError::NoChunks`] when splitting yields nothing usable.
pub fn chunk_document(doc: &Document, params: ChunkParams) -> Result<Vec<Chunk>, IngestionError> {
    if doc.text.trim().is_empty() {
        return Err(IngestionError::EmptyContent {
            filename: doc.filename.clone(),
        });
    }

    let pieces: Vec<String> = split_text(&doc.text, params)
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect();
    if pieces.is_empty() {
        return Err(IngestionError::NoChunks {
            filename: doc.filename.clone(),
        });
    }

    let total = pieces.len();
    let original_length = char_len(&doc.text);
    let created_at = doc.created_at.to_rfc3339();

    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(index, content)| {
            let mut metadata = doc.metadata.clone();
            metadata.insert("filename".to_string(), json!(doc.filename));
            metadata.insert("chunk_size".to_string(), json!(char_len(&content)));
            metadata.insert("total_chunks".to_string(), json!(total));
            metadata.insert("original_length".to_string(), json!(original_length));
            metadata.insert("created_at".to_string(), json!(created_at));
            make_chunk(doc, index, content, metadata)
        })
        .collect())
}

fn make_chunk(
    doc: &Document,
    index: usize,
    content: String,
    metadata: crate::models::Metadata,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        document_id: doc.id.clone(),
        chunk_index: index,
        filename: doc.filename.clone(),
        content,
        hash,
        metadata,
    }
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split whitespace-normalized text after terminal punctuation runs.
fn split_sentences(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        if !is_terminal(chars[i].1) {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < chars.len() && is_terminal(chars[j].1) {
            j += 1;
        }
        if j == chars.len() || chars[j].1 == ' ' {
            let end = chars.get(j).map(|(pos, _)| *pos).unwrap_or(text.len());
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
        i = j;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Word-level packing for a sentence that does not fit in `budget`,
/// continuing the open buffer `buf` of `buf_len` characters.
fn pack_words(mut buf: String, mut buf_len: usize, sentence: &str, budget: usize) -> Vec<String> {
    let mut out = Vec::new();

    for word in sentence.split(' ').filter(|w| !w.is_empty()) {
        let word_len = char_len(word);

        if word_len > budget {
            if !buf.is_empty() {
                out.push(std::mem::take(&mut buf));
                buf_len = 0;
            }
            let mut parts = hard_split(word, budget);
            if let Some(last) = parts.pop() {
                out.extend(parts);
                buf_len = char_len(&last);
                buf = last;
            }
            continue;
        }

        if buf.is_empty() {
            buf.push_str(word);
            buf_len = word_len;
        } else if buf_len + 1 + word_len <= budget {
            buf.push(' ');
            buf.push_str(word);
            buf_len += 1 + word_len;
        } else {
            out.push(std::mem::take(&mut buf));
            buf.push_str(word);
            buf_len = word_len;
        }
    }

    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

/// Split a single token into `budget`-character pieces.
fn hard_split(word: &str, budget: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(budget.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

/// Prefix every chunk after the first with the last `overlap` characters
/// of its predecessor. A cut that lands on a space drops that space.
///
/// A first piece shorter than `overlap` would be repeated whole by the
/// next chunk, so it is merged into it instead. The merge fits because
/// that piece plus a space plus one `budget` is below `chunk_size`.
fn apply_overlap(pieces: Vec<String>, overlap: usize) -> Vec<String> {
    if overlap == 0 || pieces.len() < 2 {
        return pieces;
    }

    let mut out: Vec<String> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        if out.len() == 1 && char_len(&out[0]) < overlap {
            out[0].push(' ');
            out[0].push_str(&piece);
            continue;
        }
        let next = match out.last() {
            None => piece,
            Some(prev) => format!("{} {}", overlap_tail(prev, overlap), piece),
        };
        out.push(next);
    }
    out
}

fn overlap_tail(prev: &str, overlap: usize) -> String {
    let skip = char_len(prev).saturating_sub(overlap);
    prev.chars().skip(skip).collect::<String>().trim_start().to_string()
}
