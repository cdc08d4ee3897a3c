//! Grounded-answer orchestration.
//!
//! [`RagEngine::answer`] runs one conversation turn:
//!
//! 1. Read the bounded history window (when `use_history`).
//! 2. Retrieve the top-k chunks through [`IndexManager::search`].
//! 3. Build the message list: instruction preamble, history, then a user
//!    message carrying the labeled context and the question.
//! 4. Call the [`Generator`] under a timeout, racing the caller's
//!    [`CancellationToken`].
//! 5. Store the user message and the reply as one turn, and return the
//!    reply with its citations.
//!
//! A turn is only ever stored whole. When generation fails the turn is
//! stored with a marked fallback reply instead, and the failure is still
//! returned. A retrieval failure or a cancelled call stores nothing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use ragdesk_core::error::{GenerationError, QueryError};
use ragdesk_core::models::{Message, Metadata, SearchResult};
use ragdesk_core::session::{normalize_id, SessionStore, SessionSummary};

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::generation::{GenerationParams, Generator};
use crate::index::IndexManager;

pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant that answers questions based on the provided context documents.

Instructions:
1. Use the context documents to answer the user's question as accurately as possible.
2. If the context doesn't contain enough information to answer the question, say so clearly.
3. Cite the documents you use by their number (e.g., \"According to Document 1...\").
4. Be concise and factual.

Remember: Only use information from the provided context documents to answer questions.";

pub const NO_CONTEXT: &str = "No relevant context found.";

/// Prefix of the reply stored when generation fails.
pub const FALLBACK_MARKER: &str = "[answer unavailable]";

const SUMMARY_PROMPT: &str = "Provide a concise summary of the following conversation, highlighting the main topics discussed and key points.";

#[derive(Debug, Error)]
pub enum RagError {
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("session {0} not found")]
    UnknownSession(String),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("{source}")]
    Generation {
        session_id: String,
        /// The reply stored in the session, if one was stored.
        fallback: Option<String>,
        #[source]
        source: GenerationError,
    },
}

/// Orchestrator settings, read once from [`Config`].
#[derive(Debug, Clone)]
pub struct RagSettings {
    pub top_k: usize,
    pub alpha: f64,
    pub candidate_multiplier: usize,
    pub preview_chars: usize,
    pub timeout: Duration,
    pub max_answer_chars: usize,
    pub generation: GenerationParams,
}

impl RagSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            alpha: config.retrieval.alpha,
            candidate_multiplier: config.retrieval.candidate_multiplier,
            preview_chars: config.retrieval.preview_chars,
            timeout: config.generation.timeout(),
            max_answer_chars: config.generation.max_answer_chars,
            generation: GenerationParams::from_config(&config.generation),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<String>,
    pub use_history: bool,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            use_history: true,
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// A source chunk behind an answer.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub document_id: String,
    pub chunk_index: usize,
    pub filename: String,
    pub content_preview: String,
    pub score: f64,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub response: String,
    pub sources: Vec<Citation>,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub session_id: String,
    pub summary: String,
    pub message_count: usize,
}

pub struct RagEngine {
    index: Arc<IndexManager>,
    sessions: Arc<SessionStore>,
    generator: Arc<dyn Generator>,
    settings: RagSettings,
}

impl RagEngine {
    pub fn new(
        index: Arc<IndexManager>,
        sessions: Arc<SessionStore>,
        generator: Arc<dyn Generator>,
        settings: RagSettings,
    ) -> Self {
        Self {
            index,
            sessions,
            generator,
            settings,
        }
    }

    pub fn index(&self) -> &Arc<IndexManager> {
        &self.index
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    /// Answer one chat turn.
    pub async fn answer(
        &self,
        request: ChatRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<ChatAnswer, RagError> {
        let query = request.message.trim();
        if query.is_empty() {
            return Err(RagError::EmptyMessage);
        }
        let start = Instant::now();

        let requested = request.session_id.as_deref().and_then(normalize_id);
        let history = match requested {
            Some(id) if request.use_history => self.sessions.window(id),
            _ => Vec::new(),
        };

        let results = self
            .index
            .search(
                query,
                self.settings.top_k,
                self.settings.alpha,
                self.settings.candidate_multiplier,
            )
            .await?;

        let session_id = self.sessions.get_or_create(requested);
        let messages = build_messages(&history, &results, query);

        let reply = self
            .generate_bounded(&messages, &self.settings.generation, cancel)
            .await
            .and_then(|text| finish_reply(&text, self.settings.max_answer_chars));

        match reply {
            Ok(text) => {
                self.sessions.append_turn(
                    &session_id,
                    Message::user(query),
                    Message::assistant(text.clone()),
                );
                info!(
                    session_id = %session_id,
                    sources = results.len(),
                    history = history.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "answered"
                );
                Ok(ChatAnswer {
                    response: text,
                    sources: self.citations(&results),
                    session_id,
                })
            }
            Err(GenerationError::Cancelled) => {
                info!(session_id = %session_id, "generation cancelled, turn not stored");
                Err(RagError::Generation {
                    session_id,
                    fallback: None,
                    source: GenerationError::Cancelled,
                })
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "generation failed, storing fallback");
                let fallback = fallback_reply(&e);
                self.sessions.append_turn(
                    &session_id,
                    Message::user(query),
                    Message::assistant(fallback.clone()),
                );
                Err(RagError::Generation {
                    session_id,
                    fallback: Some(fallback),
                    source: e,
                })
            }
        }
    }

    /// Summarize a session's transcript. The summary is not stored.
    pub async fn summarize(
        &self,
        session_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<ConversationSummary, RagError> {
        let transcript = self.sessions.messages(session_id);
        if transcript.is_empty() {
            return Err(RagError::UnknownSession(session_id.to_string()));
        }

        let mut body = String::from("Conversation to summarize:\n\n");
        for message in &transcript {
            body.push_str(&format!("{}: {}\n\n", capitalize(message.role.as_str()), message.content));
        }
        let messages = vec![Message::system(SUMMARY_PROMPT), Message::user(body)];
        let params = GenerationParams {
            temperature: 0.5,
            max_tokens: 300,
        };

        let summary = self
            .generate_bounded(&messages, &params, cancel)
            .await
            .and_then(|text| finish_reply(&text, self.settings.max_answer_chars))
            .map_err(|source| RagError::Generation {
                session_id: session_id.to_string(),
                fallback: None,
                source,
            })?;

        Ok(ConversationSummary {
            session_id: session_id.to_string(),
            summary,
            message_count: transcript.len(),
        })
    }

    pub fn history(&self, session_id: &str) -> Vec<Message> {
        self.sessions.messages(session_id)
    }

    pub fn clear_session(&self, session_id: &str) -> bool {
        self.sessions.clear(session_id)
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.sessions.list()
    }

    async fn generate_bounded(
        &self,
        messages: &[Message],
        params: &GenerationParams,
        cancel: Option<&CancellationToken>,
    ) -> Result<String, GenerationError> {
        let timeout = self.settings.timeout;
        let call = tokio::time::timeout(timeout, self.generator.generate(messages, params));
        let outcome = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(GenerationError::Cancelled),
                outcome = call => outcome,
            },
            None => call.await,
        };
        outcome.unwrap_or(Err(GenerationError::Timeout(timeout)))
    }

    fn citations(&self, results: &[SearchResult]) -> Vec<Citation> {
        results
            .iter()
            .map(|r| Citation {
                document_id: r.chunk.document_id.clone(),
                chunk_index: r.chunk.chunk_index,
                filename: r.chunk.filename.clone(),
                content_preview: preview(&r.chunk.content, self.settings.preview_chars),
                score: r.fused_score,
                metadata: r.chunk.metadata.clone(),
            })
            .collect()
    }
}

/// Render retrieved chunks as `[Document i: filename]` blocks.
pub fn format_context(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return NO_CONTEXT.to_string();
    }
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[Document {}: {}]\n{}", i + 1, r.chunk.filename, r.chunk.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// System preamble, then history, then the context-bearing user message.
pub fn build_messages(history: &[Message], results: &[SearchResult], query: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(SYSTEM_PROMPT));
    messages.extend(history.iter().cloned());
    messages.push(Message::user(format!(
        "Context Documents:\n{}\n\nQuestion: {}\n\nPlease answer the question based on the context documents provided above.",
        format_context(results),
        query
    )));
    messages
}

fn finish_reply(text: &str, max_chars: usize) -> Result<String, GenerationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(GenerationError::Malformed("empty response".to_string()));
    }
    Ok(match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].trim_end().to_string(),
        None => text.to_string(),
    })
}

fn fallback_reply(err: &GenerationError) -> String {
    format!(
        "{} I couldn't generate an answer from the documents ({}). Please try again.",
        FALLBACK_MARKER, err
    )
}

fn preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragdesk_core::models::{Chunk, Role};

    fn result(filename: &str, content: &str) -> SearchResult {
        SearchResult {
            chunk: Chunk {
                document_id: "d".to_string(),
                chunk_index: 0,
                filename: filename.to_string(),
                content: content.to_string(),
                hash: String::new(),
                metadata: Metadata::new(),
            },
            raw_lexical_score: Some(1.0),
            raw_vector_score: None,
            lexical_norm: 1.0,
            vector_norm: 0.0,
            fused_score: 0.5,
            rank: 1,
        }
    }

    #[test]
    fn test_format_context_labels_documents() {
        let ctx = format_context(&[result("a.txt", "Alpha."), result("b.pdf", "Beta.")]);
        assert_eq!(ctx, "[Document 1: a.txt]\nAlpha.\n\n[Document 2: b.pdf]\nBeta.");
        assert_eq!(format_context(&[]), NO_CONTEXT);
    }

    #[test]
    fn test_build_messages_order() {
        let history = vec![Message::user("earlier"), Message::assistant("reply")];
        let messages = build_messages(&history, &[], "What now?");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "earlier");
        assert!(messages[3].content.contains("Question: What now?"));
        assert!(messages[3].content.contains(NO_CONTEXT));
    }

    #[test]
    fn test_finish_reply_trims_and_truncates() {
        assert_eq!(finish_reply("  hello  ", 100).unwrap(), "hello");
        assert_eq!(finish_reply("héllo world", 5).unwrap(), "héllo");
        assert!(matches!(finish_reply("   ", 10), Err(GenerationError::Malformed(_))));
    }

    #[test]
    fn test_preview_appends_ellipsis() {
        assert_eq!(preview("short", 200), "short");
        assert_eq!(preview("abcdef", 3), "abc...");
    }

    #[test]
    fn test_fallback_is_marked() {
        let text = fallback_reply(&GenerationError::Timeout(Duration::from_secs(1)));
        assert!(text.starts_with(FALLBACK_MARKER));
    }

    #[test]
    fn test_capitalize_role() {
        assert_eq!(capitalize("assistant"), "Assistant");
        assert_eq!(capitalize(""), "");
    }
}
