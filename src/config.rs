//! Configuration parsing and validation.
//!
//! ragdesk is configured from a TOML file (default `ragdesk.toml` in the
//! working directory). Every section is optional and falls back to the
//! defaults below; environment variables are applied on top of the file and
//! the merged result is validated by [`load_config`].
//!
//! # Example
//!
//! ```toml
//! [index]
//! dir = "./data/index"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [retrieval]
//! alpha = 0.5
//! top_k = 5
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [generation]
//! provider = "mistral"
//! model = "mistral-large-latest"
//! timeout_secs = 60
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```
//!
//! # Environment overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `RAGDESK_CHUNK_SIZE` | `chunking.chunk_size` |
//! | `RAGDESK_CHUNK_OVERLAP` | `chunking.chunk_overlap` |
//! | `RAGDESK_ALPHA` | `retrieval.alpha` |
//! | `RAGDESK_TOP_K` | `retrieval.top_k` |
//! | `RAGDESK_HISTORY_WINDOW` | `session.history_window` |
//! | `RAGDESK_GENERATION_TIMEOUT_SECS` | `generation.timeout_secs` |
//! | `RAGDESK_INDEX_DIR` | `index.dir` |
//!
//! API keys are never read from the file: `MISTRAL_API_KEY` and
//! `OPENAI_API_KEY` come from the environment only.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ragdesk_core::chunk::ChunkParams;
use ragdesk_core::session::SessionPolicy;
use ragdesk_core::vector::Metric;

/// Config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "ragdesk.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding the persisted index. `None` keeps everything in
    /// memory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Persist after every ingestion or deletion.
    #[serde(default = "default_true")]
    pub autosave: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: None,
            autosave: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters carried over from the previous chunk.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Weight for vector vs lexical: `fused = α·vector + (1-α)·lexical`.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default)]
    pub metric: Metric,
    /// Length of the content preview attached to citations.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            top_k: default_top_k(),
            candidate_multiplier: default_candidate_multiplier(),
            metric: Metric::default(),
            preview_chars: default_preview_chars(),
        }
    }
}

fn default_alpha() -> f64 {
    0.5
}
fn default_top_k() -> usize {
    5
}
fn default_candidate_multiplier() -> usize {
    3
}
fn default_preview_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hash`, `openai`, `ollama`, or `local`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for `ollama` (default `http://localhost:11434`) or an
    /// OpenAI-compatible endpoint.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
            url: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `mistral`, `openai`, or `stub`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    /// Answers longer than this are truncated.
    #[serde(default = "default_max_answer_chars")]
    pub max_answer_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_generation_retries(),
            max_answer_chars: default_max_answer_chars(),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_generation_provider() -> String {
    "mistral".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_generation_retries() -> u32 {
    2
}
fn default_max_answer_chars() -> usize {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// `0` disables idle expiry.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    /// `0` disables the cap.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            idle_ttl_secs: default_idle_ttl_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

fn default_history_window() -> usize {
    10
}
fn default_idle_ttl_secs() -> u64 {
    86_400
}
fn default_max_sessions() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

impl IngestConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
        "**/*.pdf".to_string(),
        "**/*.docx".to_string(),
    ]
}
fn default_max_file_size_mb() -> u64 {
    50
}

impl Config {
    pub fn chunk_params(&self) -> Result<ChunkParams> {
        ChunkParams::new(self.chunking.chunk_size, self.chunking.chunk_overlap)
            .context("invalid [chunking] section")
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            history_window: self.session.history_window,
            idle_ttl: match self.session.idle_ttl_secs {
                0 => None,
                secs => Some(chrono::Duration::seconds(secs.min(i64::MAX as u64) as i64)),
            },
            max_sessions: self.session.max_sessions,
        }
    }

    /// Apply `RAGDESK_*` overrides, reading variables through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: FromStr>(name: &str, raw: &str) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            raw.trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", name, raw, e))
        }

        if let Some(v) = lookup("RAGDESK_CHUNK_SIZE") {
            self.chunking.chunk_size = parse("RAGDESK_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("RAGDESK_CHUNK_OVERLAP") {
            self.chunking.chunk_overlap = parse("RAGDESK_CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = lookup("RAGDESK_ALPHA") {
            self.retrieval.alpha = parse("RAGDESK_ALPHA", &v)?;
        }
        if let Some(v) = lookup("RAGDESK_TOP_K") {
            self.retrieval.top_k = parse("RAGDESK_TOP_K", &v)?;
        }
        if let Some(v) = lookup("RAGDESK_HISTORY_WINDOW") {
            self.session.history_window = parse("RAGDESK_HISTORY_WINDOW", &v)?;
        }
        if let Some(v) = lookup("RAGDESK_GENERATION_TIMEOUT_SECS") {
            self.generation.timeout_secs = parse("RAGDESK_GENERATION_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("RAGDESK_INDEX_DIR") {
            self.index.dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.chunk_params()?;

        if !(0.0..=1.0).contains(&self.retrieval.alpha) {
            bail!("retrieval.alpha must be in [0.0, 1.0]");
        }
        if self.retrieval.top_k < 1 {
            bail!("retrieval.top_k must be >= 1");
        }
        if self.retrieval.candidate_multiplier < 1 {
            bail!("retrieval.candidate_multiplier must be >= 1");
        }

        match self.embedding.provider.as_str() {
            "hash" | "local" => {}
            "openai" | "ollama" => {
                if self.embedding.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if self.embedding.dims.unwrap_or(0) == 0 {
                    bail!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or local.",
                other
            ),
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        match self.generation.provider.as_str() {
            "mistral" | "openai" | "stub" => {}
            other => bail!(
                "Unknown generation provider: '{}'. Must be mistral, openai, or stub.",
                other
            ),
        }
        if self.generation.timeout_secs == 0 {
            bail!("generation.timeout_secs must be > 0");
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            bail!("generation.temperature must be in [0.0, 2.0]");
        }
        if self.generation.max_answer_chars == 0 {
            bail!("generation.max_answer_chars must be > 0");
        }

        if self.session.history_window == 0 {
            bail!("session.history_window must be >= 1");
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => bail!("Unknown logging format: '{}'. Must be pretty or json.", other),
        }

        Ok(())
    }
}

/// Load configuration.
///
/// With `path = None` the default file is read if it exists; otherwise the
/// built-in defaults are used. An explicitly given path must exist.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                read_config_file(default)?
            } else {
                Config::default()
            }
        }
    };

    config.apply_env_overrides(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

/// Parse a config from a TOML string without env overrides.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.alpha, 0.5);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.session.history_window, 10);
        assert_eq!(config.generation.timeout_secs, 60);
        assert_eq!(config.embedding.provider, "hash");
        assert!(config.index.autosave);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config = parse_config(
            r#"
            [chunking]
            chunk_size = 500

            [retrieval]
            metric = "cosine"
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.metric, Metric::Cosine);
        assert_eq!(config.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RAGDESK_CHUNK_SIZE", "300"),
            ("RAGDESK_CHUNK_OVERLAP", "30"),
            ("RAGDESK_ALPHA", "0.8"),
            ("RAGDESK_TOP_K", "7"),
            ("RAGDESK_HISTORY_WINDOW", "4"),
            ("RAGDESK_GENERATION_TIMEOUT_SECS", "5"),
            ("RAGDESK_INDEX_DIR", "/tmp/idx"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_env_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.chunking.chunk_size, 300);
        assert_eq!(config.chunking.chunk_overlap, 30);
        assert_eq!(config.retrieval.alpha, 0.8);
        assert_eq!(config.retrieval.top_k, 7);
        assert_eq!(config.session.history_window, 4);
        assert_eq!(config.generation.timeout(), Duration::from_secs(5));
        assert_eq!(config.index.dir, Some(PathBuf::from("/tmp/idx")));
        config.validate().unwrap();
    }

    #[test]
    fn test_env_override_parse_error() {
        let mut config = Config::default();
        let err = config
            .apply_env_overrides(|name| (name == "RAGDESK_TOP_K").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("RAGDESK_TOP_K"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.chunking.chunk_overlap = 1000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retrieval.alpha = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.embedding.provider = "openai".to_string();
        assert!(config.validate().is_err());
        config.embedding.model = Some("text-embedding-3-small".to_string());
        config.embedding.dims = Some(1536);
        config.validate().unwrap();

        let mut config = Config::default();
        config.generation.provider = "gpt".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config(Some(&missing)).is_err());
    }

    #[test]
    fn test_session_policy_ttl_zero_disables() {
        let mut config = Config::default();
        config.session.idle_ttl_secs = 0;
        assert!(config.session_policy().idle_ttl.is_none());
        config.session.idle_ttl_secs = 60;
        assert_eq!(
            config.session_policy().idle_ttl,
            Some(chrono::Duration::seconds(60))
        );
    }
}
