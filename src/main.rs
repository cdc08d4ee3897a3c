//! # ragdesk CLI
//!
//! ## Usage
//!
//! ```bash
//! ragdesk --config ./ragdesk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragdesk ingest <PATH>...` | Extract, chunk, embed, and index files or directories |
//! | `ragdesk search "<query>"` | Hybrid search over the index |
//! | `ragdesk ask "<message>"` | Answer a question from the indexed documents |
//! | `ragdesk documents` | List indexed documents |
//! | `ragdesk delete <ID>` | Delete a document and its chunks |
//! | `ragdesk stats` | Corpus statistics |
//! | `ragdesk serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! ragdesk ingest ./reports --metadata year=2023
//! ragdesk search "scope 3 emissions" --limit 3
//! ragdesk search "water" --lexical
//! ragdesk ask "How much did emissions fall?"
//! RUST_LOG=debug ragdesk serve
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use ragdesk::config::{load_config, Config};
use ragdesk::embedding::create_embedder;
use ragdesk::generation::create_generator;
use ragdesk::index::IndexManager;
use ragdesk::rag::{ChatRequest, RagEngine, RagError, RagSettings};
use ragdesk::{logging, server};
use ragdesk_core::models::Metadata;
use ragdesk_core::session::SessionStore;

/// ragdesk: document question answering over a local hybrid index.
#[derive(Parser)]
#[command(name = "ragdesk", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./ragdesk.toml` when present, built-in defaults otherwise.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest files or directories (.txt, .md, .pdf, .docx).
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Metadata attached to every ingested document, as `key=value`.
        /// Values that parse as JSON keep their type.
        #[arg(long = "metadata", value_name = "KEY=VALUE")]
        metadata: Vec<String>,
    },

    /// Search indexed chunks.
    Search {
        query: String,

        /// Maximum number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        limit: Option<usize>,

        /// Weight of the vector score, 0.0 (lexical) to 1.0 (vector).
        #[arg(long)]
        alpha: Option<f64>,

        /// Lexical ranking only; same as `--alpha 0`.
        #[arg(long, conflicts_with = "alpha")]
        lexical: bool,
    },

    /// Ask a question and print a cited answer.
    Ask {
        message: String,

        /// Session id to record the turn under. Sessions live in memory, so
        /// a CLI run starts with an empty history; use `serve` for
        /// multi-turn chat.
        #[arg(long)]
        session: Option<String>,

        /// Do not send previous turns to the generator.
        #[arg(long)]
        no_history: bool,
    },

    /// List indexed documents.
    Documents,

    /// Delete a document and all of its chunks.
    Delete { document_id: String },

    /// Show corpus statistics.
    Stats,

    /// Start the HTTP API on `server.bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    logging::init(&config.logging)?;

    match cli.command {
        Commands::Ingest { paths, metadata } => {
            let metadata = parse_metadata(&metadata)?;
            run_ingest(&config, &paths, &metadata).await?;
        }
        Commands::Search {
            query,
            limit,
            alpha,
            lexical,
        } => {
            let alpha = if lexical {
                0.0
            } else {
                alpha.unwrap_or(config.retrieval.alpha)
            };
            let limit = limit.unwrap_or(config.retrieval.top_k);
            run_search(&config, &query, limit, alpha).await?;
        }
        Commands::Ask {
            message,
            session,
            no_history,
        } => {
            let request = ChatRequest {
                message,
                session_id: session,
                use_history: !no_history,
            };
            run_ask(&config, request).await?;
        }
        Commands::Documents => run_documents(&config)?,
        Commands::Delete { document_id } => run_delete(&config, &document_id).await?,
        Commands::Stats => run_stats(&config)?,
        Commands::Serve => server::run_server(&config).await?,
    }

    Ok(())
}

fn open_index(config: &Config) -> Result<IndexManager> {
    let embedder = create_embedder(&config.embedding)?;
    IndexManager::open(config, embedder).context("Failed to open index")
}

fn parse_metadata(pairs: &[String]) -> Result<Metadata> {
    let mut metadata = Metadata::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Invalid metadata '{}': expected KEY=VALUE", pair);
        };
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        metadata.insert(key.trim().to_string(), value);
    }
    Ok(metadata)
}

async fn run_ingest(config: &Config, paths: &[PathBuf], metadata: &Metadata) -> Result<()> {
    if config.index.dir.is_none() {
        warn!("no [index] dir configured, ingested documents will not be kept");
    }
    let index = open_index(config)?;

    let mut ingested = 0;
    let mut failed = 0;
    let mut chunks = 0;
    for path in paths {
        let summary = index.ingest_path(path, metadata).await?;
        for outcome in &summary.ingested {
            println!(
                "  + {} ({} chunks) {}",
                outcome.filename,
                outcome.chunk_ids.len(),
                outcome.document_id
            );
        }
        for failure in &summary.failed {
            println!("  ! {}: {}", failure.path.display(), failure.error);
        }
        ingested += summary.ingested.len();
        failed += summary.failed.len();
        chunks += summary.total_chunks();
    }

    if !config.index.autosave {
        index.save().await?;
    }
    println!();
    println!(
        "Ingested {} documents ({} chunks), {} failed.",
        ingested, chunks, failed
    );
    Ok(())
}

async fn run_search(config: &Config, query: &str, limit: usize, alpha: f64) -> Result<()> {
    let index = open_index(config)?;
    let results = index
        .search(query, limit, alpha, config.retrieval.candidate_multiplier)
        .await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for result in &results {
        println!(
            "{}. [{:.2}] {} #{}",
            result.rank, result.fused_score, result.chunk.filename, result.chunk.chunk_index
        );
        println!(
            "    lexical: {}  vector: {}",
            format_score(result.raw_lexical_score),
            format_score(result.raw_vector_score)
        );
        let excerpt: String = result.chunk.content.chars().take(240).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    id: {}", result.chunk.document_id);
        println!();
    }
    Ok(())
}

fn format_score(score: Option<f64>) -> String {
    score
        .map(|s| format!("{:.3}", s))
        .unwrap_or_else(|| "-".to_string())
}

async fn run_ask(config: &Config, request: ChatRequest) -> Result<()> {
    let index = Arc::new(open_index(config)?);
    let sessions = Arc::new(SessionStore::new(config.session_policy()));
    let generator = create_generator(&config.generation)?;
    let engine = RagEngine::new(index, sessions, generator, RagSettings::from_config(config));

    match engine.answer(request, None).await {
        Ok(answer) => {
            println!("{}", answer.response);
            if !answer.sources.is_empty() {
                println!();
                println!("Sources:");
                for (i, source) in answer.sources.iter().enumerate() {
                    println!(
                        "  [{}] {} #{} ({:.2})",
                        i + 1,
                        source.filename,
                        source.chunk_index,
                        source.score
                    );
                }
            }
            println!();
            println!("session: {}", answer.session_id);
            Ok(())
        }
        Err(RagError::Generation {
            fallback: Some(fallback),
            source,
            ..
        }) => {
            println!("{}", fallback);
            Err(source).context("Generation failed")
        }
        Err(e) => Err(e.into()),
    }
}

fn run_documents(config: &Config) -> Result<()> {
    let index = open_index(config)?;
    let documents = index.list_documents();
    if documents.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    println!(
        "{:<36}  {:<32}  {:>6}  {:>8}  {}",
        "ID", "FILENAME", "CHUNKS", "CHARS", "CREATED"
    );
    for doc in documents {
        println!(
            "{:<36}  {:<32}  {:>6}  {:>8}  {}",
            doc.id,
            doc.filename,
            doc.chunk_count,
            doc.total_chars,
            doc.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

async fn run_delete(config: &Config, document_id: &str) -> Result<()> {
    let index = open_index(config)?;
    match index.delete_document(document_id).await? {
        Some(record) => {
            if !config.index.autosave {
                index.save().await?;
            }
            println!(
                "Deleted {} ({}, {} chunks).",
                record.id, record.filename, record.chunk_count
            );
            Ok(())
        }
        None => bail!("Document not found: {}", document_id),
    }
}

fn run_stats(config: &Config) -> Result<()> {
    let index = open_index(config)?;
    let stats = index.stats();
    println!("ragdesk: index stats");
    println!("====================");
    println!();
    match &config.index.dir {
        Some(dir) => println!("  Index:       {}", dir.display()),
        None => println!("  Index:       (in memory)"),
    }
    println!("  Model:       {} ({} dims, {})", stats.embedding_model, stats.corpus.embedding_dims, stats.metric);
    println!();
    println!("  Documents:   {}", stats.corpus.total_documents);
    println!("  Chunks:      {}", stats.corpus.total_chunks);
    println!("  Characters:  {}", stats.corpus.total_characters);
    println!("  Avg chunk:   {:.1} chars", stats.corpus.average_chunk_size);
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata_keeps_json_types() {
        let m = parse_metadata(&["year=2023".to_string(), "team=ops".to_string()]).unwrap();
        assert_eq!(m["year"], serde_json::json!(2023));
        assert_eq!(m["team"], serde_json::json!("ops"));
        assert!(parse_metadata(&["novalue".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_search_flags() {
        let cli = Cli::try_parse_from(["ragdesk", "search", "water", "--lexical", "--limit", "3"]).unwrap();
        match cli.command {
            Commands::Search { lexical, limit, .. } => {
                assert!(lexical);
                assert_eq!(limit, Some(3));
            }
            _ => panic!("expected search"),
        }
    }
}
