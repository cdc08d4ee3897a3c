//! # ragdesk
//!
//! Document ingestion, hybrid retrieval, and grounded question answering
//! over your own files.
//!
//! Documents are split into overlapping chunks, indexed twice (BM25 terms
//! and embedding vectors), and searched with an alpha-weighted fusion of
//! both rankings. Chat turns retrieve the top chunks, hand them to a
//! generation backend with a bounded slice of the session's history, and
//! return the answer with citations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────────────┐
//! │ extract  │──▶│ chunk+embed  │──▶│ Corpus             │──▶ persist (4 files)
//! │ pdf/docx │   │ (index)      │   │ BM25 + flat vector │
//! └──────────┘   └──────────────┘   └─────────┬──────────┘
//!                                             │ hybrid search
//!                        ┌────────────────────┤
//!                        ▼                    ▼
//!                  ┌──────────┐        ┌────────────┐
//!                  │   CLI    │        │ rag + HTTP │──▶ generator
//!                  │(ragdesk) │        │  sessions  │
//!                  └──────────┘        └────────────┘
//! ```
//!
//! The pure, synchronous pieces (chunker, both indexes, fusion, sessions)
//! live in the `ragdesk-core` crate, re-exported here as `ragdesk::engine`.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and env overrides |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`extract`] | Text extraction from txt/md/pdf/docx |
//! | [`embedding`] | Embedding backends |
//! | [`generation`] | Generation backends |
//! | [`cancel`] | Cancellation token |
//! | [`index`] | Index lifecycle: ingest, delete, search |
//! | [`persist`] | On-disk index layout |
//! | [`rag`] | Chat turn orchestration |
//! | [`server`] | HTTP API |

pub use ragdesk_core as engine;

pub mod cancel;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod index;
pub mod logging;
pub mod persist;
pub mod rag;
pub mod server;
