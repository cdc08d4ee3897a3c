//! # ragdesk core
//!
//! Synchronous, I/O-free building blocks for ragdesk: data models,
//! sentence-aware chunking, the BM25 lexical index, the flat vector index,
//! hybrid score fusion, the coupled [`corpus::Corpus`] that keeps both
//! indexes consistent, and the per-session conversation store.
//!
//! Nothing in this crate touches the network, the filesystem, or an async
//! runtime. Embedding and generation are collaborators owned by the
//! `ragdesk` application crate.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Documents, chunks, search results, messages |
//! | [`error`] | Typed error taxonomy |
//! | [`chunk`] | Text → bounded, overlapping chunks |
//! | [`lexical`] | BM25 keyword index |
//! | [`vector`] | Exhaustive nearest-neighbour index |
//! | [`hybrid`] | Min-max normalization and alpha fusion |
//! | [`corpus`] | Chunk store + both indexes, atomic insert/delete |
//! | [`session`] | Bounded, isolated conversation histories |
//! | [`embedding`] | Embedding provider metadata trait |

pub mod chunk;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod hybrid;
pub mod lexical;
pub mod models;
pub mod session;
pub mod vector;
