//! # docrag
//!
//! Ask questions about an uploaded document.
//!
//! A document (TXT, PDF, or DOCX) is extracted to text, split into
//! overlapping chunks, embedded through a remote embedding service, and
//! stored in a vector collection private to its owner. Questions are
//! embedded the same way, the closest chunks are retrieved, and a chat
//! model answers using only those chunks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌───────────┐   ┌──────────────┐
//! │ Extract  │──▶│  Chunk  │──▶│   Embed   │──▶│ Vector index │
//! │ txt/pdf/ │   │ (core)  │   │ (remote,  │   │ user_{o}_doc │
//! │ docx     │   └─────────┘   │  cached)  │   │ _{d}         │
//! └──────────┘                 └───────────┘   └──────┬───────┘
//!                                                     │ top-k
//!                                                     ▼
//!                                              ┌──────────────┐
//!                                              │   Generate   │
//!                                              │ (chat model) │
//!                                              └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docrag init                                   # create database
//! docrag ingest report.pdf --owner 42           # prints the document ID
//! docrag ask <doc-id> "What is the deadline?" --owner 42
//! docrag delete <doc-id> --owner 42
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Report and result types |
//! | [`extract`] | Text extraction from TXT, PDF, DOCX |
//! | [`embedding`] | Embedding backends and the batching client |
//! | [`generate`] | Chat backends and grounded answer generation |
//! | [`remote`] | Rate limiting, retry, and HTTP plumbing |
//! | [`index_sqlite`] | SQLite-backed vector index |
//! | [`rag`] | Ingestion and query orchestration |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod config;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generate;
pub mod index_sqlite;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod rag;
pub mod remote;
pub mod text;

pub use docrag_core::chunk::{split as split_text, ChunkingOptions};
pub use docrag_core::store::{memory::InMemoryIndex, CollectionHandle, VectorIndex};
pub use error::{RagError, Stage};
pub use rag::RagPipeline;
