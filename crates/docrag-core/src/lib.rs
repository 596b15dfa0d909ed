//! # docrag core
//!
//! Runtime-agnostic logic for docrag: data models, the recursive chunker,
//! embedding vector utilities, and the [`store::VectorIndex`] abstraction
//! with an in-memory implementation.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network code.
//! Remote embedding/generation clients, the SQLite-backed index, and the
//! ingestion/query orchestrator live in the `docrag` app crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod store;

pub use error::{IndexError, ValidationError};
