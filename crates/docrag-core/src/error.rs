//! Error types shared by the core components.

use thiserror::Error;

/// Malformed input to a component: bad configuration, empty required
/// fields, mismatched argument lists. Indicates a caller bug and is never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation error: {0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Vector index failures.
///
/// A missing collection on the read path is not an error (queries return an
/// empty result); on the write path it surfaces as [`IndexError::CollectionNotFound`].
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid owner id {0:?}: expected 1-64 characters of [A-Za-z0-9-]")]
    InvalidOwner(String),

    #[error("invalid scope id {0:?}: expected 1-50 characters of [A-Za-z0-9_-]")]
    InvalidScope(String),

    #[error(
        "upsert length mismatch: {vectors} vectors, {texts} texts, {metadata} metadata, {ids} ids"
    )]
    LengthMismatch {
        vectors: usize,
        texts: usize,
        metadata: usize,
        ids: usize,
    },

    #[error("query vector is empty")]
    EmptyQuery,

    #[error("vector dimension mismatch: collection holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("collection {collection} belongs to another owner")]
    OwnerMismatch { collection: String },

    #[error("index backend error: {0}")]
    Backend(String),
}
