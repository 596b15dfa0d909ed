//! Vector index abstraction for docrag.
//!
//! The [`VectorIndex`] trait defines the storage operations the ingestion
//! and query pipeline needs, enabling pluggable backends (SQLite in the app
//! crate, [`memory::InMemoryIndex`] here).
//!
//! # Tenant isolation
//!
//! Every collection belongs to exactly one owner and its name encodes that
//! owner (`user_{owner}_doc_{scope}`). Owner IDs are restricted to
//! `[A-Za-z0-9-]`, so the `_doc_` delimiter is unambiguous and two owners
//! can never map to the same collection. On top of that, every record
//! carries its owner (stamped at write time by [`prepare_records`]) and
//! backends discard any record whose stored owner differs from the
//! requesting owner at read time ([`owned_by`]).

pub mod memory;

use async_trait::async_trait;
use std::cmp::Ordering;

use crate::error::IndexError;
use crate::models::{CollectionStats, Metadata, QueryHit, VectorRecord};

/// Hard upper bound on `top_k`, regardless of what the caller asks for.
pub const MAX_TOP_K: usize = 50;

/// Longest owner ID accepted.
pub const MAX_OWNER_LEN: usize = 64;

/// Sanitized scope IDs are cut to this many characters.
pub const MAX_SCOPE_LEN: usize = 50;

/// Caller-supplied metadata keys that survive [`prepare_records`].
pub const SAFE_METADATA_KEYS: &[&str] = &[
    "document_id",
    "chunk_index",
    "total_chunks",
    "chunk_length",
    "start_char",
    "end_char",
    "filename",
    "file_type",
    "source",
];

/// Identifies one owner's collection. Building a handle is pure; it does
/// not create anything in the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionHandle {
    name: String,
    owner: String,
    scope: String,
}

impl CollectionHandle {
    /// Fails unless `scope` is already in sanitized form, so distinct
    /// document IDs (`a.b` and `ab`) can never share a collection.
    pub fn new(owner: &str, scope: &str) -> Result<Self, IndexError> {
        validate_owner(owner)?;
        let scope = match sanitize_scope(scope)? {
            clean if clean == scope => clean,
            _ => return Err(IndexError::InvalidScope(scope.to_string())),
        };
        Ok(Self {
            name: format!("user_{owner}_doc_{scope}"),
            owner: owner.to_string(),
            scope,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The scope (document) ID.
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

/// Abstract vector storage.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_or_open`](VectorIndex::create_or_open) | Idempotently create a collection |
/// | [`upsert`](VectorIndex::upsert) | Insert or replace records |
/// | [`query`](VectorIndex::query) | Owner-filtered nearest-neighbour search |
/// | [`delete`](VectorIndex::delete) | Drop a whole collection |
/// | [`stats`](VectorIndex::stats) | Existence and record count |
/// | [`list_scopes`](VectorIndex::list_scopes) | Scope IDs an owner has collections for |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Returns the existing collection for `(owner, scope)` or creates it.
    async fn create_or_open(&self, owner: &str, scope: &str)
        -> Result<CollectionHandle, IndexError>;

    /// Writes parallel lists of vectors, texts, metadata, and IDs. Returns
    /// the number of records written.
    async fn upsert(
        &self,
        handle: &CollectionHandle,
        vectors: &[Vec<f32>],
        texts: &[String],
        metadata: &[Metadata],
        ids: &[String],
    ) -> Result<usize, IndexError>;

    /// Nearest neighbours of `query_vector` owned by `owner`, most similar
    /// first, at most `min(top_k, MAX_TOP_K)` hits. A missing collection
    /// yields an empty result.
    async fn query(
        &self,
        handle: &CollectionHandle,
        query_vector: &[f32],
        top_k: usize,
        owner: &str,
    ) -> Result<Vec<QueryHit>, IndexError>;

    /// Removes the collection. `Ok(false)` when it did not exist.
    async fn delete(&self, handle: &CollectionHandle) -> Result<bool, IndexError>;

    async fn stats(&self, handle: &CollectionHandle) -> Result<CollectionStats, IndexError>;

    async fn list_scopes(&self, owner: &str) -> Result<Vec<String>, IndexError>;
}

pub fn validate_owner(owner: &str) -> Result<(), IndexError> {
    let valid = !owner.is_empty()
        && owner.len() <= MAX_OWNER_LEN
        && owner.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(IndexError::InvalidOwner(owner.to_string()))
    }
}

/// Keeps `[A-Za-z0-9_-]`, cut to [`MAX_SCOPE_LEN`] characters.
pub fn sanitize_scope(scope: &str) -> Result<String, IndexError> {
    let clean: String = scope
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(MAX_SCOPE_LEN)
        .collect();
    if clean.is_empty() {
        return Err(IndexError::InvalidScope(scope.to_string()));
    }
    Ok(clean)
}

/// Recovers the scope from a collection name if it belongs to `owner`.
pub fn scope_of<'a>(owner: &str, collection_name: &'a str) -> Option<&'a str> {
    collection_name
        .strip_prefix("user_")?
        .strip_prefix(owner)?
        .strip_prefix("_doc_")
}

/// Validates an upsert and turns it into records.
///
/// Caller metadata is reduced to [`SAFE_METADATA_KEYS`] with string or
/// number values; `owner` and `document_id` are then overwritten from the
/// handle so no caller can mis-attribute a record.
pub fn prepare_records(
    handle: &CollectionHandle,
    vectors: &[Vec<f32>],
    texts: &[String],
    metadata: &[Metadata],
    ids: &[String],
) -> Result<Vec<VectorRecord>, IndexError> {
    let n = vectors.len();
    if texts.len() != n || metadata.len() != n || ids.len() != n {
        return Err(IndexError::LengthMismatch {
            vectors: n,
            texts: texts.len(),
            metadata: metadata.len(),
            ids: ids.len(),
        });
    }
    if let Some(first) = vectors.first() {
        if let Some(bad) = vectors.iter().find(|v| v.len() != first.len() || v.is_empty()) {
            return Err(IndexError::DimensionMismatch {
                expected: first.len(),
                actual: bad.len(),
            });
        }
    }

    let records = vectors
        .iter()
        .zip(texts)
        .zip(metadata)
        .zip(ids)
        .map(|(((vector, text), meta), id)| {
            let mut clean: Metadata = meta
                .iter()
                .filter(|(k, v)| {
                    SAFE_METADATA_KEYS.contains(&k.as_str()) && (v.is_string() || v.is_number())
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            clean.insert("owner".into(), handle.owner().into());
            clean.insert("document_id".into(), handle.scope().into());
            VectorRecord {
                id: id.clone(),
                owner: handle.owner().to_string(),
                document_id: handle.scope().to_string(),
                vector: vector.clone(),
                text: text.clone(),
                metadata: clean,
            }
        })
        .collect();
    Ok(records)
}

/// Read-side ownership check: both the record column and the stamped
/// metadata must name `owner`.
pub fn owned_by(record_owner: &str, metadata: &Metadata, owner: &str) -> bool {
    record_owner == owner && metadata.get("owner").and_then(|v| v.as_str()) == Some(owner)
}

/// Sorts hits by similarity (descending, ties by ID) and truncates to
/// `min(top_k, MAX_TOP_K)`.
pub fn rank_hits(mut hits: Vec<QueryHit>, top_k: usize) -> Vec<QueryHit> {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(top_k.min(MAX_TOP_K));
    hits
}
