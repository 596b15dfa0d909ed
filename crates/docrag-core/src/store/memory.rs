//! In-memory [`VectorIndex`] implementation for tests and ephemeral runs.
//!
//! Collections live behind their own `parking_lot::RwLock`, so writers to
//! one collection never block readers of another. Search is brute-force
//! cosine distance over the owner's records.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::embedding::{cosine_distance, similarity_from_distance};
use crate::error::IndexError;
use crate::models::{CollectionStats, Metadata, QueryHit, VectorRecord};

use super::{owned_by, prepare_records, rank_hits, scope_of, CollectionHandle, VectorIndex};

struct Collection {
    owner: String,
    dims: Option<usize>,
    records: BTreeMap<String, VectorRecord>,
}

/// In-memory vector index.
#[derive(Default)]
pub struct InMemoryIndex {
    collections: RwLock<HashMap<String, Arc<RwLock<Collection>>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, handle: &CollectionHandle) -> Option<Arc<RwLock<Collection>>> {
        self.collections.read().get(handle.name()).cloned()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn create_or_open(
        &self,
        owner: &str,
        scope: &str,
    ) -> Result<CollectionHandle, IndexError> {
        let handle = CollectionHandle::new(owner, scope)?;
        let mut collections = self.collections.write();
        let entry = collections.entry(handle.name().to_string()).or_insert_with(|| {
            Arc::new(RwLock::new(Collection {
                owner: owner.to_string(),
                dims: None,
                records: BTreeMap::new(),
            }))
        });
        if entry.read().owner != owner {
            return Err(IndexError::OwnerMismatch {
                collection: handle.name().to_string(),
            });
        }
        Ok(handle)
    }

    async fn upsert(
        &self,
        handle: &CollectionHandle,
        vectors: &[Vec<f32>],
        texts: &[String],
        metadata: &[Metadata],
        ids: &[String],
    ) -> Result<usize, IndexError> {
        let records = prepare_records(handle, vectors, texts, metadata, ids)?;
        let collection = self
            .collection(handle)
            .ok_or_else(|| IndexError::CollectionNotFound(handle.name().to_string()))?;
        let mut collection = collection.write();

        if let Some(first) = records.first() {
            match collection.dims {
                Some(expected) if expected != first.vector.len() => {
                    return Err(IndexError::DimensionMismatch {
                        expected,
                        actual: first.vector.len(),
                    });
                }
                Some(_) => {}
                None => collection.dims = Some(first.vector.len()),
            }
        }

        let written = records.len();
        for record in records {
            collection.records.insert(record.id.clone(), record);
        }
        Ok(written)
    }

    async fn query(
        &self,
        handle: &CollectionHandle,
        query_vector: &[f32],
        top_k: usize,
        owner: &str,
    ) -> Result<Vec<QueryHit>, IndexError> {
        if query_vector.is_empty() {
            return Err(IndexError::EmptyQuery);
        }
        let Some(collection) = self.collection(handle) else {
            return Ok(Vec::new());
        };
        let collection = collection.read();
        if let Some(expected) = collection.dims {
            if expected != query_vector.len() {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: query_vector.len(),
                });
            }
        }

        let hits = collection
            .records
            .values()
            .filter(|r| owned_by(&r.owner, &r.metadata, owner))
            .map(|r| QueryHit {
                id: r.id.clone(),
                text: r.text.clone(),
                similarity: similarity_from_distance(cosine_distance(query_vector, &r.vector)),
                metadata: r.metadata.clone(),
            })
            .collect();
        Ok(rank_hits(hits, top_k))
    }

    async fn delete(&self, handle: &CollectionHandle) -> Result<bool, IndexError> {
        Ok(self.collections.write().remove(handle.name()).is_some())
    }

    async fn stats(&self, handle: &CollectionHandle) -> Result<CollectionStats, IndexError> {
        Ok(match self.collection(handle) {
            Some(c) => CollectionStats {
                exists: true,
                record_count: c.read().records.len(),
            },
            None => CollectionStats {
                exists: false,
                record_count: 0,
            },
        })
    }

    async fn list_scopes(&self, owner: &str) -> Result<Vec<String>, IndexError> {
        super::validate_owner(owner)?;
        let mut scopes: Vec<String> = self
            .collections
            .read()
            .keys()
            .filter_map(|name| scope_of(owner, name).map(str::to_string))
            .collect();
        scopes.sort();
        Ok(scopes)
    }
}
