//! SQLite-backed [`VectorIndex`].
//!
//! Collections are rows in `collections`; records live in `vectors` with
//! the embedding stored as a little-endian f32 BLOB. Search is brute-force
//! cosine distance over the rows of one collection, pre-filtered by owner
//! in SQL and re-checked in Rust.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use docrag_core::embedding::{blob_to_vec, cosine_distance, similarity_from_distance, vec_to_blob};
use docrag_core::store::{
    owned_by, prepare_records, rank_hits, validate_owner, CollectionHandle, VectorIndex,
};

use crate::error::IndexError;
use crate::models::{CollectionStats, Metadata, QueryHit};

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Wraps a pool whose schema has been created by
    /// [`run_migrations`](crate::migrate::run_migrations).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// `None` when the collection does not exist; `Some(None)` before the
    /// first upsert fixes its dimension.
    async fn collection_dims(&self, name: &str) -> Result<Option<Option<usize>>, IndexError> {
        let row = sqlx::query("SELECT dims FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            None => Ok(None),
            Some(row) => {
                let dims: Option<i64> = row.try_get("dims").map_err(backend)?;
                Ok(Some(dims.map(|d| d as usize)))
            }
        }
    }
}

fn backend(e: sqlx::Error) -> IndexError {
    IndexError::Backend(e.to_string())
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn create_or_open(
        &self,
        owner: &str,
        scope: &str,
    ) -> Result<CollectionHandle, IndexError> {
        let handle = CollectionHandle::new(owner, scope)?;
        sqlx::query(
            r#"
            INSERT INTO collections (name, owner, scope, dims, created_at)
            VALUES (?, ?, ?, NULL, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(handle.name())
        .bind(handle.owner())
        .bind(handle.scope())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        let stored_owner: String = sqlx::query_scalar("SELECT owner FROM collections WHERE name = ?")
            .bind(handle.name())
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        if stored_owner != owner {
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
        let dims = self
            .collection_dims(handle.name())
            .await?
            .ok_or_else(|| IndexError::CollectionNotFound(handle.name().to_string()))?;
        let Some(first) = records.first() else {
            return Ok(0);
        };
        let incoming = first.vector.len();

        let mut tx = self.pool.begin().await.map_err(backend)?;
        match dims {
            Some(expected) if expected != incoming => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: incoming,
                });
            }
            Some(_) => {}
            None => {
                sqlx::query("UPDATE collections SET dims = ? WHERE name = ?")
                    .bind(incoming as i64)
                    .bind(handle.name())
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;
            }
        }

        for record in &records {
            let metadata_json = serde_json::Value::Object(record.metadata.clone()).to_string();
            sqlx::query(
                r#"
                INSERT INTO vectors (collection, id, owner, document_id, text, metadata_json, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    owner = excluded.owner,
                    document_id = excluded.document_id,
                    text = excluded.text,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding
                "#,
            )
            .bind(handle.name())
            .bind(&record.id)
            .bind(&record.owner)
            .bind(&record.document_id)
            .bind(&record.text)
            .bind(metadata_json)
            .bind(vec_to_blob(&record.vector))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(records.len())
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
        match self.collection_dims(handle.name()).await? {
            None => return Ok(Vec::new()),
            Some(Some(expected)) if expected != query_vector.len() => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: query_vector.len(),
                });
            }
            Some(_) => {}
        }

        let rows = sqlx::query(
            "SELECT id, owner, text, metadata_json, embedding FROM vectors WHERE collection = ? AND owner = ?",
        )
        .bind(handle.name())
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let record_owner: String = row.try_get("owner").map_err(backend)?;
            let metadata_json: String = row.try_get("metadata_json").map_err(backend)?;
            let metadata: Metadata = serde_json::from_str(&metadata_json)
                .map_err(|e| IndexError::Backend(format!("corrupt metadata: {e}")))?;
            if !owned_by(&record_owner, &metadata, owner) {
                continue;
            }
            let blob: Vec<u8> = row.try_get("embedding").map_err(backend)?;
            let distance = cosine_distance(query_vector, &blob_to_vec(&blob));
            hits.push(QueryHit {
                id: row.try_get("id").map_err(backend)?,
                text: row.try_get("text").map_err(backend)?,
                similarity: similarity_from_distance(distance),
                metadata,
            });
        }
        Ok(rank_hits(hits, top_k))
    }

    async fn delete(&self, handle: &CollectionHandle) -> Result<bool, IndexError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("DELETE FROM vectors WHERE collection = ?")
            .bind(handle.name())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        let removed = sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(handle.name())
            .execute(&mut *tx)
            .await
            .map_err(backend)?
            .rows_affected();
        tx.commit().await.map_err(backend)?;
        Ok(removed > 0)
    }

    async fn stats(&self, handle: &CollectionHandle) -> Result<CollectionStats, IndexError> {
        if self.collection_dims(handle.name()).await?.is_none() {
            return Ok(CollectionStats {
                exists: false,
                record_count: 0,
            });
        }
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE collection = ?")
            .bind(handle.name())
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(CollectionStats {
            exists: true,
            record_count: count as usize,
        })
    }

    async fn list_scopes(&self, owner: &str) -> Result<Vec<String>, IndexError> {
        validate_owner(owner)?;
        sqlx::query_scalar("SELECT scope FROM collections WHERE owner = ? ORDER BY scope")
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)
    }
}
