//! Ingestion and query orchestration.
//!
//! Ingestion: validate → extract → chunk → embed → index. A document moves
//! `uploaded → extracted → chunked → embedded → indexed → ready`, or to
//! `failed`. A failure before indexing leaves any existing index untouched;
//! a failure while writing the index removes the collection so no partial
//! index is ever searchable. Re-ingesting a document replaces its collection.
//!
//! Query: embed question → owner-scoped search → similarity filter →
//! grounded generation. Finding nothing relevant is a normal outcome
//! (`success == false`), not an error.
//!
//! Stage failures surface as [`RagError`]; nothing is retried here (the
//! remote clients already retry).

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use docrag_core::chunk::{self, ChunkingOptions};
use docrag_core::store::{validate_owner, CollectionHandle, VectorIndex};

use crate::config::Config;
use crate::conversation::ConversationStore;
use crate::embedding::EmbeddingClient;
use crate::error::{AtStage, ExtractionError, RagError, Stage, ValidationError};
use crate::extract::{extract_document, ExtractedFile};
use crate::generate::AnswerGenerator;
use crate::models::{
    Chunk, ConversationTurn, DocumentStats, DocumentStatus, FileInfo, FileType, IngestReport,
    Metadata, QueryOutcome,
};

/// Tunables the pipeline reads from [`Config`].
#[derive(Debug, Clone)]
struct Settings {
    chunking: ChunkingOptions,
    top_k: usize,
    min_similarity: f32,
    history_turns: usize,
    max_tokens: u32,
    temperature: f32,
    max_file_size_bytes: u64,
}

pub struct RagPipeline {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<EmbeddingClient>,
    generator: Arc<AnswerGenerator>,
    settings: Settings,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases an in-flight ingestion slot on drop.
struct IngestSlot<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for IngestSlot<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.key);
    }
}

impl RagPipeline {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<EmbeddingClient>,
        generator: Arc<AnswerGenerator>,
        config: &Config,
    ) -> Result<Self, ValidationError> {
        let settings = Settings {
            chunking: ChunkingOptions::new(
                config.chunking.chunk_size,
                config.chunking.chunk_overlap,
            )?,
            top_k: config.retrieval.top_k,
            min_similarity: config.retrieval.min_similarity,
            history_turns: config.retrieval.history_turns,
            max_tokens: config.generation.max_tokens,
            temperature: config.generation.temperature,
            max_file_size_bytes: config.upload.max_file_size_bytes(),
        };
        Ok(Self {
            index,
            embedder,
            generator,
            settings,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    fn claim_slot(&self, handle: &CollectionHandle) -> Result<IngestSlot<'_>, RagError> {
        let key = handle.name().to_string();
        if !self.in_flight.lock().insert(key.clone()) {
            return Err(RagError::new(
                Stage::Validate,
                ValidationError::new(format!(
                    "document {} is already being processed",
                    handle.scope()
                )),
            ));
        }
        Ok(IngestSlot {
            in_flight: &self.in_flight,
            key,
        })
    }

    /// Ingests an uploaded document for `owner`.
    ///
    /// `document_id` defaults to a fresh UUID. A second ingestion of the
    /// same (owner, document) while one is running is rejected.
    pub async fn ingest(
        &self,
        owner: &str,
        bytes: &[u8],
        file_type: FileType,
        filename: Option<&str>,
        document_id: Option<&str>,
    ) -> Result<IngestReport, RagError> {
        let start = Instant::now();
        let document_id = document_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let handle = CollectionHandle::new(owner, &document_id).at(Stage::Validate)?;
        let _slot = self.claim_slot(&handle)?;
        let filename = filename
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.{}", handle.scope(), file_type));

        info!(owner, document_id = handle.scope(), state = "uploaded", "ingestion started");
        let prepared = match self.prepare(&handle, bytes, file_type, &filename).await {
            Ok(prepared) => prepared,
            Err(err) => {
                // Nothing was written; an existing index stays searchable.
                log_failure(&handle, &err);
                return Err(err);
            }
        };
        let chunk_count = prepared.chunks.len();
        let embedding_count = prepared.vectors.len();

        match self.write_index(&handle, &prepared).await {
            Ok(()) => {
                let processing_time_ms = start.elapsed().as_millis() as u64;
                info!(
                    owner,
                    document_id = handle.scope(),
                    chunk_count,
                    processing_time_ms,
                    state = "ready",
                    "ingestion finished"
                );
                Ok(IngestReport {
                    document_id: handle.scope().to_string(),
                    chunk_count,
                    embedding_count,
                    processing_time_ms,
                    file: prepared.info,
                    status: DocumentStatus::Processed,
                })
            }
            Err(err) => {
                log_failure(&handle, &err);
                if let Err(cleanup) = self.index.delete(&handle).await {
                    warn!(collection = handle.name(), error = %cleanup, "cleanup after failed ingestion failed");
                }
                Err(err)
            }
        }
    }

    /// Reads `path` and ingests it, inferring the type from the extension.
    pub async fn ingest_file(
        &self,
        owner: &str,
        path: &Path,
        document_id: Option<&str>,
    ) -> Result<IngestReport, RagError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_type = FileType::from_extension(&filename)
            .ok_or_else(|| ExtractionError::UnsupportedType(filename.clone()))
            .at(Stage::Validate)?;
        let size_bytes = std::fs::metadata(path)
            .map_err(|source| ExtractionError::Io {
                path: path.to_path_buf(),
                source,
            })
            .at(Stage::Extract)?
            .len();
        if size_bytes > self.settings.max_file_size_bytes {
            return Err(RagError::new(
                Stage::Validate,
                ExtractionError::TooLarge {
                    size_bytes,
                    limit_bytes: self.settings.max_file_size_bytes,
                },
            ));
        }
        let bytes = std::fs::read(path)
            .map_err(|source| ExtractionError::Io {
                path: path.to_path_buf(),
                source,
            })
            .at(Stage::Extract)?;
        self.ingest(owner, &bytes, file_type, Some(&filename), document_id)
            .await
    }

    /// Extract, chunk, and embed. Touches no index state.
    async fn prepare(
        &self,
        handle: &CollectionHandle,
        bytes: &[u8],
        file_type: FileType,
        filename: &str,
    ) -> Result<Prepared, RagError> {
        let ExtractedFile { text, info } = extract_document(
            bytes,
            file_type,
            filename,
            self.settings.max_file_size_bytes,
        )
        .at(Stage::Extract)?;
        info!(document_id = handle.scope(), chars = info.text_length, state = "extracted", "text extracted");

        let chunks = chunk::split(handle.scope(), &text, &self.settings.chunking);
        if chunks.is_empty() {
            return Err(RagError::new(
                Stage::Chunk,
                ValidationError::new("document produced no chunks"),
            ));
        }
        info!(document_id = handle.scope(), chunks = chunks.len(), state = "chunked", "text chunked");

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts, self.embedder.default_batch_size())
            .await
            .at(Stage::Embed)?;
        info!(document_id = handle.scope(), vectors = vectors.len(), state = "embedded", "chunks embedded");

        Ok(Prepared {
            chunks,
            texts,
            vectors,
            info,
        })
    }

    /// Replaces any previous version of the document with `prepared`.
    async fn write_index(
        &self,
        handle: &CollectionHandle,
        prepared: &Prepared,
    ) -> Result<(), RagError> {
        self.index.delete(handle).await.at(Stage::Index)?;
        let handle = self
            .index
            .create_or_open(handle.owner(), handle.scope())
            .await
            .at(Stage::Index)?;
        let metadata: Vec<Metadata> = prepared
            .chunks
            .iter()
            .map(|c| chunk_metadata(c, &prepared.info))
            .collect();
        let ids: Vec<String> = prepared.chunks.iter().map(|c| c.id.clone()).collect();
        let written = self
            .index
            .upsert(&handle, &prepared.vectors, &prepared.texts, &metadata, &ids)
            .await
            .at(Stage::Index)?;
        info!(document_id = handle.scope(), records = written, state = "indexed", "chunks indexed");
        Ok(())
    }

    /// Answers `question` from `owner`'s document using the last
    /// `history_turns` turns of `history` as conversation context.
    pub async fn query(
        &self,
        owner: &str,
        document_id: &str,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<QueryOutcome, RagError> {
        let start = Instant::now();
        if question.trim().is_empty() {
            return Err(RagError::new(
                Stage::Validate,
                ValidationError::new("question must not be empty"),
            ));
        }
        let handle = CollectionHandle::new(owner, document_id).at(Stage::Validate)?;

        let query_vector = self.embedder.embed_one(question).await.at(Stage::Embed)?;
        let hits = self
            .index
            .query(&handle, &query_vector, self.settings.top_k, owner)
            .await
            .at(Stage::Retrieve)?;
        let hits: Vec<_> = hits
            .into_iter()
            .filter(|h| h.similarity >= self.settings.min_similarity)
            .collect();

        if hits.is_empty() {
            info!(owner, document_id = handle.scope(), "no relevant chunks found");
            return Ok(QueryOutcome {
                success: false,
                answer: None,
                found_chunks: 0,
                chunks: Vec::new(),
                generation: None,
                total_time_ms: start.elapsed().as_millis() as u64,
            });
        }

        let skip = history.len().saturating_sub(self.settings.history_turns);
        let mut messages: Vec<ConversationTurn> = history[skip..].to_vec();
        messages.push(ConversationTurn::user(question));
        let context: Vec<String> = hits.iter().map(|h| h.text.clone()).collect();

        let generation = self
            .generator
            .generate(
                &messages,
                &context,
                self.settings.max_tokens,
                self.settings.temperature,
            )
            .await
            .at(Stage::Generate)?;

        let total_time_ms = start.elapsed().as_millis() as u64;
        info!(
            owner,
            document_id = handle.scope(),
            found_chunks = hits.len(),
            total_time_ms,
            "query answered"
        );
        Ok(QueryOutcome {
            success: true,
            answer: Some(generation.content.clone()),
            found_chunks: hits.len(),
            chunks: hits,
            generation: Some(generation),
            total_time_ms,
        })
    }

    /// Asks about the owner's active document, using and extending the
    /// stored conversation.
    pub async fn ask(
        &self,
        conversations: &ConversationStore,
        owner: &str,
        question: &str,
    ) -> Result<QueryOutcome, RagError> {
        let document_id = conversations.active_document(owner).ok_or_else(|| {
            RagError::new(
                Stage::Validate,
                ValidationError::new("no document selected for this conversation"),
            )
        })?;
        let history = conversations.history(owner);
        let outcome = self.query(owner, &document_id, question, &history).await?;
        if let Some(answer) = &outcome.answer {
            conversations.record_exchange(owner, question, answer);
        }
        Ok(outcome)
    }

    /// Deletes the document's collection. `false` if there was none.
    pub async fn delete(&self, owner: &str, document_id: &str) -> Result<bool, RagError> {
        let handle = CollectionHandle::new(owner, document_id).at(Stage::Validate)?;
        let deleted = self.index.delete(&handle).await.at(Stage::Delete)?;
        info!(owner, document_id = handle.scope(), deleted, "document deleted");
        Ok(deleted)
    }

    pub async fn stats(&self, owner: &str, document_id: &str) -> Result<DocumentStats, RagError> {
        let handle = CollectionHandle::new(owner, document_id).at(Stage::Validate)?;
        let stats = self.index.stats(&handle).await.at(Stage::Stats)?;
        Ok(DocumentStats {
            document_id: handle.scope().to_string(),
            indexed: stats.exists && stats.record_count > 0,
            chunk_count: stats.record_count,
        })
    }

    /// Document IDs that have a collection for `owner`.
    pub async fn list_documents(&self, owner: &str) -> Result<Vec<String>, RagError> {
        validate_owner(owner).at(Stage::Validate)?;
        self.index.list_scopes(owner).await.at(Stage::Stats)
    }
}

/// A document that has been extracted, chunked, and embedded.
struct Prepared {
    chunks: Vec<Chunk>,
    texts: Vec<String>,
    vectors: Vec<Vec<f32>>,
    info: FileInfo,
}

fn log_failure(handle: &CollectionHandle, err: &RagError) {
    warn!(
        owner = handle.owner(),
        document_id = handle.scope(),
        stage = %err.stage,
        error = %err.cause,
        state = "failed",
        "ingestion failed"
    );
}

fn chunk_metadata(chunk: &Chunk, file: &FileInfo) -> Metadata {
    let value = json!({
        "document_id": chunk.document_id,
        "chunk_index": chunk.chunk_index,
        "total_chunks": chunk.total_chunks,
        "chunk_length": chunk.char_len(),
        "start_char": chunk.start_char,
        "end_char": chunk.end_char,
        "filename": file.filename,
        "file_type": file.file_type.as_str(),
        "source": "upload",
    });
    match value {
        serde_json::Value::Object(map) => map,
        _ => Metadata::new(),
    }
}
