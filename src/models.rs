//! Result types returned by the pipeline, plus re-exports of the core
//! models.

use serde::Serialize;

pub use docrag_core::models::{
    Chunk, CollectionStats, ConversationTurn, DocumentStatus, FileType, Metadata, QueryHit, Role,
    VectorRecord,
};

/// Facts about an uploaded file, handed to the record-keeping collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    pub filename: String,
    pub size_bytes: u64,
    /// SHA-256 of the raw bytes, hex encoded.
    pub sha256: String,
    pub file_type: FileType,
    /// Length of the extracted text in characters.
    pub text_length: usize,
    pub word_count: usize,
    pub line_count: usize,
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub chunk_count: usize,
    pub embedding_count: usize,
    pub processing_time_ms: u64,
    pub file: FileInfo,
    pub status: DocumentStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A chat-model answer and its bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct Generation {
    pub content: String,
    pub usage: Usage,
    pub response_time_ms: u64,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Result of a question against one document.
///
/// `success == false` with `found_chunks == 0` is the normal "nothing
/// relevant" outcome, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub success: bool,
    pub answer: Option<String>,
    pub found_chunks: usize,
    pub chunks: Vec<QueryHit>,
    pub generation: Option<Generation>,
    pub total_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentStats {
    pub document_id: String,
    pub indexed: bool,
    pub chunk_count: usize,
}
