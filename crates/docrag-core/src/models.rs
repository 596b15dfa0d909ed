//! Core data models used throughout docrag.
//!
//! These types represent the chunks, vector records, query hits, and
//! conversation turns that flow through the ingestion and query pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Free-form metadata attached to a vector record.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Declared type of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Txt,
    Pdf,
    Docx,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Txt => "txt",
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
        }
    }

    /// Infer the type from a file name's extension (case-insensitive).
    pub fn from_extension(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        ext.parse().ok()
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "txt" => Ok(FileType::Txt),
            "pdf" => Ok(FileType::Pdf),
            "docx" => Ok(FileType::Docx),
            other => Err(ValidationError::new(format!(
                "unsupported file type: {other} (expected txt, pdf, or docx)"
            ))),
        }
    }
}

/// Processing status the record-keeping collaborator stores for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processed,
    Failed,
}

/// A contiguous segment of a document's extracted text.
///
/// `start_char`/`end_char` are character (not byte) offsets into the
/// extracted text, and `text` is exactly that span.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    /// `"{document_id}_{chunk_index}"`; doubles as the vector record ID.
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

impl Chunk {
    /// Length of the chunk in characters.
    pub fn char_len(&self) -> usize {
        self.end_char - self.start_char
    }
}

/// The persisted unit in a vector index.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub owner: String,
    pub document_id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

/// One element of a query result: a chunk and how close it is to the query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    pub id: String,
    pub text: String,
    /// Similarity in `[0, 1]`, higher is closer.
    pub similarity: f32,
    pub metadata: Metadata,
}

/// Existence and size of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub exists: bool,
    pub record_count: usize,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A (role, content) pair used as generation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}
