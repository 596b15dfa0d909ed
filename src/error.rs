//! Error types for the docrag pipeline.
//!
//! Each component has its own error enum; the orchestrator wraps whichever
//! one occurred into a [`RagError`] that records the pipeline [`Stage`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use docrag_core::{IndexError, ValidationError};

use crate::models::FileType;

/// Failures converting a stored file into text. All are permanent.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("PDF is password-protected")]
    Encrypted,

    #[error("{file_type} file is corrupt or unreadable: {reason}")]
    Corrupt { file_type: FileType, reason: String },

    #[error("no extractable text in {0} file")]
    NoText(FileType),

    #[error("file is {size_bytes} bytes, limit is {limit_bytes}")]
    TooLarge { size_bytes: u64, limit_bytes: u64 },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractionError {
    pub(crate) fn corrupt(file_type: FileType, reason: impl ToString) -> Self {
        ExtractionError::Corrupt {
            file_type,
            reason: reason.to_string(),
        }
    }
}

/// Failures talking to a remote embedding or chat model.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    #[error("provider quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("provider rejected credentials: {0}")]
    Unauthorized(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider error{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Other { status: Option<u16>, message: String },
}

impl RemoteError {
    pub fn other(message: impl Into<String>) -> Self {
        RemoteError::Other {
            status: None,
            message: message.into(),
        }
    }

    /// Whether retrying later can succeed. Quota and credential failures
    /// need operator action; client-side HTTP errors will fail again.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::RateLimited(_) | RemoteError::Timeout(_) => true,
            RemoteError::QuotaExhausted(_) | RemoteError::Unauthorized(_) => false,
            RemoteError::Other { status: None, .. } => true,
            RemoteError::Other {
                status: Some(status),
                ..
            } => *status >= 500,
        }
    }
}

/// Pipeline step at which a [`RagError`] occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Extract,
    Chunk,
    Embed,
    Index,
    Retrieve,
    Generate,
    Delete,
    Stats,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Extract => "extract",
            Stage::Chunk => "chunk",
            Stage::Embed => "embed",
            Stage::Index => "index",
            Stage::Retrieve => "retrieve",
            Stage::Generate => "generate",
            Stage::Delete => "delete",
            Stage::Stats => "stats",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The underlying component error of a [`RagError`].
#[derive(Debug, Error)]
pub enum Cause {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl From<GenerationError> for Cause {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Validation(e) => Cause::Validation(e),
            GenerationError::Remote(e) => Cause::Remote(e),
        }
    }
}

/// Failures from the answer generator.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// The only error type returned by [`RagPipeline`](crate::rag::RagPipeline).
#[derive(Debug, Error)]
#[error("processing failed at stage {stage}: {cause}")]
pub struct RagError {
    pub stage: Stage,
    #[source]
    pub cause: Cause,
}

impl RagError {
    pub fn new(stage: Stage, cause: impl Into<Cause>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }
}

/// Attaches a [`Stage`] to a component result.
pub(crate) trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, RagError>;
}

impl<T, E: Into<Cause>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, RagError> {
        self.map_err(|e| RagError::new(stage, e))
    }
}
