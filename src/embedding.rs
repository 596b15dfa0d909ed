//! Embedding client and remote backends.
//!
//! [`EmbeddingClient`] wraps an [`EmbeddingBackend`] with input
//! sanitisation, token-aware batching, rate limiting, retries, and a
//! short-lived cache. Backends:
//! - **[`OpenAiEmbedder`]**: `POST {base_url}/embeddings` (OpenAI or any
//!   compatible server). Requires `OPENAI_API_KEY`.
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on a local Ollama.
//!
//! # Retry Strategy
//!
//! See [`crate::remote`]: rate limits and timeouts are retried with
//! exponential backoff up to `max_retries`; server and network errors are
//! retried once; quota and credential errors fail immediately.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, info};

pub use docrag_core::embedding::EmbeddingProvider;

use crate::cache::EmbeddingCache;
use crate::config::EmbeddingConfig;
use crate::error::RemoteError;
use crate::remote::{call_with_retry, HttpEndpoint, RateLimiter, RetryPolicy};
use crate::text::{estimate_tokens, strip_control_chars, truncate_at_word, truncate_to_tokens};

/// Placeholder sent in place of text that sanitises to nothing.
pub const EMPTY_PLACEHOLDER: &str = "empty";

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// A remote model that turns a batch of texts into vectors, one per input,
/// in input order.
#[async_trait]
pub trait EmbeddingBackend: EmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RemoteError>;
}

/// Instantiates the backend named by `config.provider`.
pub fn create_backend(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ OpenAI ============

pub struct OpenAiEmbedder {
    endpoint: HttpEndpoint,
    model: String,
    dims: usize,
}

impl OpenAiEmbedder {
    /// # Errors
    ///
    /// Fails if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };
        let base = config.url.as_deref().unwrap_or(OPENAI_DEFAULT_URL);
        let endpoint = HttpEndpoint::new(
            format!("{}/embeddings", base.trim_end_matches('/')),
            Some(api_key),
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self {
            endpoint,
            model: config.model.clone(),
            dims: config.dims,
        })
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RemoteError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self.endpoint.post(&body).await?;
        parse_openai_response(&json)
    }
}

/// Extracts `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, RemoteError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RemoteError::other("invalid embeddings response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| RemoteError::other("invalid embeddings response: missing embedding"))?;
        indexed.push((index, json_vector(embedding)?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn json_vector(value: &serde_json::Value) -> Result<Vec<f32>, RemoteError> {
    value
        .as_array()
        .ok_or_else(|| RemoteError::other("invalid embeddings response: embedding is not an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| RemoteError::other("invalid embeddings response: non-numeric value"))
        })
        .collect()
}

// ============ Ollama ============

/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    endpoint: HttpEndpoint,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);
        let endpoint = HttpEndpoint::new(
            format!("{}/api/embed", base.trim_end_matches('/')),
            None,
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self {
            endpoint,
            model: config.model.clone(),
            dims: config.dims,
        })
    }
}

impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RemoteError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self.endpoint.post(&body).await?;
        json.get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| RemoteError::other("invalid Ollama response: missing embeddings array"))?
            .iter()
            .map(json_vector)
            .collect()
    }
}

// ============ Client ============

/// Input limits applied before anything is sent.
#[derive(Debug, Clone)]
struct InputLimits {
    max_chars: usize,
    max_tokens: usize,
    batch_token_ceiling: usize,
}

/// Embedding client with batching, retry, rate limiting, and caching.
///
/// Cheap to share behind an `Arc`; the limiter and cache are per instance.
pub struct EmbeddingClient {
    backend: Arc<dyn EmbeddingBackend>,
    limits: InputLimits,
    default_batch_size: usize,
    retry: RetryPolicy,
    limiter: RateLimiter,
    cache: EmbeddingCache,
}

impl EmbeddingClient {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, config: &EmbeddingConfig) -> Self {
        Self {
            backend,
            limits: InputLimits {
                max_chars: config.max_input_chars,
                max_tokens: config.max_input_tokens,
                batch_token_ceiling: config.batch_token_ceiling,
            },
            default_batch_size: config.batch_size,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                backoff_base: Duration::from_millis(config.backoff_base_ms),
                backoff_max: Duration::from_millis(config.backoff_max_ms),
                timeout: Duration::from_secs(config.timeout_secs),
            },
            limiter: RateLimiter::new(
                config.requests_per_minute,
                Duration::from_secs(config.rate_window_secs),
            ),
            cache: EmbeddingCache::new(
                config.cache_size,
                Duration::from_secs(config.cache_ttl_secs),
            ),
        }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn dims(&self) -> usize {
        self.backend.dims()
    }

    pub fn default_batch_size(&self) -> usize {
        self.default_batch_size
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Strips control characters, truncates to the character and token
    /// limits at word boundaries, and substitutes [`EMPTY_PLACEHOLDER`] for
    /// empty results.
    pub fn sanitize(&self, text: &str) -> String {
        let clean = strip_control_chars(text);
        let clean = truncate_at_word(clean.trim(), self.limits.max_chars);
        let clean = truncate_to_tokens(clean, self.limits.max_tokens).trim();
        if clean.is_empty() {
            EMPTY_PLACEHOLDER.to_string()
        } else {
            clean.to_string()
        }
    }

    /// Shrinks `batch_size` proportionally when the texts' combined token
    /// estimate exceeds the per-request ceiling.
    fn effective_batch_size(&self, texts: &[String], batch_size: usize) -> usize {
        let batch_size = batch_size.max(1);
        let total_tokens: usize = texts.iter().map(|t| estimate_tokens(t)).sum();
        if total_tokens <= self.limits.batch_token_ceiling {
            return batch_size;
        }
        let shrunk = batch_size * self.limits.batch_token_ceiling / total_tokens;
        debug!(
            total_tokens,
            from = batch_size,
            to = shrunk.max(1),
            "shrinking embedding batch size"
        );
        shrunk.max(1)
    }

    /// Embeds every text, returning one vector per input in input order.
    /// Results populate the cache but the cache is not consulted.
    pub async fn embed(
        &self,
        texts: &[String],
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, RemoteError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let sanitized: Vec<String> = texts.iter().map(|t| self.sanitize(t)).collect();
        let batch_size = self.effective_batch_size(&sanitized, batch_size);

        let mut vectors = Vec::with_capacity(sanitized.len());
        for batch in sanitized.chunks(batch_size) {
            let batch_vectors = self.embed_remote(batch).await?;
            for (text, vector) in batch.iter().zip(&batch_vectors) {
                self.cache.insert(text, vector.clone());
            }
            vectors.extend(batch_vectors);
        }

        info!(
            texts = texts.len(),
            batches = texts.len().div_ceil(batch_size),
            model = self.model_name(),
            "embedded texts"
        );
        Ok(vectors)
    }

    /// Embeds a single text, answering from the cache when possible.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, RemoteError> {
        let sanitized = self.sanitize(text);
        if let Some(vector) = self.cache.get(&sanitized) {
            debug!("embedding cache hit");
            return Ok(vector);
        }
        let vector = self
            .embed_remote(std::slice::from_ref(&sanitized))
            .await?
            .pop()
            .ok_or_else(|| RemoteError::other("empty embedding response"))?;
        self.cache.insert(&sanitized, vector.clone());
        Ok(vector)
    }

    /// Embeds a fixed string without touching the cache, to verify
    /// connectivity and credentials.
    pub async fn check(&self) -> Result<(), RemoteError> {
        self.embed_remote(&["health check".to_string()]).await?;
        Ok(())
    }

    async fn embed_remote(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, RemoteError> {
        let vectors = call_with_retry(&self.retry, &self.limiter, "embeddings", || {
            self.backend.embed_batch(batch)
        })
        .await?;

        if vectors.len() != batch.len() {
            return Err(RemoteError::other(format!(
                "embedding response has {} vectors for {} inputs",
                vectors.len(),
                batch.len()
            )));
        }
        let dims = self.dims();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(RemoteError::other(format!(
                "embedding has {} dimensions, expected {}",
                bad.len(),
                dims
            )));
        }
        Ok(vectors)
    }
}
