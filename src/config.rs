use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docrag_core::chunk::ChunkingOptions;
use docrag_core::store::MAX_TOP_K;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn options(&self) -> Result<ChunkingOptions> {
        Ok(ChunkingOptions::new(self.chunk_size, self.chunk_overlap)?)
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            history_turns: default_history_turns(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_min_similarity() -> f32 {
    0.3
}
fn default_history_turns() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Base URL; the provider's public default when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default = "default_batch_token_ceiling")]
    pub batch_token_ceiling: usize,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
            max_input_chars: default_max_input_chars(),
            max_input_tokens: default_max_input_tokens(),
            batch_token_ceiling: default_batch_token_ceiling(),
            requests_per_minute: default_requests_per_minute(),
            rate_window_secs: default_rate_window_secs(),
            cache_size: default_cache_size(),
            cache_ttl_secs: default_cache_ttl_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_batch_size() -> usize {
    50
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_timeout_secs() -> u64 {
    30
}
fn default_max_input_chars() -> usize {
    8000
}
fn default_max_input_tokens() -> usize {
    8192
}
fn default_batch_token_ceiling() -> usize {
    100_000
}
fn default_requests_per_minute() -> u32 {
    60
}
fn default_rate_window_secs() -> u64 {
    60
}
fn default_cache_size() -> usize {
    1000
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_context_budget_chars")]
    pub context_budget_chars: usize,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
            requests_per_minute: default_requests_per_minute(),
            rate_window_secs: default_rate_window_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            context_budget_chars: default_context_budget_chars(),
            max_chunk_chars: default_max_chunk_chars(),
            max_message_chars: default_max_message_chars(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_context_budget_chars() -> usize {
    6000
}
fn default_max_chunk_chars() -> usize {
    2000
}
fn default_max_message_chars() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

impl UploadConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

fn default_max_file_size_mb() -> u64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// A config with every section defaulted, pointing at `db_path`.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            upload: UploadConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        // Validate chunking
        self.chunking
            .options()
            .context("chunking.chunk_size must be > 0 and > chunking.chunk_overlap")?;

        // Validate retrieval
        if !(1..=MAX_TOP_K).contains(&self.retrieval.top_k) {
            anyhow::bail!("retrieval.top_k must be in [1, {}]", MAX_TOP_K);
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_similarity) {
            anyhow::bail!("retrieval.min_similarity must be in [0.0, 1.0]");
        }

        // Validate embedding
        let e = &self.embedding;
        match e.provider.as_str() {
            "openai" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be openai or ollama.",
                other
            ),
        }
        if e.dims == 0 {
            anyhow::bail!("embedding.dims must be > 0");
        }
        if e.model.trim().is_empty() {
            anyhow::bail!("embedding.model must not be empty");
        }
        if e.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        if e.requests_per_minute == 0 || e.rate_window_secs == 0 {
            anyhow::bail!("embedding.requests_per_minute and rate_window_secs must be > 0");
        }
        if e.cache_ttl_secs == 0 {
            anyhow::bail!("embedding.cache_ttl_secs must be > 0");
        }
        if e.max_input_chars == 0 || e.max_input_tokens == 0 || e.batch_token_ceiling == 0 {
            anyhow::bail!("embedding input limits must be > 0");
        }

        // Validate generation
        let g = &self.generation;
        if !(0.0..=2.0).contains(&g.temperature) {
            anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
        }
        if g.max_tokens == 0 {
            anyhow::bail!("generation.max_tokens must be > 0");
        }
        if g.requests_per_minute == 0 || g.rate_window_secs == 0 {
            anyhow::bail!("generation.requests_per_minute and rate_window_secs must be > 0");
        }
        if g.max_message_chars == 0 || g.max_chunk_chars == 0 {
            anyhow::bail!("generation message and chunk limits must be > 0");
        }
        // A budget that cannot hold one full chunk would always fall back to
        // the generic prompt.
        if g.context_budget_chars <= g.max_chunk_chars {
            anyhow::bail!("generation.context_budget_chars must be > generation.max_chunk_chars");
        }

        if self.upload.max_file_size_mb == 0 {
            anyhow::bail!("upload.max_file_size_mb must be > 0");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
