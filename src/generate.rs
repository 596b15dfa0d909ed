//! Grounded answer generation over a chat-completion model.
//!
//! [`AnswerGenerator`] builds a system instruction from retrieved context,
//! cleans the conversation, and calls a [`ChatBackend`] under its own rate
//! limiter and retry policy. Streaming is not supported.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::GenerationConfig;
use crate::error::{GenerationError, RemoteError, ValidationError};
use crate::models::{ConversationTurn, Generation, Role, Usage};
use crate::remote::{call_with_retry, HttpEndpoint, RateLimiter, RetryPolicy};
use crate::text::{strip_control_chars, truncate_at_word};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

const GENERIC_INSTRUCTION: &str = "You are a helpful AI assistant that answers questions \
accurately and informatively. If you don't know the answer, say so clearly. \
Always respond in the same language as the user's question.";

/// What a chat backend returns for one completion.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: Usage,
    pub finish_reason: Option<String>,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ConversationTurn],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<ChatCompletion, RemoteError>;
}

/// OpenAI-compatible `POST {base_url}/chat/completions`.
pub struct OpenAiChat {
    endpoint: HttpEndpoint,
    model: String,
}

impl OpenAiChat {
    /// # Errors
    ///
    /// Fails if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };
        let base = config.url.as_deref().unwrap_or(OPENAI_DEFAULT_URL);
        let endpoint = HttpEndpoint::new(
            format!("{}/chat/completions", base.trim_end_matches('/')),
            Some(api_key),
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self {
            endpoint,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ConversationTurn],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<ChatCompletion, RemoteError> {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "frequency_penalty": 0.1,
            "presence_penalty": 0.1,
        });
        let json = self.endpoint.post(&body).await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<ChatCompletion, RemoteError> {
    let choice = json
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| RemoteError::other("invalid chat response: no choices"))?;
    let content = choice
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| RemoteError::other("invalid chat response: missing message content"))?
        .to_string();
    let finish_reason = choice
        .get("finish_reason")
        .and_then(|f| f.as_str())
        .map(str::to_string);
    let count = |field: &str| {
        json.pointer(&format!("/usage/{field}"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32
    };
    Ok(ChatCompletion {
        content,
        usage: Usage {
            prompt_tokens: count("prompt_tokens"),
            completion_tokens: count("completion_tokens"),
            total_tokens: count("total_tokens"),
        },
        finish_reason,
    })
}

/// Prompt limits, in characters.
#[derive(Debug, Clone)]
struct PromptLimits {
    context_budget: usize,
    max_chunk: usize,
    max_message: usize,
}

pub struct AnswerGenerator {
    backend: Arc<dyn ChatBackend>,
    limits: PromptLimits,
    retry: RetryPolicy,
    limiter: RateLimiter,
}

impl AnswerGenerator {
    pub fn new(backend: Arc<dyn ChatBackend>, config: &GenerationConfig) -> Self {
        Self {
            backend,
            limits: PromptLimits {
                context_budget: config.context_budget_chars,
                max_chunk: config.max_chunk_chars,
                max_message: config.max_message_chars,
            },
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
        }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// The system instruction for `context`. Chunks are cleaned, capped at
    /// the per-chunk limit, and taken in order while the running total stays
    /// under the context budget.
    pub fn system_instruction(&self, context: &[String]) -> String {
        let mut selected: Vec<String> = Vec::new();
        let mut total = 0usize;
        for chunk in context {
            let clean = strip_control_chars(chunk);
            let clean = truncate_at_word(clean.trim(), self.limits.max_chunk).trim();
            if clean.is_empty() {
                continue;
            }
            let len = clean.chars().count();
            if total + len >= self.limits.context_budget {
                break;
            }
            total += len;
            selected.push(clean.to_string());
        }

        if selected.is_empty() {
            return GENERIC_INSTRUCTION.to_string();
        }

        format!(
            "You are an AI assistant that answers questions based on provided documents.\n\n\
IMPORTANT RULES:\n\
1. Answer ONLY based on information from the provided documents\n\
2. If the documents don't contain enough information to answer, say so clearly\n\
3. Don't make up information that isn't in the documents\n\
4. Reference specific parts of documents when answering\n\
5. Always respond in the same language as the user's question\n\n\
CONTEXT FROM DOCUMENTS:\n{}\n\n\
Answer user questions based on this context.",
            selected.join(CONTEXT_SEPARATOR)
        )
    }

    /// Drops empty turns and truncates the rest.
    pub fn clean_messages(
        &self,
        messages: &[ConversationTurn],
    ) -> Result<Vec<ConversationTurn>, ValidationError> {
        let cleaned: Vec<ConversationTurn> = messages
            .iter()
            .filter_map(|m| {
                let content = strip_control_chars(&m.content);
                let content = truncate_at_word(content.trim(), self.limits.max_message).trim();
                (!content.is_empty()).then(|| ConversationTurn::new(m.role, content))
            })
            .collect();
        if cleaned.is_empty() {
            return Err(ValidationError::new("no non-empty messages to send"));
        }
        Ok(cleaned)
    }

    pub async fn generate(
        &self,
        messages: &[ConversationTurn],
        context_chunks: &[String],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Generation, GenerationError> {
        if max_tokens == 0 {
            return Err(ValidationError::new("max_tokens must be > 0").into());
        }
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ValidationError::new("temperature must be in [0.0, 2.0]").into());
        }

        let mut prompt = vec![ConversationTurn::new(
            Role::System,
            self.system_instruction(context_chunks),
        )];
        prompt.extend(self.clean_messages(messages)?);
        debug!(messages = prompt.len(), model = self.model_name(), "sending chat request");

        let start = Instant::now();
        let completion = call_with_retry(&self.retry, &self.limiter, "chat", || {
            self.backend.complete(&prompt, max_tokens, temperature)
        })
        .await?;
        let response_time_ms = start.elapsed().as_millis() as u64;

        info!(
            response_time_ms,
            total_tokens = completion.usage.total_tokens,
            "generated answer"
        );
        Ok(Generation {
            content: completion.content,
            usage: completion.usage,
            response_time_ms,
            model: self.model_name().to_string(),
            finish_reason: completion.finish_reason,
        })
    }
}
