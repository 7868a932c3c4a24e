//! Provider-independent text generation with retries and structured output.

use std::sync::Arc;
use std::time::Duration;

use agri_core_common::{EngineError, LlmConfig, ProviderKind, Result};
use ollama_rs::generation::parameters::{FormatType, JsonStructure};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::provider::{LlmBackend, ResolvedParams, StaticBackend, WireFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// Per-call generation options; unset fields fall back to configuration
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub stop: Option<Vec<String>>,
    pub response_format: ResponseFormat,
}

pub struct LlmClient {
    backend: LlmBackend,
    http: reqwest::Client,
    model: String,
    config: LlmConfig,
}

impl LlmClient {
    /// Client for the configured default provider and model.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Self::for_provider(config, config.default_provider, None)
    }

    /// Client for an explicitly chosen provider, optionally overriding the
    /// model.
    pub fn for_provider(
        config: &LlmConfig,
        provider: ProviderKind,
        model: Option<String>,
    ) -> Result<Self> {
        let backend = LlmBackend::from_config(config, provider)?;
        Ok(Self {
            backend,
            http: reqwest::Client::new(),
            model: model.unwrap_or_else(|| config.default_model.clone()),
            config: config.clone(),
        })
    }

    /// Client over an injected backend; used by tests and offline demos.
    pub fn with_backend(backend: LlmBackend, config: LlmConfig, model: impl Into<String>) -> Self {
        Self {
            backend,
            http: reqwest::Client::new(),
            model: model.into(),
            config,
        }
    }

    /// Shorthand for a scripted client with default configuration.
    pub fn scripted(backend: Arc<StaticBackend>) -> Self {
        Self::with_backend(
            LlmBackend::Static(backend),
            LlmConfig::default(),
            "static",
        )
    }

    pub fn provider(&self) -> ProviderKind {
        self.backend.kind()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn resolve(&self, params: &GenerationParams) -> ResolvedParams {
        ResolvedParams {
            temperature: params.temperature.unwrap_or(self.config.temperature),
            max_tokens: params.max_tokens.unwrap_or(self.config.max_tokens),
            stop: params.stop.clone(),
        }
    }

    async fn chat_with_deadline(
        &self,
        messages: &[ChatMessage],
        resolved: &ResolvedParams,
        format: WireFormat,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let call = self
            .backend
            .chat_once(&self.http, &self.model, messages, resolved, format);
        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            outcome = tokio::time::timeout(timeout, call) => match outcome {
                Err(_) => Err(EngineError::UpstreamUnavailable(format!(
                    "generation exceeded {} ms", timeout.as_millis()
                ))),
                Ok(result) => result,
            },
        }
    }

    /// Chat completion returning free text. Transient provider failures are
    /// retried with exponential backoff; everything else surfaces directly.
    pub async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let resolved = self.resolve(params);
        let timeout =
            Duration::from_millis(params.timeout_ms.unwrap_or(self.config.generate_timeout_ms));
        let retry = &self.config.retry;

        let mut last_err = None;
        for attempt in 0..retry.max_attempts {
            let format = match params.response_format {
                ResponseFormat::Text => WireFormat::Text,
                ResponseFormat::Json => WireFormat::Json,
            };
            match self
                .chat_with_deadline(messages, &resolved, format, timeout, cancel)
                .await
            {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    let delay = retry.backoff_ms(attempt);
                    warn!(attempt, delay_ms = delay, error = %e, "generation failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| EngineError::internal("retry loop exited without error")))
    }

    /// Completion constrained to `T`'s JSON schema. Malformed output is
    /// retried with corrective feedback appended to the conversation; after
    /// the retry budget the call fails with `SchemaViolation`.
    pub async fn generate_structured<T>(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let resolved = self.resolve(params);
        let timeout =
            Duration::from_millis(params.timeout_ms.unwrap_or(self.config.structured_timeout_ms));
        let retry = &self.config.retry;

        let schema = schemars::gen::SchemaGenerator::default().into_root_schema_for::<T>();
        let schema_text = serde_json::to_string(&schema)?;

        let mut conversation: Vec<ChatMessage> = Vec::with_capacity(messages.len() + 1);
        conversation.push(ChatMessage::system(format!(
            "Respond with a single JSON object conforming to this JSON Schema. \
             No prose, no code fences.\nSchema: {schema_text}"
        )));
        conversation.extend(messages.iter().cloned());

        let mut last_violation = String::new();
        for attempt in 0..retry.max_attempts {
            let format = match &self.backend {
                LlmBackend::Ollama(_) => WireFormat::Structured(FormatType::StructuredJson(
                    Box::new(JsonStructure::new::<T>()),
                )),
                _ => WireFormat::Json,
            };

            let raw = match self
                .chat_with_deadline(&conversation, &resolved, format, timeout, cancel)
                .await
            {
                Ok(raw) => raw,
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    let delay = retry.backoff_ms(attempt);
                    warn!(attempt, delay_ms = delay, error = %e, "structured generation failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match serde_json::from_str::<T>(extract_json(&raw)) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!(attempt, error = %e, "structured output did not parse");
                    last_violation = e.to_string();
                    conversation.push(ChatMessage::assistant(raw));
                    conversation.push(ChatMessage::user(format!(
                        "The previous output was invalid because: {last_violation}. \
                         Respond again with only a valid JSON object matching the schema."
                    )));
                }
            }
        }
        Err(EngineError::SchemaViolation(last_violation))
    }
}

/// Trim prose and code fences around the outermost JSON object.
fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if s < e => &trimmed[s..=e],
        _ => trimmed,
    }
}
