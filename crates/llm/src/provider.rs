//! Provider backends behind one tagged enum.
//!
//! The observable generation contract is identical across variants; picking
//! a backend changes transport only. The `Static` variant is a scripted
//! responder used by tests and offline demos.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use agri_core_common::{EngineError, LlmConfig, ProviderKind, Result};
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::chat::ChatMessage as OllamaMessage;
use ollama_rs::generation::parameters::FormatType;
use ollama_rs::Ollama;
use serde::Deserialize;
use tracing::debug;

use crate::client::{ChatMessage, ChatRole};

const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const PERPLEXITY_URL: &str = "https://api.perplexity.ai/chat/completions";

/// Output shaping for one call
pub(crate) enum WireFormat {
    Text,
    /// OpenAI-compatible JSON mode
    Json,
    /// Ollama schema-constrained JSON
    Structured(FormatType),
}

/// Parameters resolved against configuration for one call
pub(crate) struct ResolvedParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub stop: Option<Vec<String>>,
}

pub enum LlmBackend {
    Groq { api_key: String },
    Perplexity { api_key: String },
    Ollama(Ollama),
    Static(Arc<StaticBackend>),
}

impl LlmBackend {
    pub fn from_config(config: &LlmConfig, provider: ProviderKind) -> Result<Self> {
        match provider {
            ProviderKind::Groq => {
                let api_key = config
                    .groq_api_key
                    .clone()
                    .or_else(|| std::env::var("GROQ_API_KEY").ok())
                    .ok_or_else(|| {
                        EngineError::UpstreamAuth("GROQ_API_KEY not configured".to_string())
                    })?;
                Ok(Self::Groq { api_key })
            }
            ProviderKind::Perplexity => {
                let api_key = config
                    .perplexity_api_key
                    .clone()
                    .or_else(|| std::env::var("PERPLEXITY_API_KEY").ok())
                    .ok_or_else(|| {
                        EngineError::UpstreamAuth("PERPLEXITY_API_KEY not configured".to_string())
                    })?;
                Ok(Self::Perplexity { api_key })
            }
            ProviderKind::Ollama => Ok(Self::Ollama(Ollama::new(
                config.ollama_host.clone(),
                config.ollama_port,
            ))),
            ProviderKind::Static => Ok(Self::Static(Arc::new(StaticBackend::new()))),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Groq { .. } => ProviderKind::Groq,
            Self::Perplexity { .. } => ProviderKind::Perplexity,
            Self::Ollama(_) => ProviderKind::Ollama,
            Self::Static(_) => ProviderKind::Static,
        }
    }

    pub(crate) async fn chat_once(
        &self,
        http: &reqwest::Client,
        model: &str,
        messages: &[ChatMessage],
        params: &ResolvedParams,
        format: WireFormat,
    ) -> Result<String> {
        match self {
            Self::Groq { api_key } => {
                hosted_chat(http, GROQ_URL, api_key, model, messages, params, &format).await
            }
            Self::Perplexity { api_key } => {
                hosted_chat(http, PERPLEXITY_URL, api_key, model, messages, params, &format).await
            }
            Self::Ollama(client) => ollama_chat(client, model, messages, format).await,
            Self::Static(backend) => backend.call(messages),
        }
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

async fn hosted_chat(
    http: &reqwest::Client,
    url: &str,
    api_key: &str,
    model: &str,
    messages: &[ChatMessage],
    params: &ResolvedParams,
    format: &WireFormat,
) -> Result<String> {
    let wire_messages: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role.as_str(),
                "content": m.content,
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": model,
        "messages": wire_messages,
        "temperature": params.temperature,
        "max_tokens": params.max_tokens,
    });
    if let Some(stop) = &params.stop {
        body["stop"] = serde_json::json!(stop);
    }
    if matches!(format, WireFormat::Json | WireFormat::Structured(_)) {
        body["response_format"] = serde_json::json!({"type": "json_object"});
    }

    let response = http
        .post(url)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                EngineError::UpstreamUnavailable(format!("request timed out: {e}"))
            } else {
                EngineError::UpstreamUnavailable(format!("request failed: {e}"))
            }
        })?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| EngineError::UpstreamUnavailable(format!("body read failed: {e}")))?;

    if !status.is_success() {
        return Err(match status.as_u16() {
            401 | 403 => EngineError::UpstreamAuth(truncate(&text)),
            429 => EngineError::UpstreamQuota(truncate(&text)),
            408 => EngineError::UpstreamUnavailable(truncate(&text)),
            code if code >= 500 => EngineError::UpstreamUnavailable(truncate(&text)),
            _ => EngineError::InvalidArgument(truncate(&text)),
        });
    }

    let parsed: CompletionResponse = serde_json::from_str(&text)
        .map_err(|e| EngineError::UpstreamUnavailable(format!("malformed completion: {e}")))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::UpstreamUnavailable("completion had no choices".to_string()))?;

    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(EngineError::ContentRefused(
            "provider filtered the completion".to_string(),
        ));
    }

    choice
        .message
        .content
        .ok_or_else(|| EngineError::UpstreamUnavailable("completion had no content".to_string()))
}

async fn ollama_chat(
    client: &Ollama,
    model: &str,
    messages: &[ChatMessage],
    format: WireFormat,
) -> Result<String> {
    let wire_messages: Vec<OllamaMessage> = messages
        .iter()
        .map(|m| match m.role {
            ChatRole::System => OllamaMessage::system(m.content.clone()),
            ChatRole::User => OllamaMessage::user(m.content.clone()),
            ChatRole::Assistant => OllamaMessage::assistant(m.content.clone()),
        })
        .collect();

    let mut request = ChatMessageRequest::new(model.to_string(), wire_messages);
    request = match format {
        WireFormat::Text => request,
        WireFormat::Json => request.format(FormatType::Json),
        WireFormat::Structured(structure) => request.format(structure),
    };

    let response = client
        .send_chat_messages(request)
        .await
        .map_err(|e| EngineError::UpstreamUnavailable(format!("ollama: {e}")))?;
    Ok(response.message.content)
}

fn truncate(text: &str) -> String {
    const MAX: usize = 400;
    if text.len() <= MAX {
        text.to_string()
    } else {
        let mut end = MAX;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

/// Failure kinds a scripted backend can inject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Unavailable,
    Auth,
    Quota,
    Refused,
}

pub enum ScriptedReply {
    Text(String),
    Fail(FailureKind),
}

/// Scripted backend: replies are consumed front to back; with the script
/// exhausted it echoes the last user message, so prompts stay observable
/// in test assertions.
pub struct StaticBackend {
    script: Mutex<VecDeque<ScriptedReply>>,
    prompts: Mutex<Vec<String>>,
}

impl StaticBackend {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.script
            .lock()
            .expect("script lock poisoned")
            .push_back(ScriptedReply::Text(text.into()));
    }

    pub fn push_failure(&self, kind: FailureKind) {
        self.script
            .lock()
            .expect("script lock poisoned")
            .push_back(ScriptedReply::Fail(kind));
    }

    /// User-role prompts observed so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt lock poisoned").clone()
    }

    fn call(&self, messages: &[ChatMessage]) -> Result<String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts
            .lock()
            .expect("prompt lock poisoned")
            .push(last_user.clone());

        let reply = self.script.lock().expect("script lock poisoned").pop_front();
        match reply {
            None => {
                debug!("static backend echoing prompt");
                Ok(last_user)
            }
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(kind)) => Err(match kind {
                FailureKind::Unavailable => {
                    EngineError::UpstreamUnavailable("scripted failure".to_string())
                }
                FailureKind::Auth => EngineError::UpstreamAuth("scripted failure".to_string()),
                FailureKind::Quota => EngineError::UpstreamQuota("scripted failure".to_string()),
                FailureKind::Refused => {
                    EngineError::ContentRefused("scripted failure".to_string())
                }
            }),
        }
    }
}

impl Default for StaticBackend {
    fn default() -> Self {
        Self::new()
    }
}
