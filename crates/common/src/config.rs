use std::fs;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::ProviderKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Qdrant endpoint URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Timeout for a single vector search
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding model identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Output vector dimension of the model
    #[serde(default = "default_embedding_dim")]
    pub dimension: u64,

    /// Timeout for one batch embed call
    #[serde(default = "default_embed_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub default_provider: ProviderKind,

    #[serde(default = "default_model")]
    pub default_model: String,

    /// API key for the Groq backend; falls back to GROQ_API_KEY
    #[serde(default)]
    pub groq_api_key: Option<String>,

    /// API key for the Perplexity backend; falls back to PERPLEXITY_API_KEY
    #[serde(default)]
    pub perplexity_api_key: Option<String>,

    #[serde(default = "default_ollama_host")]
    pub ollama_host: String,

    #[serde(default = "default_ollama_port")]
    pub ollama_port: u16,

    /// Model temperature (0.0 - 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_generate_timeout_ms")]
    pub generate_timeout_ms: u64,

    #[serde(default = "default_structured_timeout_ms")]
    pub structured_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry behavior for transient provider failures and schema violations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per call
    #[serde(default = "default_retry_max")]
    pub max_attempts: usize,

    /// Initial backoff in milliseconds
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,

    /// Maximum backoff cap in milliseconds
    #[serde(default = "default_retry_cap_ms")]
    pub cap_ms: u64,
}

impl RetryConfig {
    /// Exponential backoff delay for the given zero-based attempt.
    pub fn backoff_ms(&self, attempt: usize) -> u64 {
        let exp = self.base_ms.saturating_mul(2u64.saturating_pow(attempt as u32));
        exp.min(self.cap_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Cap on the assembled context, in bytes
    #[serde(default = "default_context_byte_budget")]
    pub context_byte_budget: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Retention of terminal workflows, in seconds
    #[serde(default = "default_workflow_ttl")]
    pub ttl_seconds: u64,

    /// Maximum number of active plus terminal workflows
    #[serde(default = "default_workflow_cap")]
    pub cap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum query length in bytes
    #[serde(default = "default_max_query_bytes")]
    pub max_query_bytes: usize,

    /// Maximum subtasks accepted when starting a workflow
    #[serde(default = "default_max_subtasks")]
    pub max_subtasks: usize,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&contents)
            .map_err(|e| EngineError::config(format!("failed to parse {path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(EngineError::config("embedding.dimension must be greater than 0"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(EngineError::config("llm.temperature must be between 0.0 and 2.0"));
        }
        if self.llm.max_tokens == 0 {
            return Err(EngineError::config("llm.max_tokens must be greater than 0"));
        }
        if self.llm.retry.max_attempts == 0 {
            return Err(EngineError::config("llm.retry.max_attempts must be greater than 0"));
        }
        if self.retrieval.default_top_k == 0 {
            return Err(EngineError::config("retrieval.default_top_k must be greater than 0"));
        }
        if self.retrieval.context_byte_budget < 512 {
            return Err(EngineError::config("retrieval.context_byte_budget too small (min 512)"));
        }
        if self.workflow.cap == 0 {
            return Err(EngineError::config("workflow.cap must be greater than 0"));
        }
        if self.limits.max_subtasks == 0 || self.limits.max_subtasks > 100 {
            return Err(EngineError::config("limits.max_subtasks out of range (1-100)"));
        }
        if self.limits.max_query_bytes < 16 {
            return Err(EngineError::config("limits.max_query_bytes too small"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            retrieval: RetrievalConfig::default(),
            workflow: WorkflowConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            search_timeout_ms: default_search_timeout_ms(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_embedding_dim(),
            timeout_ms: default_embed_timeout_ms(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            default_model: default_model(),
            groq_api_key: None,
            perplexity_api_key: None,
            ollama_host: default_ollama_host(),
            ollama_port: default_ollama_port(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            generate_timeout_ms: default_generate_timeout_ms(),
            structured_timeout_ms: default_structured_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max(),
            base_ms: default_retry_base_ms(),
            cap_ms: default_retry_cap_ms(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            context_byte_budget: default_context_byte_budget(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_workflow_ttl(),
            cap: default_workflow_cap(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_query_bytes: default_max_query_bytes(),
            max_subtasks: default_max_subtasks(),
        }
    }
}

// ============== Configuration Defaults ==============

fn default_qdrant_url() -> String {
    "http://localhost:6334".to_string()
}

fn default_search_timeout_ms() -> u64 {
    2_000
}

fn default_embedding_model() -> String {
    "all-minilm-l6-v2".to_string()
}

fn default_embedding_dim() -> u64 {
    384
}

fn default_embed_timeout_ms() -> u64 {
    5_000
}

fn default_provider() -> ProviderKind {
    ProviderKind::Groq
}

fn default_model() -> String {
    "llama-3.1-8b-instant".to_string()
}

fn default_ollama_host() -> String {
    "http://localhost".to_string()
}

fn default_ollama_port() -> u16 {
    11434
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    512
}

fn default_generate_timeout_ms() -> u64 {
    30_000
}

fn default_structured_timeout_ms() -> u64 {
    45_000
}

fn default_retry_max() -> usize {
    3
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_retry_cap_ms() -> u64 {
    4_000
}

fn default_top_k() -> usize {
    5
}

fn default_context_byte_budget() -> usize {
    8_192
}

fn default_workflow_ttl() -> u64 {
    3_600
}

fn default_workflow_cap() -> usize {
    10_000
}

fn default_max_query_bytes() -> usize {
    2_048
}

fn default_max_subtasks() -> usize {
    10
}
