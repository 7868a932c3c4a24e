use thiserror::Error;

/// Core error type for all engine failures
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Out of order subtask execution: expected index {expected}, got {got}")]
    OutOfOrder { expected: usize, got: usize },

    #[error("Workflow incomplete: {completed} of {total} subtasks completed")]
    Incomplete { completed: usize, total: usize },

    #[error("Workflow errored: {0}")]
    WorkflowErrored(String),

    #[error("Structured output did not conform to schema: {0}")]
    SchemaViolation(String),

    #[error("Content refused by provider: {0}")]
    ContentRefused(String),

    #[error("Upstream authentication failed: {0}")]
    UpstreamAuth(String),

    #[error("Upstream quota exhausted: {0}")]
    UpstreamQuota(String),

    #[error("Upstream busy: {0}")]
    UpstreamBusy(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Dimension conflict on collection {collection}: existing {expected}, requested {got}")]
    DimensionConflict {
        collection: String,
        expected: u64,
        got: u64,
    },

    #[error("Embedding shape mismatch on collection {collection}: expected {expected}, got {got}")]
    ShapeMismatch {
        collection: String,
        expected: u64,
        got: u64,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Transient failures worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_) | Self::UpstreamBusy(_))
    }

    /// Errors caused by the caller; never retried.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::NotFound(_)
                | Self::OutOfOrder { .. }
                | Self::Incomplete { .. }
        )
    }

    /// Message safe to show to end users. Internal details are stripped.
    pub fn user_message(&self) -> String {
        match self {
            Self::Internal(_) => "An internal error occurred. Please try again.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
