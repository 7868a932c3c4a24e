use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// Unique identifier for workflows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkflowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Closed intent taxonomy driving retrieval routing and prompt selection
#[derive(
    JsonSchema,
    Display,
    EnumIter,
    EnumString,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IntentLabel {
    MarketPrice,
    Weather,
    PestControl,
    Fertilizer,
    Soil,
    GovernmentScheme,
    CropAdvisory,
    General,
    Complex,
}

impl IntentLabel {
    /// Parse a label emitted by an LLM, falling back to `General` for
    /// anything outside the taxonomy.
    pub fn parse_lenient(s: &str) -> Self {
        s.trim().to_lowercase().replace('-', "_").parse().unwrap_or(Self::General)
    }
}

/// Named vector collections holding the reference datasets
#[derive(
    Display, EnumIter, EnumString, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Collection {
    Prices,
    Soil,
    PestControl,
    Fertilizers,
    Schemes,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Prices => "prices",
            Self::Soil => "soil",
            Self::PestControl => "pest_control",
            Self::Fertilizers => "fertilizers",
            Self::Schemes => "schemes",
        }
    }
}

/// Crop and market names pulled heuristically from a query, used to build
/// metadata filters for retrieval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntities {
    pub crop: Option<String>,
    pub market: Option<String>,
}

/// One atomic step of a decomposed query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub description: String,
    pub intent_type: IntentLabel,
    pub order_index: usize,
}

/// Routing decision for a query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentDecision {
    pub label: IntentLabel,
    pub confidence: f32,
    pub is_complex: bool,
    pub subtasks: Vec<SubtaskSpec>,
    #[serde(default)]
    pub entities: ExtractedEntities,
}

impl IntentDecision {
    /// Construct a decision, enforcing the complexity invariant: a complex
    /// decision carries at least two subtasks, otherwise it is coerced to a
    /// simple one and the subtask list is dropped.
    pub fn new(
        label: IntentLabel,
        confidence: f32,
        is_complex: bool,
        mut subtasks: Vec<SubtaskSpec>,
    ) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        let is_complex = is_complex && subtasks.len() >= 2;
        if !is_complex {
            subtasks.clear();
        } else {
            for (i, subtask) in subtasks.iter_mut().enumerate() {
                subtask.order_index = i;
            }
        }
        Self {
            label,
            confidence,
            is_complex,
            subtasks,
            entities: ExtractedEntities::default(),
        }
    }

    pub fn simple(label: IntentLabel, confidence: f32) -> Self {
        Self::new(label, confidence, false, vec![])
    }

    pub fn with_entities(mut self, entities: ExtractedEntities) -> Self {
        self.entities = entities;
        self
    }
}

/// A single retrievable record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, String>,
}

/// Evidence assembled for prompt construction, ordered by descending score
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalContext {
    pub hits: Vec<Document>,
    pub scores: Vec<f32>,
    pub assembled_text: String,
    pub sources: Vec<String>,
}

impl RetrievalContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.is_empty() {
            "no documents retrieved".to_string()
        } else {
            format!("{} documents from {}", self.hits.len(), self.sources.join(", "))
        }
    }
}

/// Workflow lifecycle states
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Errored,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }
}

/// Outcome of one executed subtask. Exactly one of `response` and `error`
/// is set once `completed` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskResult {
    pub order_index: usize,
    pub completed: bool,
    pub response: Option<String>,
    pub error: Option<String>,
}

impl SubtaskResult {
    pub fn ok(order_index: usize, response: String) -> Self {
        Self {
            order_index,
            completed: true,
            response: Some(response),
            error: None,
        }
    }

    pub fn failed(order_index: usize, error: String) -> Self {
        Self {
            order_index,
            completed: true,
            response: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Persistent record of a decomposed query and its ordered executions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: WorkflowId,
    pub original_query: String,
    pub subtasks: Vec<SubtaskSpec>,
    pub completed: Vec<SubtaskResult>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub summary: Option<String>,
}

impl Workflow {
    pub fn new(original_query: String, subtasks: Vec<SubtaskSpec>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: WorkflowId::new(),
            original_query,
            subtasks,
            completed: vec![],
            status: WorkflowStatus::Pending,
            created_at: now,
            updated_at: now,
            summary: None,
        }
    }

    /// Index of the next subtask to execute.
    pub fn next_index(&self) -> usize {
        self.completed.len()
    }

    /// Completed fraction in [0, 1].
    pub fn progress(&self) -> f32 {
        if self.subtasks.is_empty() {
            0.0
        } else {
            self.completed.len() as f32 / self.subtasks.len() as f32
        }
    }

    pub fn has_error(&self) -> bool {
        self.completed.iter().any(SubtaskResult::is_error)
    }
}

/// Point-in-time view of a workflow returned by status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub workflow_id: WorkflowId,
    pub original_query: String,
    pub status: WorkflowStatus,
    pub progress: f32,
    pub subtasks: Vec<SubtaskSpec>,
    pub completed: Vec<SubtaskResult>,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Workflow> for WorkflowSnapshot {
    fn from(w: &Workflow) -> Self {
        Self {
            workflow_id: w.workflow_id,
            original_query: w.original_query.clone(),
            status: w.status,
            progress: w.progress(),
            subtasks: w.subtasks.clone(),
            completed: w.completed.clone(),
            summary: w.summary.clone(),
            created_at: w.created_at,
            updated_at: w.updated_at,
        }
    }
}

/// LLM provider backends
#[derive(
    Display, EnumString, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderKind {
    Groq,
    Perplexity,
    Ollama,
    Static,
}

/// Optional per-query hints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryParams {
    pub top_k: Option<usize>,
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
}

/// Answer to a single-shot query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub response: String,
    pub intent: IntentLabel,
    pub confidence: f32,
    pub context_summary: String,
    pub degraded: bool,
    pub is_workflow: bool,
}

/// Envelope handed back when a query requires a workflow; the caller drives
/// execution through the workflow operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowHandoff {
    pub workflow_id: WorkflowId,
    pub subtasks: Vec<SubtaskSpec>,
    pub is_workflow: bool,
}

/// Result of the top-level answer operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerOutcome {
    Answer(QueryAnswer),
    Workflow(WorkflowHandoff),
}

impl AnswerOutcome {
    pub fn is_workflow(&self) -> bool {
        matches!(self, Self::Workflow(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_label_roundtrip() {
        assert_eq!(IntentLabel::MarketPrice.to_string(), "market_price");
        assert_eq!(IntentLabel::parse_lenient("market_price"), IntentLabel::MarketPrice);
        assert_eq!(IntentLabel::parse_lenient("Pest-Control"), IntentLabel::PestControl);
        assert_eq!(IntentLabel::parse_lenient("nonsense"), IntentLabel::General);
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(Collection::PestControl.name(), "pest_control");
        assert_eq!(Collection::Prices.to_string(), "prices");
    }

    #[test]
    fn test_workflow_progress() {
        let mut w = Workflow::new(
            "q".into(),
            vec![
                SubtaskSpec {
                    description: "a".into(),
                    intent_type: IntentLabel::Soil,
                    order_index: 0,
                },
                SubtaskSpec {
                    description: "b".into(),
                    intent_type: IntentLabel::Fertilizer,
                    order_index: 1,
                },
            ],
        );
        assert_eq!(w.progress(), 0.0);
        w.completed.push(SubtaskResult::ok(0, "done".into()));
        assert_eq!(w.progress(), 0.5);
        assert_eq!(w.next_index(), 1);
    }
}
