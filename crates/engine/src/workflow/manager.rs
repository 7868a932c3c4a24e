//! Workflow state machine and registry.
//!
//! State moves pending -> running -> completed | errored. Subtasks execute
//! strictly in order through the same retrieve-and-generate pipeline used
//! for simple queries; the first failure parks the workflow in `errored`.
//! The registry is mutex-guarded and owned by the manager, with a reaper
//! task evicting terminal workflows past their TTL and an LRU sweep
//! bounding total size.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use agri_core_common::{
    EngineConfig, EngineError, IntentDecision, Result, SubtaskResult, SubtaskSpec, Workflow,
    WorkflowHandoff, WorkflowId, WorkflowSnapshot, WorkflowStatus,
};
use agri_core_llm::{ChatMessage, GenerationParams, LlmClient};
use agri_core_rag::extract_entities;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::pipeline::QueryPipeline;

const REAPER_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    workflow: Workflow,
    /// Serializes subtask execution and finalization per workflow
    gate: Arc<tokio::sync::Mutex<()>>,
    touched: Instant,
    fingerprint: u64,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<WorkflowId, Entry>,
    by_fingerprint: HashMap<u64, WorkflowId>,
}

pub struct WorkflowManager {
    registry: Arc<Mutex<Registry>>,
    pipeline: Arc<QueryPipeline>,
    llm: Arc<LlmClient>,
    ttl: Duration,
    cap: usize,
    max_subtasks: usize,
    default_top_k: usize,
    reaper: Option<tokio::task::JoinHandle<()>>,
}

impl WorkflowManager {
    pub fn new(pipeline: Arc<QueryPipeline>, llm: Arc<LlmClient>, config: &EngineConfig) -> Self {
        let registry: Arc<Mutex<Registry>> = Arc::new(Mutex::new(Registry::default()));
        let ttl = Duration::from_secs(config.workflow.ttl_seconds);

        let reaper = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(REAPER_INTERVAL);
                loop {
                    tick.tick().await;
                    evict_expired(&registry, ttl);
                }
            })
        };

        Self {
            registry,
            pipeline,
            llm,
            ttl,
            cap: config.workflow.cap,
            max_subtasks: config.limits.max_subtasks,
            default_top_k: config.retrieval.default_top_k,
            reaper: Some(reaper),
        }
    }

    /// Create a workflow in `pending`. Identical input inside the TTL window
    /// returns the existing workflow instead of a new one.
    pub fn start(&self, query: &str, mut subtasks: Vec<SubtaskSpec>) -> Result<WorkflowHandoff> {
        if query.trim().is_empty() {
            return Err(EngineError::invalid_argument("query is empty"));
        }
        if subtasks.is_empty() {
            return Err(EngineError::invalid_argument("workflow needs at least one subtask"));
        }
        if subtasks.len() > self.max_subtasks {
            return Err(EngineError::invalid_argument(format!(
                "subtask count {} exceeds maximum {}",
                subtasks.len(),
                self.max_subtasks
            )));
        }
        for (i, subtask) in subtasks.iter_mut().enumerate() {
            subtask.order_index = i;
        }

        let fingerprint = fingerprint_of(query, &subtasks);
        let mut registry = self.registry.lock().expect("registry lock poisoned");

        if let Some(existing_id) = registry.by_fingerprint.get(&fingerprint).copied() {
            if let Some(entry) = registry.entries.get(&existing_id) {
                if entry.touched.elapsed() < self.ttl {
                    info!(workflow_id = %existing_id, "start is idempotent, reusing workflow");
                    return Ok(WorkflowHandoff {
                        workflow_id: existing_id,
                        subtasks: entry.workflow.subtasks.clone(),
                        is_workflow: true,
                    });
                }
            }
        }

        if registry.entries.len() >= self.cap {
            evict_lru_terminal(&mut registry);
        }
        if registry.entries.len() >= self.cap {
            return Err(EngineError::UpstreamBusy(
                "workflow registry at capacity".to_string(),
            ));
        }

        let workflow = Workflow::new(query.to_string(), subtasks.clone());
        let workflow_id = workflow.workflow_id;
        registry.by_fingerprint.insert(fingerprint, workflow_id);
        registry.entries.insert(
            workflow_id,
            Entry {
                workflow,
                gate: Arc::new(tokio::sync::Mutex::new(())),
                touched: Instant::now(),
                fingerprint,
            },
        );

        info!(workflow_id = %workflow_id, subtasks = subtasks.len(), "workflow started");
        Ok(WorkflowHandoff {
            workflow_id,
            subtasks,
            is_workflow: true,
        })
    }

    /// Validate preconditions for executing `index` and return what the
    /// execution needs. Transitions the workflow to `running`.
    fn prepare_execution(
        &self,
        workflow_id: WorkflowId,
        index: usize,
    ) -> Result<(Arc<tokio::sync::Mutex<()>>, SubtaskSpec, String)> {
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        let entry = registry
            .entries
            .get_mut(&workflow_id)
            .ok_or_else(|| EngineError::not_found(format!("workflow {workflow_id}")))?;

        let workflow = &mut entry.workflow;
        match workflow.status {
            WorkflowStatus::Errored => {
                return Err(EngineError::WorkflowErrored(format!(
                    "workflow {workflow_id} has a failed subtask"
                )))
            }
            WorkflowStatus::Completed => {
                return Err(EngineError::invalid_argument(format!(
                    "workflow {workflow_id} is already completed"
                )))
            }
            WorkflowStatus::Pending | WorkflowStatus::Running => {}
        }
        if index >= workflow.subtasks.len() {
            return Err(EngineError::invalid_argument(format!(
                "subtask index {index} out of range (workflow has {})",
                workflow.subtasks.len()
            )));
        }
        let expected = workflow.next_index();
        if index != expected {
            return Err(EngineError::OutOfOrder { expected, got: index });
        }

        workflow.status = WorkflowStatus::Running;
        workflow.updated_at = chrono::Utc::now();
        entry.touched = Instant::now();

        Ok((
            Arc::clone(&entry.gate),
            entry.workflow.subtasks[index].clone(),
            entry.workflow.original_query.clone(),
        ))
    }

    /// Execute the next subtask. Strictly sequential: `index` must equal the
    /// number of completed subtasks. A failed subtask is recorded with its
    /// error and the workflow transitions to `errored`; the diagnostic comes
    /// back as a structured result rather than an error.
    #[instrument(skip(self, cancel), fields(workflow_id = %workflow_id))]
    pub async fn execute_subtask(
        &self,
        workflow_id: WorkflowId,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<SubtaskResult> {
        let (gate, _, _) = self.prepare_execution(workflow_id, index)?;
        let _serialized = gate.lock().await;
        // Revalidate: another call may have advanced or failed the workflow
        // while this one waited on the gate
        let (_, spec, original_query) = self.prepare_execution(workflow_id, index)?;

        let enhanced_query = format!(
            "{} (This is part of a larger query: '{}'. Provide specific, actionable \
             advice that contributes to the overall answer.)",
            spec.description, original_query
        );
        // Entities come from the subtask description alone; the enhanced
        // query embeds the original query, which may name other crops
        let decision = IntentDecision::simple(spec.intent_type, 1.0)
            .with_entities(extract_entities(&spec.description));

        let outcome = self
            .pipeline
            .answer_with_decision(&enhanced_query, &decision, self.default_top_k, cancel)
            .await;

        let result = match outcome {
            Ok(answer) => SubtaskResult::ok(index, answer.response),
            // A cancelled subtask is discarded, not persisted
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                warn!(workflow_id = %workflow_id, index, error = %e, "subtask failed");
                SubtaskResult::failed(index, e.user_message())
            }
        };

        let mut registry = self.registry.lock().expect("registry lock poisoned");
        let entry = registry
            .entries
            .get_mut(&workflow_id)
            .ok_or_else(|| EngineError::not_found(format!("workflow {workflow_id}")))?;
        entry.workflow.completed.push(result.clone());
        if result.is_error() {
            entry.workflow.status = WorkflowStatus::Errored;
        }
        entry.workflow.updated_at = chrono::Utc::now();
        entry.touched = Instant::now();
        Ok(result)
    }

    /// Synthesize the final summary once every subtask has completed.
    /// Idempotent on completed workflows.
    #[instrument(skip(self, cancel), fields(workflow_id = %workflow_id))]
    pub async fn finalize(
        &self,
        workflow_id: WorkflowId,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let (gate, query, results) = {
            let registry = self.registry.lock().expect("registry lock poisoned");
            let entry = registry
                .entries
                .get(&workflow_id)
                .ok_or_else(|| EngineError::not_found(format!("workflow {workflow_id}")))?;
            let workflow = &entry.workflow;

            match workflow.status {
                WorkflowStatus::Completed => {
                    return workflow.summary.clone().ok_or_else(|| {
                        EngineError::internal("completed workflow without summary")
                    })
                }
                WorkflowStatus::Errored => {
                    return Err(EngineError::WorkflowErrored(format!(
                        "workflow {workflow_id} has a failed subtask"
                    )))
                }
                WorkflowStatus::Pending | WorkflowStatus::Running => {}
            }
            if workflow.completed.len() < workflow.subtasks.len() {
                return Err(EngineError::Incomplete {
                    completed: workflow.completed.len(),
                    total: workflow.subtasks.len(),
                });
            }

            let results: Vec<(String, String)> = workflow
                .subtasks
                .iter()
                .zip(workflow.completed.iter())
                .map(|(spec, result)| {
                    (
                        spec.description.clone(),
                        result.response.clone().unwrap_or_default(),
                    )
                })
                .collect();
            (
                Arc::clone(&entry.gate),
                workflow.original_query.clone(),
                results,
            )
        };

        let _serialized = gate.lock().await;
        // A concurrent finalize may have won the race while we waited
        {
            let registry = self.registry.lock().expect("registry lock poisoned");
            if let Some(entry) = registry.entries.get(&workflow_id) {
                if let (WorkflowStatus::Completed, Some(summary)) =
                    (entry.workflow.status, entry.workflow.summary.clone())
                {
                    return Ok(summary);
                }
            }
        }

        let bullet_lines: Vec<String> = results
            .iter()
            .map(|(description, response)| format!("• {description}: {response}"))
            .collect();
        let messages = [
            ChatMessage::system(
                "You are an agricultural expert creating comprehensive summaries for \
                 complex farming queries. Provide well-structured, actionable summaries.",
            ),
            ChatMessage::user(format!(
                "Create a comprehensive summary for this complex agricultural query \
                 based on the individual subtask results.\n\n\
                 Original Query: \"{query}\"\n\n\
                 Individual Results:\n{}\n\n\
                 Provide a summary that addresses the original query, integrates the \
                 insights from every subtask, and gives actionable recommendations.",
                bullet_lines.join("\n")
            )),
        ];

        let generated = self
            .llm
            .generate(&messages, &GenerationParams::default(), cancel)
            .await;

        let mut registry = self.registry.lock().expect("registry lock poisoned");
        let entry = registry
            .entries
            .get_mut(&workflow_id)
            .ok_or_else(|| EngineError::not_found(format!("workflow {workflow_id}")))?;
        entry.touched = Instant::now();
        entry.workflow.updated_at = chrono::Utc::now();
        match generated {
            Ok(summary) => {
                entry.workflow.summary = Some(summary.clone());
                entry.workflow.status = WorkflowStatus::Completed;
                info!(workflow_id = %workflow_id, "workflow completed");
                Ok(summary)
            }
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(e) => {
                warn!(workflow_id = %workflow_id, error = %e, "synthesis failed");
                entry.workflow.status = WorkflowStatus::Errored;
                Err(e)
            }
        }
    }

    pub fn status(&self, workflow_id: WorkflowId) -> Result<WorkflowSnapshot> {
        let registry = self.registry.lock().expect("registry lock poisoned");
        let entry = registry
            .entries
            .get(&workflow_id)
            .ok_or_else(|| EngineError::not_found(format!("workflow {workflow_id}")))?;
        Ok(WorkflowSnapshot::from(&entry.workflow))
    }

    /// Drop terminal workflows past their TTL. The background reaper calls
    /// this once a minute; exposed so callers can force a sweep.
    pub fn evict_expired(&self) {
        evict_expired(&self.registry, self.ttl);
    }

    pub fn len(&self) -> usize {
        self.registry.lock().expect("registry lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for WorkflowManager {
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }
    }
}

fn fingerprint_of(query: &str, subtasks: &[SubtaskSpec]) -> u64 {
    let mut hasher = DefaultHasher::new();
    query.hash(&mut hasher);
    for subtask in subtasks {
        subtask.description.hash(&mut hasher);
        subtask.intent_type.to_string().hash(&mut hasher);
    }
    hasher.finish()
}

fn evict_expired(registry: &Mutex<Registry>, ttl: Duration) {
    let mut registry = registry.lock().expect("registry lock poisoned");
    let expired: Vec<WorkflowId> = registry
        .entries
        .iter()
        .filter(|(_, entry)| entry.workflow.status.is_terminal() && entry.touched.elapsed() >= ttl)
        .map(|(id, _)| *id)
        .collect();
    for id in expired {
        if let Some(entry) = registry.entries.remove(&id) {
            registry.by_fingerprint.remove(&entry.fingerprint);
            info!(workflow_id = %id, "evicted expired workflow");
        }
    }
}

/// Remove the least recently touched terminal workflow, if any.
fn evict_lru_terminal(registry: &mut Registry) {
    let lru = registry
        .entries
        .iter()
        .filter(|(_, entry)| entry.workflow.status.is_terminal())
        .min_by_key(|(_, entry)| entry.touched)
        .map(|(id, _)| *id);
    if let Some(id) = lru {
        if let Some(entry) = registry.entries.remove(&id) {
            registry.by_fingerprint.remove(&entry.fingerprint);
            info!(workflow_id = %id, "evicted workflow past registry cap");
        }
    }
}
