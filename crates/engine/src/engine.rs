//! Top-level caller surface tying the components together.

use std::sync::Arc;

use agri_core_common::{
    AnswerOutcome, Collection, EngineConfig, EngineError, ProviderKind, QueryParams, Result,
    SubtaskResult, WorkflowId, WorkflowSnapshot,
};
use agri_core_indexing::EmbeddingFunction;
use agri_core_llm::LlmClient;
use agri_core_rag::{IntentClassifier, NoWeather, Retriever, WeatherProvider};
use agri_core_storage::{QdrantStore, VectorStore};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::pipeline::{PipelineOutcome, QueryPipeline};
use crate::workflow::WorkflowManager;

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingFunction>,
    retriever: Arc<Retriever>,
    llm: Arc<LlmClient>,
    pipeline: Arc<QueryPipeline>,
    workflows: WorkflowManager,
}

impl Engine {
    /// Production wiring: Qdrant store, shared fastembed embedder, the
    /// configured LLM provider and no weather collaborator.
    pub async fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn VectorStore> =
            Arc::new(QdrantStore::connect(&config.store.qdrant_url).await?);
        let embedder: Arc<dyn EmbeddingFunction> = agri_core_indexing::shared(&config.embedding)?;
        let llm = Arc::new(LlmClient::from_config(&config.llm)?);
        Ok(Self::with_components(
            config,
            store,
            embedder,
            llm,
            Arc::new(NoWeather),
        ))
    }

    /// Dependency-injected wiring; what tests and embedded callers use.
    pub fn with_components(
        config: EngineConfig,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingFunction>,
        llm: Arc<LlmClient>,
        weather: Arc<dyn WeatherProvider>,
    ) -> Self {
        let retriever = Arc::new(Retriever::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            weather,
            &config,
        ));
        let pipeline = Arc::new(QueryPipeline::new(
            IntentClassifier::new(Arc::clone(&llm)),
            Arc::clone(&retriever),
            Arc::clone(&llm),
            &config,
        ));
        let workflows = WorkflowManager::new(Arc::clone(&pipeline), Arc::clone(&llm), &config);
        Self {
            config,
            store,
            embedder,
            retriever,
            llm,
            pipeline,
            workflows,
        }
    }

    fn pipeline_for(&self, params: &QueryParams) -> Result<Arc<QueryPipeline>> {
        if params.provider.is_none() && params.model.is_none() {
            return Ok(Arc::clone(&self.pipeline));
        }
        let provider = params
            .provider
            .unwrap_or(self.config.llm.default_provider);
        if provider == ProviderKind::Static {
            // The scripted backend is wired in, never requested per query
            return Err(EngineError::invalid_argument(
                "static provider cannot be selected per query",
            ));
        }
        let llm = Arc::new(LlmClient::for_provider(
            &self.config.llm,
            provider,
            params.model.clone(),
        )?);
        Ok(Arc::new(QueryPipeline::new(
            IntentClassifier::new(Arc::clone(&llm)),
            Arc::clone(&self.retriever),
            llm,
            &self.config,
        )))
    }

    /// Answer a query, or hand back a workflow when it needs decomposition.
    #[instrument(skip(self, params, cancel))]
    pub async fn answer(
        &self,
        query: &str,
        params: Option<QueryParams>,
        cancel: &CancellationToken,
    ) -> Result<AnswerOutcome> {
        let params = params.unwrap_or_default();
        let top_k = params.top_k.unwrap_or(self.config.retrieval.default_top_k);
        let pipeline = self.pipeline_for(&params)?;

        match pipeline.run(query, top_k, cancel).await? {
            PipelineOutcome::Answer(answer) => Ok(AnswerOutcome::Answer(answer)),
            PipelineOutcome::Handoff(decision) => {
                let handoff = self.workflows.start(query, decision.subtasks)?;
                Ok(AnswerOutcome::Workflow(handoff))
            }
        }
    }

    pub async fn workflow_execute(
        &self,
        workflow_id: WorkflowId,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<SubtaskResult> {
        self.workflows.execute_subtask(workflow_id, index, cancel).await
    }

    pub async fn workflow_summary(
        &self,
        workflow_id: WorkflowId,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.workflows.finalize(workflow_id, cancel).await
    }

    pub fn workflow_status(&self, workflow_id: WorkflowId) -> Result<WorkflowSnapshot> {
        self.workflows.status(workflow_id)
    }

    /// Rebuild one collection, or all of them, from the reference datasets.
    pub async fn rebuild_index(&self, collection: Option<Collection>) -> Result<Vec<String>> {
        agri_core_indexing::rebuild_index(self.store.as_ref(), self.embedder.as_ref(), collection)
            .await
    }

    pub fn workflows(&self) -> &WorkflowManager {
        &self.workflows
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn provider(&self) -> ProviderKind {
        self.llm.provider()
    }
}
