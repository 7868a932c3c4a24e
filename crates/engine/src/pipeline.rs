//! Single-shot answering: classify, retrieve, prompt, generate.
//!
//! Complex queries are not executed here; the pipeline hands the decision
//! back to the caller, which starts a workflow through the manager.

use std::sync::Arc;

use agri_core_common::{
    EngineConfig, EngineError, IntentDecision, IntentLabel, QueryAnswer, Result,
    RetrievalContext,
};
use agri_core_llm::{ChatMessage, GenerationParams, LlmClient};
use agri_core_rag::{IntentClassifier, Retriever};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Result of one pipeline run
pub enum PipelineOutcome {
    Answer(QueryAnswer),
    /// The query needs decomposition; contains the classifier's decision
    Handoff(IntentDecision),
}

pub struct QueryPipeline {
    classifier: IntentClassifier,
    retriever: Arc<Retriever>,
    llm: Arc<LlmClient>,
    max_query_bytes: usize,
}

impl QueryPipeline {
    pub fn new(
        classifier: IntentClassifier,
        retriever: Arc<Retriever>,
        llm: Arc<LlmClient>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            classifier,
            retriever,
            llm,
            max_query_bytes: config.limits.max_query_bytes,
        }
    }

    fn validate_query(&self, query: &str) -> Result<()> {
        if query.trim().is_empty() {
            return Err(EngineError::invalid_argument("query is empty"));
        }
        if query.len() > self.max_query_bytes {
            return Err(EngineError::invalid_argument(format!(
                "query exceeds {} bytes",
                self.max_query_bytes
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, cancel))]
    pub async fn run(
        &self,
        query: &str,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome> {
        self.validate_query(query)?;

        let decision = self.classifier.classify(query, cancel).await?;
        if decision.is_complex {
            return Ok(PipelineOutcome::Handoff(decision));
        }

        let answer = self
            .answer_with_decision(query, &decision, top_k, cancel)
            .await?;
        Ok(PipelineOutcome::Answer(answer))
    }

    /// Retrieve and generate for an already-classified query. Also the
    /// mini-pipeline workflow subtasks run through.
    pub async fn answer_with_decision(
        &self,
        query: &str,
        decision: &IntentDecision,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<QueryAnswer> {
        let context = self
            .retriever
            .retrieve(query, decision, top_k, cancel)
            .await?;

        let messages = build_messages(query, decision.label, &context);
        let response = self
            .llm
            .generate(&messages, &GenerationParams::default(), cancel)
            .await?;

        Ok(QueryAnswer {
            response,
            intent: decision.label,
            confidence: decision.confidence,
            context_summary: context.summary(),
            degraded: decision.confidence == 0.0,
            is_workflow: false,
        })
    }
}

fn intent_speciality(intent: IntentLabel) -> &'static str {
    match intent {
        IntentLabel::MarketPrice => "mandi prices and market trends",
        IntentLabel::Weather => "weather conditions and their impact on field operations",
        IntentLabel::PestControl => "pest and disease management",
        IntentLabel::Fertilizer => "fertilizer and nutrient management",
        IntentLabel::Soil => "soil health and amendments",
        IntentLabel::GovernmentScheme => "government schemes and subsidies for farmers",
        IntentLabel::CropAdvisory => "crop selection and cultivation practices",
        IntentLabel::General | IntentLabel::Complex => "practical farming questions",
    }
}

fn build_messages(query: &str, intent: IntentLabel, context: &RetrievalContext) -> Vec<ChatMessage> {
    let system = format!(
        "You are an agricultural assistant for farmers, specializing in {}. \
         Answer only from the provided context; never invent figures or scheme \
         names. When the context is empty or does not cover the question, say \
         plainly that you do not have the data and suggest what the farmer \
         could check instead.",
        intent_speciality(intent)
    );

    let context_block = if context.is_empty() {
        "No relevant documents were retrieved for this query."
    } else {
        context.assembled_text.as_str()
    };

    vec![
        ChatMessage::system(system),
        ChatMessage::user(format!("Question: {query}\n\nContext:\n{context_block}")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_acknowledges_empty_context() {
        let messages = build_messages("any question", IntentLabel::Soil, &RetrievalContext::empty());
        assert!(messages[1].content.contains("No relevant documents"));
    }

    #[test]
    fn test_prompt_embeds_assembled_context() {
        let context = RetrievalContext {
            assembled_text: "modal price was 1850".to_string(),
            ..RetrievalContext::empty()
        };
        let messages = build_messages("price?", IntentLabel::MarketPrice, &context);
        assert!(messages[1].content.contains("modal price was 1850"));
        assert!(messages[0].content.contains("mandi prices"));
    }
}
