mod common;

use agri_core_common::{
    AnswerOutcome, EngineError, IntentLabel, SubtaskSpec, WorkflowStatus,
};
use agri_core_llm::FailureKind;
use common::{seeded_engine, seeded_engine_with_config, test_config};
use tokio_util::sync::CancellationToken;

fn spec(desc: &str, intent: IntentLabel, idx: usize) -> SubtaskSpec {
    SubtaskSpec {
        description: desc.to_string(),
        intent_type: intent,
        order_index: idx,
    }
}

fn three_subtasks() -> Vec<SubtaskSpec> {
    vec![
        spec("Fertilizer recommendation for rice", IntentLabel::Fertilizer, 0),
        spec("Fertilizer recommendation for wheat", IntentLabel::Fertilizer, 1),
        spec(
            "Government schemes with subsidy on fertilizers",
            IntentLabel::GovernmentScheme,
            2,
        ),
    ]
}

#[tokio::test]
async fn test_complex_query_end_to_end() {
    let (backend, engine) = seeded_engine().await;
    backend.push_text(
        r#"{"label": "complex", "confidence": 0.9, "is_complex": true,
            "subtasks": [
              {"description": "Fertilizer recommendation for rice", "intent_type": "fertilizer"},
              {"description": "Fertilizer recommendation for wheat", "intent_type": "fertilizer"},
              {"description": "Government schemes with subsidy on fertilizers", "intent_type": "government_scheme"}
            ]}"#,
    );
    let cancel = CancellationToken::new();

    let outcome = engine
        .answer(
            "Compare fertilizer recommendations for rice and wheat, and list \
             government schemes that subsidize them.",
            None,
            &cancel,
        )
        .await
        .unwrap();
    let AnswerOutcome::Workflow(handoff) = outcome else {
        panic!("expected a workflow handoff");
    };
    assert_eq!(handoff.subtasks.len(), 3);

    // Subtasks run strictly in order; each yields a completed result
    for index in 0..3 {
        let result = engine
            .workflow_execute(handoff.workflow_id, index, &cancel)
            .await
            .unwrap();
        assert!(result.completed);
        assert_eq!(result.order_index, index);
        assert!(result.response.is_some());
        assert!(result.error.is_none());

        let snapshot = engine.workflow_status(handoff.workflow_id).unwrap();
        assert_eq!(snapshot.completed.len(), index + 1);
    }

    let summary = engine
        .workflow_summary(handoff.workflow_id, &cancel)
        .await
        .unwrap();
    // The echoed synthesis prompt carries every subtask result, so the
    // summary mentions both crops and a scheme from the corpus
    assert!(summary.contains("rice"));
    assert!(summary.contains("wheat"));
    assert!(summary.contains("Nutrient Based Subsidy"), "summary: {summary}");

    let snapshot = engine.workflow_status(handoff.workflow_id).unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Completed);
    assert_eq!(snapshot.progress, 1.0);
    assert!(snapshot.summary.is_some());
}

#[tokio::test]
async fn test_out_of_order_execution_rejected() {
    let (_backend, engine) = seeded_engine().await;
    let cancel = CancellationToken::new();
    let handoff = engine
        .workflows()
        .start("a three step query", three_subtasks())
        .unwrap();

    engine
        .workflow_execute(handoff.workflow_id, 0, &cancel)
        .await
        .unwrap();

    let err = engine
        .workflow_execute(handoff.workflow_id, 2, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::OutOfOrder { expected: 1, got: 2 }));

    // Re-running an already completed index is also out of order
    let err = engine
        .workflow_execute(handoff.workflow_id, 0, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::OutOfOrder { expected: 1, got: 0 }));

    let snapshot = engine.workflow_status(handoff.workflow_id).unwrap();
    assert_eq!(snapshot.completed.len(), 1);
    assert_eq!(snapshot.status, WorkflowStatus::Running);
}

#[tokio::test]
async fn test_subtask_failure_parks_workflow_in_errored() {
    let (backend, engine) = seeded_engine().await;
    let cancel = CancellationToken::new();
    let handoff = engine
        .workflows()
        .start("a three step query", three_subtasks())
        .unwrap();

    engine
        .workflow_execute(handoff.workflow_id, 0, &cancel)
        .await
        .unwrap();

    // Generation for subtask 1 fails without retry
    backend.push_failure(FailureKind::Auth);
    let result = engine
        .workflow_execute(handoff.workflow_id, 1, &cancel)
        .await
        .unwrap();
    assert!(result.completed);
    assert!(result.error.is_some());
    assert!(result.response.is_none());

    let snapshot = engine.workflow_status(handoff.workflow_id).unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Errored);

    let err = engine
        .workflow_execute(handoff.workflow_id, 2, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::WorkflowErrored(_)));

    let err = engine
        .workflow_summary(handoff.workflow_id, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::WorkflowErrored(_)));
}

#[tokio::test]
async fn test_transient_subtask_failures_are_retried_within_the_llm() {
    let (backend, engine) = seeded_engine().await;
    let cancel = CancellationToken::new();
    let handoff = engine
        .workflows()
        .start("a three step query", three_subtasks())
        .unwrap();

    backend.push_failure(FailureKind::Unavailable);
    backend.push_text("recovered answer about rice fertilizer");
    let result = engine
        .workflow_execute(handoff.workflow_id, 0, &cancel)
        .await
        .unwrap();
    assert_eq!(result.response.as_deref(), Some("recovered answer about rice fertilizer"));
}

#[tokio::test]
async fn test_finalize_before_completion_is_incomplete() {
    let (_backend, engine) = seeded_engine().await;
    let cancel = CancellationToken::new();
    let handoff = engine
        .workflows()
        .start("a three step query", three_subtasks())
        .unwrap();

    let err = engine
        .workflow_summary(handoff.workflow_id, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Incomplete { completed: 0, total: 3 }));
}

#[tokio::test]
async fn test_synthesis_failure_errors_the_workflow() {
    let (backend, engine) = seeded_engine().await;
    let cancel = CancellationToken::new();
    let handoff = engine
        .workflows()
        .start(
            "two step query",
            vec![
                spec("soil advice for rice", IntentLabel::Soil, 0),
                spec("fertilizer advice for rice", IntentLabel::Fertilizer, 1),
            ],
        )
        .unwrap();

    for index in 0..2 {
        engine
            .workflow_execute(handoff.workflow_id, index, &cancel)
            .await
            .unwrap();
    }

    backend.push_failure(FailureKind::Auth);
    let err = engine
        .workflow_summary(handoff.workflow_id, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UpstreamAuth(_)));

    let snapshot = engine.workflow_status(handoff.workflow_id).unwrap();
    assert_eq!(snapshot.status, WorkflowStatus::Errored);
}

#[tokio::test]
async fn test_start_is_idempotent_within_ttl() {
    let (_backend, engine) = seeded_engine().await;

    let first = engine
        .workflows()
        .start("same query", three_subtasks())
        .unwrap();
    let second = engine
        .workflows()
        .start("same query", three_subtasks())
        .unwrap();
    assert_eq!(first.workflow_id, second.workflow_id);

    let different = engine
        .workflows()
        .start("a different query", three_subtasks())
        .unwrap();
    assert_ne!(first.workflow_id, different.workflow_id);
}

#[tokio::test]
async fn test_too_many_subtasks_rejected() {
    let (_backend, engine) = seeded_engine().await;
    let subtasks: Vec<SubtaskSpec> = (0..11)
        .map(|i| spec(&format!("step {i}"), IntentLabel::General, i))
        .collect();

    let err = engine.workflows().start("big query", subtasks).unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_unknown_workflow_is_not_found() {
    let (_backend, engine) = seeded_engine().await;
    let cancel = CancellationToken::new();
    let ghost = agri_core_common::WorkflowId::new();

    assert!(matches!(
        engine.workflow_status(ghost).unwrap_err(),
        EngineError::NotFound(_)
    ));
    assert!(matches!(
        engine.workflow_execute(ghost, 0, &cancel).await.unwrap_err(),
        EngineError::NotFound(_)
    ));
    assert!(matches!(
        engine.workflow_summary(ghost, &cancel).await.unwrap_err(),
        EngineError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_cancelled_subtask_is_discarded() {
    let (_backend, engine) = seeded_engine().await;
    let handoff = engine
        .workflows()
        .start("a three step query", three_subtasks())
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine
        .workflow_execute(handoff.workflow_id, 0, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));

    // Nothing was persisted; the same index executes cleanly afterwards
    let snapshot = engine.workflow_status(handoff.workflow_id).unwrap();
    assert_eq!(snapshot.completed.len(), 0);

    let fresh = CancellationToken::new();
    let result = engine
        .workflow_execute(handoff.workflow_id, 0, &fresh)
        .await
        .unwrap();
    assert!(result.response.is_some());
}

#[tokio::test]
async fn test_terminal_workflows_expire_after_ttl() {
    let mut config = test_config();
    config.workflow.ttl_seconds = 0;
    let (_backend, engine) = seeded_engine_with_config(config).await;
    let cancel = CancellationToken::new();

    let handoff = engine
        .workflows()
        .start(
            "short lived",
            vec![
                spec("soil advice for rice", IntentLabel::Soil, 0),
                spec("fertilizer advice for rice", IntentLabel::Fertilizer, 1),
            ],
        )
        .unwrap();
    for index in 0..2 {
        engine
            .workflow_execute(handoff.workflow_id, index, &cancel)
            .await
            .unwrap();
    }
    engine
        .workflow_summary(handoff.workflow_id, &cancel)
        .await
        .unwrap();

    // A pending workflow survives the sweep, the terminal one does not
    let pending = engine
        .workflows()
        .start("still pending", three_subtasks())
        .unwrap();

    engine.workflows().evict_expired();

    assert!(matches!(
        engine.workflow_status(handoff.workflow_id).unwrap_err(),
        EngineError::NotFound(_)
    ));
    assert!(engine.workflow_status(pending.workflow_id).is_ok());
}
