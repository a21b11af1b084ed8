// Protocol invariants of the multi-model evaluation run
//
// Model preservation, step ordering, fatal all-models-failed, fan-out
// restriction via config, and aggregation behavior at the metric level.

use std::collections::HashSet;
use std::sync::Arc;

use ragscore_core::memory::{MockChatClient, MockEmbeddingModel, RecordingListener};
use ragscore_core::{
    ChatClientStore, EmbeddingModelStore, EvalError, MultiModelExecutor,
    ProviderRateLimiterRegistry, Sample, ScoreAggregator,
};
use ragscore_metrics::{Faithfulness, FaithfulnessConfig};

fn executor_with(clients: Vec<(&str, Arc<MockChatClient>)>) -> Arc<MultiModelExecutor> {
    let mut store = ChatClientStore::new(Arc::new(MockChatClient::failing("no default client")));
    for (model_id, client) in clients {
        store = store.with_client(model_id, client);
    }
    Arc::new(MultiModelExecutor::new(
        Arc::new(store),
        Arc::new(EmbeddingModelStore::new(Arc::new(MockEmbeddingModel::new()))),
        Arc::new(ProviderRateLimiterRegistry::new()),
    ))
}

fn sample() -> Sample {
    Sample::builder()
        .user_input("What is Java?")
        .response("Java is a programming language.")
        .retrieved_context("Java is a high-level language.")
        .build()
}

fn working_client(verdict_one: bool) -> Arc<MockChatClient> {
    let verdict = if verdict_one { 1 } else { 0 };
    Arc::new(MockChatClient::keyed([
        (
            "break the answer down".to_string(),
            r#"{"statements": ["Java is a programming language.", "Java is old."]}"#.to_string(),
        ),
        (
            "judge the faithfulness".to_string(),
            format!(
                r#"{{"verdicts": [
                    {{"statement": "Java is a programming language.", "verdict": 1}},
                    {{"statement": "Java is old.", "verdict": {verdict}}}
                ]}}"#
            ),
        ),
    ]))
}

#[tokio::test]
async fn test_scored_and_excluded_models_partition_the_initial_set() {
    let listener = Arc::new(RecordingListener::new());
    let executor = executor_with(vec![
        ("healthy", working_client(true)),
        ("broken", Arc::new(MockChatClient::failing("down"))),
    ]);
    executor.add_listener(listener.clone());

    let score = Faithfulness::new(executor)
        .single_turn_score_default(&sample())
        .await
        .unwrap();
    assert!((score - 1.0).abs() < 1e-9);

    let result = &listener.results()[0];
    let scored: HashSet<&str> = result.model_scores.keys().map(String::as_str).collect();
    let excluded: HashSet<&str> = result
        .excluded_models
        .iter()
        .map(String::as_str)
        .collect();
    let initial: HashSet<&str> = result.model_ids.iter().map(String::as_str).collect();

    assert!(scored.is_disjoint(&excluded));
    let union: HashSet<&str> = scored.union(&excluded).copied().collect();
    assert_eq!(union, initial);
    assert_eq!(excluded, HashSet::from(["broken"]));

    // The exclusion carries the failing step
    assert_eq!(result.exclusions.len(), 1);
    assert_eq!(result.exclusions[0].failed_step_name, "GenerateStatements");
}

#[tokio::test]
async fn test_step_indexes_are_strictly_increasing_from_zero() {
    let listener = Arc::new(RecordingListener::new());
    let executor = executor_with(vec![("gpt-4o", working_client(true))]);
    executor.add_listener(listener.clone());

    Faithfulness::new(executor)
        .single_turn_score_default(&sample())
        .await
        .unwrap();

    let result = &listener.results()[0];
    let indexes: Vec<usize> = result.steps.iter().map(|s| s.step_index).collect();
    assert_eq!(indexes, (0..result.steps.len()).collect::<Vec<_>>());
    for step in &result.steps {
        assert_eq!(step.total_steps, 3);
        assert!(step.step_index < step.total_steps);
    }
}

#[tokio::test]
async fn test_all_models_failing_a_step_is_fatal() {
    let listener = Arc::new(RecordingListener::new());
    let executor = executor_with(vec![
        ("a", Arc::new(MockChatClient::failing("down"))),
        ("b", Arc::new(MockChatClient::failing("also down"))),
    ]);
    executor.add_listener(listener.clone());

    let err = Faithfulness::new(executor)
        .single_turn_score_default(&sample())
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "All models failed at step GenerateStatements for metric: faithfulness"
    );

    // The end envelope still fires, carrying the failure
    let results = listener.results();
    assert_eq!(results.len(), 1);
    assert!(results[0].aggregated_score.is_none());
    assert!(results[0].error.as_deref().unwrap().contains("GenerateStatements"));
}

#[tokio::test]
async fn test_config_model_ids_restrict_fan_out() {
    let used = working_client(true);
    let unused = working_client(true);
    let executor = executor_with(vec![("used", used.clone()), ("unused", unused.clone())]);

    let config = FaithfulnessConfig {
        model_ids: Some(vec!["used".to_string()]),
        ..Default::default()
    };
    Faithfulness::new(executor)
        .single_turn_score(&config, &sample())
        .await
        .unwrap();

    assert!(used.call_count() > 0);
    assert_eq!(unused.call_count(), 0);
}

#[tokio::test]
async fn test_average_aggregation_across_models() {
    let executor = executor_with(vec![
        ("strict", working_client(false)), // 0.5
        ("lenient", working_client(true)), // 1.0
    ]);

    let score = Faithfulness::new(executor)
        .single_turn_score_default(&sample())
        .await
        .unwrap();
    assert!((score - 0.75).abs() < 1e-9);
}

#[tokio::test]
async fn test_consensus_aggregation_failure_is_fatal() {
    let executor = executor_with(vec![
        ("strict", working_client(false)), // 0.5
        ("lenient", working_client(true)), // 1.0
    ]);

    let config = FaithfulnessConfig {
        aggregation: ScoreAggregator::Consensus { tolerance: 0.1 },
        ..Default::default()
    };
    let err = Faithfulness::new(executor)
        .single_turn_score(&config, &sample())
        .await
        .unwrap_err();
    assert!(matches!(err, EvalError::ConsensusNotReached { .. }));
}

#[tokio::test]
async fn test_step_results_preserve_model_order() {
    let listener = Arc::new(RecordingListener::new());
    let executor = executor_with(vec![
        ("zeta", working_client(true)),
        ("alpha", working_client(true)),
        ("mid", working_client(true)),
    ]);
    executor.add_listener(listener.clone());

    let config = FaithfulnessConfig {
        model_ids: Some(vec![
            "zeta".to_string(),
            "alpha".to_string(),
            "mid".to_string(),
        ]),
        ..Default::default()
    };
    Faithfulness::new(executor)
        .single_turn_score(&config, &sample())
        .await
        .unwrap();

    for step in listener.steps() {
        let order: Vec<&str> = step.results.iter().map(|r| r.model_id()).collect();
        assert_eq!(order, vec!["zeta", "alpha", "mid"], "{}", step.step_name);
    }
}
