// Listener fan-out and ordering
//
// Every registered listener sees the full lifecycle of an evaluation;
// listeners run in priority order for every callback; a panicking listener
// never affects the score.

use std::sync::{Arc, Mutex};

use ragscore_core::listener::ModelExecutionListener;
use ragscore_core::memory::{MockChatClient, MockEmbeddingModel, RecordedEvent, RecordingListener};
use ragscore_core::{
    ChatClientStore, EmbeddingModelStore, MultiModelExecutor, ProviderRateLimiterRegistry, Sample,
};
use ragscore_metrics::Faithfulness;

fn executor_with_client(client: Arc<MockChatClient>) -> Arc<MultiModelExecutor> {
    let store = ChatClientStore::new(Arc::new(MockChatClient::failing("no default")))
        .with_client("gpt-4o", client);
    Arc::new(MultiModelExecutor::new(
        Arc::new(store),
        Arc::new(EmbeddingModelStore::new(Arc::new(MockEmbeddingModel::new()))),
        Arc::new(ProviderRateLimiterRegistry::new()),
    ))
}

fn faithfulness_client() -> Arc<MockChatClient> {
    Arc::new(MockChatClient::keyed([
        ("break the answer down", r#"{"statements": ["a"]}"#),
        (
            "judge the faithfulness",
            r#"{"verdicts": [{"statement": "a", "verdict": 1}]}"#,
        ),
    ]))
}

fn sample() -> Sample {
    Sample::builder()
        .user_input("What is Java?")
        .response("Java is a programming language.")
        .retrieved_context("Java is a high-level language.")
        .build()
}

#[tokio::test]
async fn test_every_listener_sees_the_full_lifecycle() {
    let first = Arc::new(RecordingListener::with_priority(1));
    let second = Arc::new(RecordingListener::with_priority(2));
    let executor = executor_with_client(faithfulness_client());
    executor.add_listener(first.clone());
    executor.add_listener(second.clone());

    Faithfulness::new(executor)
        .single_turn_score_default(&sample())
        .await
        .unwrap();

    // Faithfulness runs 3 steps: 2 LLM + 1 compute
    for listener in [&first, &second] {
        assert_eq!(
            listener.count(|e| matches!(e, RecordedEvent::BeforeMetricEvaluation(_))),
            1
        );
        assert_eq!(
            listener.count(|e| matches!(e, RecordedEvent::BeforeStep { .. })),
            3
        );
        assert_eq!(
            listener.count(|e| matches!(e, RecordedEvent::AfterLlmStep(_))),
            2
        );
        assert_eq!(
            listener.count(|e| matches!(e, RecordedEvent::AfterComputeStep(_))),
            1
        );
        assert_eq!(
            listener.count(|e| matches!(e, RecordedEvent::AfterMetricEvaluation(_))),
            1
        );
    }
}

struct OrderProbe {
    tag: &'static str,
    priority: i32,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl ModelExecutionListener for OrderProbe {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn before_step(&self, _name: &str, _index: usize, _total: usize) {
        self.log.lock().unwrap().push(self.tag);
    }
}

#[tokio::test]
async fn test_listeners_dispatch_in_priority_order_for_every_step() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor = executor_with_client(faithfulness_client());
    // Registered high priority first to prove sorting, not registration order
    executor.add_listener(Arc::new(OrderProbe {
        tag: "late",
        priority: 2,
        log: log.clone(),
    }));
    executor.add_listener(Arc::new(OrderProbe {
        tag: "early",
        priority: 1,
        log: log.clone(),
    }));

    Faithfulness::new(executor)
        .single_turn_score_default(&sample())
        .await
        .unwrap();

    let calls = log.lock().unwrap().clone();
    assert_eq!(calls.len(), 6, "2 listeners x 3 steps");
    for pair in calls.chunks(2) {
        assert_eq!(pair, ["early", "late"]);
    }
}

struct ExplodingListener;

impl ModelExecutionListener for ExplodingListener {
    fn after_llm_step(&self, _step: &ragscore_core::StepResults) {
        panic!("listener bug");
    }
}

#[tokio::test]
async fn test_panicking_listener_does_not_affect_the_score() {
    let recording = Arc::new(RecordingListener::with_priority(10));
    let executor = executor_with_client(faithfulness_client());
    executor.add_listener(Arc::new(ExplodingListener));
    executor.add_listener(recording.clone());

    let score = Faithfulness::new(executor)
        .single_turn_score_default(&sample())
        .await
        .unwrap();

    assert!((score - 1.0).abs() < 1e-9);
    // The listener after the panicking one still saw both LLM steps
    assert_eq!(
        recording.count(|e| matches!(e, RecordedEvent::AfterLlmStep(_))),
        2
    );
}
