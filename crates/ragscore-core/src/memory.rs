// In-memory implementations for examples and testing
//
// Deterministic mock clients and a recording listener. The mocks can be
// configured per-test to return fixed responses, responses keyed by prompt
// substring, scripted sequences or failures, so repeated evaluations against
// them always yield identical scores.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::client::{ChatClient, EmbeddingModel};
use crate::events::{
    MetricEvaluationContext, MetricEvaluationResult, ModelExclusionEvent, StepResults,
};
use crate::listener::ModelExecutionListener;

// ============================================================================
// MockChatClient
// ============================================================================

enum MockBehavior {
    /// Always return the same completion
    Fixed(String),
    /// Return the response of the first rule whose needle occurs in the
    /// prompt; no match is an error so tests stay strict
    Keyed(Vec<(String, String)>),
    /// Return responses in order; an exhausted script is an error
    Sequence(Mutex<VecDeque<String>>),
    /// Always fail
    Fail(String),
}

/// Configurable fake chat client for tests
pub struct MockChatClient {
    behavior: MockBehavior,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockChatClient {
    /// Always return `response`
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::with_behavior(MockBehavior::Fixed(response.into()))
    }

    /// Route by prompt substring: the first `(needle, response)` rule whose
    /// needle occurs in the prompt wins
    pub fn keyed<I, N, R>(rules: I) -> Self
    where
        I: IntoIterator<Item = (N, R)>,
        N: Into<String>,
        R: Into<String>,
    {
        Self::with_behavior(MockBehavior::Keyed(
            rules
                .into_iter()
                .map(|(needle, response)| (needle.into(), response.into()))
                .collect(),
        ))
    }

    /// Return the scripted responses in order
    pub fn sequence<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_behavior(MockBehavior::Sequence(Mutex::new(
            responses.into_iter().map(Into::into).collect(),
        )))
    }

    /// Always fail with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_behavior(MockBehavior::Fail(message.into()))
    }

    fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Number of completions served (including failures)
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt received, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt log poisoned").clone()
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .expect("prompt log poisoned")
            .push(prompt.to_string());

        match &self.behavior {
            MockBehavior::Fixed(response) => Ok(response.clone()),
            MockBehavior::Keyed(rules) => rules
                .iter()
                .find(|(needle, _)| prompt.contains(needle))
                .map(|(_, response)| response.clone())
                .ok_or_else(|| anyhow::anyhow!("no mock rule matched prompt: {prompt}")),
            MockBehavior::Sequence(script) => script
                .lock()
                .expect("mock script poisoned")
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("mock response script exhausted")),
            MockBehavior::Fail(message) => Err(anyhow::anyhow!("{message}")),
        }
    }
}

// ============================================================================
// MockEmbeddingModel
// ============================================================================

/// Configurable fake embedding model for tests.
///
/// Texts registered with [`with_vector`](Self::with_vector) return their
/// vector; unknown texts get a deterministic vector derived from the text
/// bytes so cosine similarities are stable across runs.
pub struct MockEmbeddingModel {
    vectors: Vec<(String, Vec<f32>)>,
    fail: Option<String>,
}

impl MockEmbeddingModel {
    pub fn new() -> Self {
        Self {
            vectors: Vec::new(),
            fail: None,
        }
    }

    /// Always fail with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            vectors: Vec::new(),
            fail: Some(message.into()),
        }
    }

    /// Register an exact-text vector
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.push((text.into(), vector));
        self
    }
}

impl Default for MockEmbeddingModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingModel for MockEmbeddingModel {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        if let Some(message) = &self.fail {
            anyhow::bail!("{message}");
        }
        if let Some((_, vector)) = self.vectors.iter().find(|(key, _)| key == text) {
            return Ok(vector.clone());
        }
        // Stable fallback: three components folded from the text bytes
        let mut folded = [0u64; 3];
        for (i, byte) in text.bytes().enumerate() {
            folded[i % 3] = folded[i % 3].wrapping_mul(31).wrapping_add(u64::from(byte) + 1);
        }
        Ok(folded
            .iter()
            .map(|v| ((v % 1000) as f32 / 1000.0) + 0.001)
            .collect())
    }
}

// ============================================================================
// RecordingListener
// ============================================================================

/// Every callback the notifier can dispatch, as recorded data
#[derive(Debug, Clone)]
pub enum RecordedEvent {
    BeforeMetricEvaluation(MetricEvaluationContext),
    BeforeStep {
        step_name: String,
        step_index: usize,
        total_steps: usize,
    },
    AfterLlmStep(StepResults),
    AfterComputeStep(StepResults),
    ModelExcluded(ModelExclusionEvent),
    AfterMetricEvaluation(MetricEvaluationResult),
}

/// Listener that records every callback for assertions
pub struct RecordingListener {
    priority: i32,
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::with_priority(0)
    }

    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Everything recorded so far, in dispatch order
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().expect("event log poisoned").clone()
    }

    /// Count of recorded events matching the predicate
    pub fn count(&self, predicate: impl Fn(&RecordedEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }

    /// The recorded steps, LLM/embedding and compute alike, in order
    pub fn steps(&self) -> Vec<StepResults> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                RecordedEvent::AfterLlmStep(step) | RecordedEvent::AfterComputeStep(step) => {
                    Some(step)
                }
                _ => None,
            })
            .collect()
    }

    /// The end envelopes recorded so far
    pub fn results(&self) -> Vec<MetricEvaluationResult> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                RecordedEvent::AfterMetricEvaluation(result) => Some(result),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: RecordedEvent) {
        self.events.lock().expect("event log poisoned").push(event);
    }
}

impl Default for RecordingListener {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelExecutionListener for RecordingListener {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn before_metric_evaluation(&self, ctx: &MetricEvaluationContext) {
        self.record(RecordedEvent::BeforeMetricEvaluation(ctx.clone()));
    }

    fn before_step(&self, step_name: &str, step_index: usize, total_steps: usize) {
        self.record(RecordedEvent::BeforeStep {
            step_name: step_name.to_string(),
            step_index,
            total_steps,
        });
    }

    fn after_llm_step(&self, step: &StepResults) {
        self.record(RecordedEvent::AfterLlmStep(step.clone()));
    }

    fn after_compute_step(&self, step: &StepResults) {
        self.record(RecordedEvent::AfterComputeStep(step.clone()));
    }

    fn on_model_excluded(&self, event: &ModelExclusionEvent) {
        self.record(RecordedEvent::ModelExcluded(event.clone()));
    }

    fn after_metric_evaluation(&self, result: &MetricEvaluationResult) {
        self.record(RecordedEvent::AfterMetricEvaluation(result.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keyed_mock_routes_by_substring() {
        let client = MockChatClient::keyed([
            ("Extract statements", "{\"statements\": []}"),
            ("Judge", "{\"verdicts\": []}"),
        ]);

        let statements = client.complete("Extract statements from ...").await.unwrap();
        assert!(statements.contains("statements"));

        let judged = client.complete("Judge the following").await.unwrap();
        assert!(judged.contains("verdicts"));

        assert!(client.complete("unmatched").await.is_err());
        assert_eq!(client.call_count(), 3);
        assert_eq!(client.prompts().len(), 3);
    }

    #[tokio::test]
    async fn test_sequence_mock_exhausts() {
        let client = MockChatClient::sequence(["one", "two"]);
        assert_eq!(client.complete("a").await.unwrap(), "one");
        assert_eq!(client.complete("b").await.unwrap(), "two");
        assert!(client.complete("c").await.is_err());
    }

    #[tokio::test]
    async fn test_embedding_fallback_is_deterministic() {
        let model = MockEmbeddingModel::new();
        let first = model.embed("same text").await.unwrap();
        let second = model.embed("same text").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[tokio::test]
    async fn test_embedding_registered_vector_wins() {
        let model = MockEmbeddingModel::new().with_vector("question", vec![1.0, 0.0]);
        assert_eq!(model.embed("question").await.unwrap(), vec![1.0, 0.0]);
    }
}
