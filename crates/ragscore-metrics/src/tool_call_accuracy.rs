// Tool Call Accuracy
//
// Compute-only agent metric: every reference tool call must appear in the
// conversation's observed AI tool-call sequence, in order, with an equal
// name and an equal arguments object. All-or-nothing score.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use ragscore_core::metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
use ragscore_core::{MultiModelExecutor, Result, Sample, ScoreAggregator, ToolCall};

/// Configuration for [`ToolCallAccuracy`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolCallAccuracyConfig {
    /// Restrict fan-out to these models; `None` uses all configured models
    pub model_ids: Option<Vec<String>>,
    pub aggregation: ScoreAggregator,
}

impl MetricConfig for ToolCallAccuracyConfig {
    fn model_ids(&self) -> Option<&[String]> {
        self.model_ids.as_deref()
    }

    fn aggregation(&self) -> ScoreAggregator {
        self.aggregation
    }
}

/// True when every reference call occurs in the observed sequence, in order,
/// with equal name and arguments
pub(crate) fn matches_in_order(observed: &[&ToolCall], reference: &[ToolCall]) -> bool {
    let mut position = 0usize;
    for expected in reference {
        let found = observed[position..]
            .iter()
            .position(|call| call.name == expected.name && call.arguments == expected.arguments);
        match found {
            Some(offset) => position += offset + 1,
            None => return false,
        }
    }
    true
}

/// Exact-match accuracy of the agent's tool-call sequence
#[derive(Clone)]
pub struct ToolCallAccuracy {
    executor: Arc<MultiModelExecutor>,
}

impl ToolCallAccuracy {
    pub fn new(executor: Arc<MultiModelExecutor>) -> Self {
        Self { executor }
    }

    pub async fn multi_turn_score(
        &self,
        config: &ToolCallAccuracyConfig,
        sample: &Sample,
    ) -> Result<f64> {
        self.score(config, sample).await
    }

    pub async fn multi_turn_score_default(&self, sample: &Sample) -> Result<f64> {
        self.score(&ToolCallAccuracyConfig::default(), sample).await
    }

    pub fn multi_turn_score_async(
        &self,
        config: &ToolCallAccuracyConfig,
        sample: &Sample,
    ) -> ScoreHandle {
        self.score_async(config, sample)
    }
}

#[async_trait]
impl MultiModelMetric for ToolCallAccuracy {
    type Config = ToolCallAccuracyConfig;

    fn name(&self) -> &'static str {
        "tool_call_accuracy"
    }

    fn executor(&self) -> &Arc<MultiModelExecutor> {
        &self.executor
    }

    fn planned_steps(&self, _config: &Self::Config, _sample: &Sample) -> usize {
        1
    }

    fn missing_input(&self, _config: &Self::Config, sample: &Sample) -> Option<&'static str> {
        if sample.user_input_messages().is_empty() {
            Some("user_input_messages")
        } else if sample.reference_tool_calls().is_empty() {
            Some("reference_tool_calls")
        } else {
            None
        }
    }

    async fn run_pipeline(
        &self,
        eval: &mut Evaluation,
        _config: &Self::Config,
        sample: &Sample,
    ) -> Result<HashMap<String, f64>> {
        let observed = sample.ai_tool_calls();
        let score = if matches_in_order(&observed, sample.reference_tool_calls()) {
            1.0
        } else {
            0.0
        };
        eval.compute_step("CompareToolCalls", |_| Ok(score)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall::new(name, arguments)
    }

    #[test]
    fn test_exact_sequence_matches() {
        let observed_calls = vec![
            call("search", json!({"q": "weather"})),
            call("book", json!({"city": "Paris"})),
        ];
        let observed: Vec<&ToolCall> = observed_calls.iter().collect();
        let reference = vec![
            call("search", json!({"q": "weather"})),
            call("book", json!({"city": "Paris"})),
        ];
        assert!(matches_in_order(&observed, &reference));
    }

    #[test]
    fn test_extra_observed_calls_are_allowed() {
        let observed_calls = vec![
            call("log", json!({})),
            call("search", json!({"q": "x"})),
            call("log", json!({})),
            call("book", json!({"id": 7})),
        ];
        let observed: Vec<&ToolCall> = observed_calls.iter().collect();
        let reference = vec![call("search", json!({"q": "x"})), call("book", json!({"id": 7}))];
        assert!(matches_in_order(&observed, &reference));
    }

    #[test]
    fn test_wrong_order_fails() {
        let observed_calls = vec![call("book", json!({})), call("search", json!({}))];
        let observed: Vec<&ToolCall> = observed_calls.iter().collect();
        let reference = vec![call("search", json!({})), call("book", json!({}))];
        assert!(!matches_in_order(&observed, &reference));
    }

    #[test]
    fn test_different_arguments_fail() {
        let observed_calls = vec![call("search", json!({"q": "a"}))];
        let observed: Vec<&ToolCall> = observed_calls.iter().collect();
        let reference = vec![call("search", json!({"q": "b"}))];
        assert!(!matches_in_order(&observed, &reference));
    }

    #[test]
    fn test_argument_key_order_does_not_matter() {
        let observed_calls = vec![call("search", json!({"a": 1, "b": 2}))];
        let observed: Vec<&ToolCall> = observed_calls.iter().collect();
        let reference = vec![call("search", json!({"b": 2, "a": 1}))];
        assert!(matches_in_order(&observed, &reference));
    }
}
