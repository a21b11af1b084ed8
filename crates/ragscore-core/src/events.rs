// Lifecycle events and result carriers
//
// Everything a reporter needs flows through these types: the per-model
// outcome of a step (ModelResult), the recorded step (StepResults), the
// mid-pipeline drop-out record (ModelExclusionEvent), and the begin/end
// envelopes of one metric evaluation. Field names and types are part of the
// listener contract; new optional fields may be added.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::EvalError;
use crate::sample::Sample;

/// Kind of work a pipeline step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Llm,
    Embedding,
    Compute,
}

/// Outcome of one model invocation within one step.
///
/// Exactly one of result/error is set; the constructors enforce it.
#[derive(Debug, Clone)]
pub struct ModelResult<T> {
    model_id: String,
    request: String,
    duration: Duration,
    result: Option<T>,
    error: Option<Arc<EvalError>>,
}

impl<T> ModelResult<T> {
    /// Successful invocation
    pub fn success(
        model_id: impl Into<String>,
        request: impl Into<String>,
        duration: Duration,
        value: T,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            request: request.into(),
            duration,
            result: Some(value),
            error: None,
        }
    }

    /// Failed invocation
    pub fn failure(
        model_id: impl Into<String>,
        request: impl Into<String>,
        duration: Duration,
        error: EvalError,
    ) -> Self {
        Self::failure_shared(model_id, request, duration, Arc::new(error))
    }

    /// Failed invocation with a cause shared across several results
    pub fn failure_shared(
        model_id: impl Into<String>,
        request: impl Into<String>,
        duration: Duration,
        error: Arc<EvalError>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            request: request.into(),
            duration,
            result: None,
            error: Some(error),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// The prompt or input echo of this invocation
    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Option<T> {
        self.result
    }

    pub fn error(&self) -> Option<&Arc<EvalError>> {
        self.error.as_ref()
    }
}

impl<T: Serialize> ModelResult<T> {
    /// Type-erased copy for the step record handed to listeners
    pub fn recorded(&self) -> ModelResult<Value> {
        ModelResult {
            model_id: self.model_id.clone(),
            request: self.request.clone(),
            duration: self.duration,
            result: self
                .result
                .as_ref()
                .map(|value| serde_json::to_value(value).unwrap_or(Value::Null)),
            error: self.error.clone(),
        }
    }
}

/// One recorded pipeline step
#[derive(Debug, Clone)]
pub struct StepResults {
    pub step_name: String,
    pub step_index: usize,
    pub total_steps: usize,
    pub step_type: StepType,
    /// The common prompt, when every model received the same one
    pub request: Option<String>,
    /// Per-model outcomes, in the step's input model order
    pub results: Vec<ModelResult<Value>>,
}

impl StepResults {
    pub fn successful_models(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.is_success())
            .map(|r| r.model_id())
            .collect()
    }

    pub fn failed_models(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.model_id())
            .collect()
    }
}

/// A model dropped out of the pipeline mid-evaluation
#[derive(Debug, Clone)]
pub struct ModelExclusionEvent {
    pub model_id: String,
    pub failed_step_name: String,
    pub failed_step_index: usize,
    pub cause: Arc<EvalError>,
}

/// Begin envelope of one metric evaluation
#[derive(Debug, Clone)]
pub struct MetricEvaluationContext {
    pub evaluation_id: Uuid,
    pub metric_name: String,
    pub sample: Sample,
    /// The metric config echoed as JSON
    pub config: Value,
    /// Model set initially chosen for this evaluation
    pub model_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
}

impl MetricEvaluationContext {
    pub fn new(metric_name: impl Into<String>, sample: Sample, config: Value, model_ids: Vec<String>) -> Self {
        Self {
            evaluation_id: Uuid::now_v7(),
            metric_name: metric_name.into(),
            sample,
            config,
            model_ids,
            started_at: Utc::now(),
        }
    }
}

/// End envelope of one metric evaluation
#[derive(Debug, Clone)]
pub struct MetricEvaluationResult {
    pub evaluation_id: Uuid,
    pub metric_name: String,
    pub sample: Sample,
    pub config: Value,
    /// Model set initially chosen for this evaluation
    pub model_ids: Vec<String>,
    /// None when the evaluation ended in a fatal error
    pub aggregated_score: Option<f64>,
    pub model_scores: HashMap<String, f64>,
    pub excluded_models: Vec<String>,
    pub total_duration: Duration,
    /// Recorded steps, ordered by step index
    pub steps: Vec<StepResults>,
    pub exclusions: Vec<ModelExclusionEvent>,
    pub metadata: HashMap<String, Value>,
    /// Terminal error or missing-input diagnostic, when the run did not score
    pub error: Option<String>,
}

impl MetricEvaluationResult {
    pub fn is_success(&self) -> bool {
        self.aggregated_score.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_result_success_and_failure_are_exclusive() {
        let ok: ModelResult<u32> = ModelResult::success("m1", "prompt", Duration::ZERO, 7);
        assert!(ok.is_success());
        assert_eq!(ok.result(), Some(&7));
        assert!(ok.error().is_none());

        let bad: ModelResult<u32> = ModelResult::failure(
            "m1",
            "prompt",
            Duration::ZERO,
            EvalError::model("boom"),
        );
        assert!(!bad.is_success());
        assert!(bad.result().is_none());
        assert!(bad.error().is_some());
    }

    #[test]
    fn test_recorded_copy_serializes_the_value() {
        let ok: ModelResult<Vec<u32>> =
            ModelResult::success("m1", "prompt", Duration::ZERO, vec![1, 2]);
        let recorded = ok.recorded();
        assert_eq!(recorded.result(), Some(&serde_json::json!([1, 2])));
        assert_eq!(recorded.model_id(), "m1");
    }

    #[test]
    fn test_step_results_partitions_models() {
        let step = StepResults {
            step_name: "Judge".to_string(),
            step_index: 0,
            total_steps: 1,
            step_type: StepType::Llm,
            request: Some("p".to_string()),
            results: vec![
                ModelResult::success("a", "p", Duration::ZERO, Value::Null),
                ModelResult::failure("b", "p", Duration::ZERO, EvalError::model("x")),
            ],
        };
        assert_eq!(step.successful_models(), vec!["a"]);
        assert_eq!(step.failed_models(), vec!["b"]);
    }
}
