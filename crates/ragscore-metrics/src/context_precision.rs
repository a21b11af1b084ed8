// Context Precision
//
// Were the useful contexts retrieved at the top of the ranking? Every
// retrieved context is judged for relevance in rank order and the per-model
// score is the Average Precision of the resulting relevance vector.
//
// The judgement compares each context against the reference when one is
// available (or pinned), otherwise against the response. A model that fails
// one context's judgement stays in the pipeline; that context simply counts
// as not relevant for it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use ragscore_core::metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
use ragscore_core::prompt::render;
use ragscore_core::{MultiModelExecutor, Result, Sample, ScoreAggregator};

const REFERENCE_BASED_PROMPT: &str = "\
Given a question, a reference answer and a retrieved context, verify whether \
the context was useful in arriving at the reference answer.

Question:
{question}

Reference answer:
{reference}

Context:
{context}

Respond with JSON of the form {\"relevant\": true or false, \"reasoning\": \"...\"}.";

const RESPONSE_BASED_PROMPT: &str = "\
Given a question, a generated answer and a retrieved context, verify whether \
the context was useful in arriving at the generated answer.

Question:
{question}

Answer:
{answer}

Context:
{context}

Respond with JSON of the form {\"relevant\": true or false, \"reasoning\": \"...\"}.";

/// Which text each context is judged against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextPrecisionStrategy {
    /// Judge usefulness for the reference answer (preferred)
    ReferenceBased,
    /// Judge usefulness for the generated response
    ResponseBased,
}

/// Configuration for [`ContextPrecision`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextPrecisionConfig {
    /// Restrict fan-out to these models; `None` uses all configured models
    pub model_ids: Option<Vec<String>>,
    pub aggregation: ScoreAggregator,
    /// Pin a strategy; `None` auto-detects from the sample
    pub strategy: Option<ContextPrecisionStrategy>,
}

impl MetricConfig for ContextPrecisionConfig {
    fn model_ids(&self) -> Option<&[String]> {
        self.model_ids.as_deref()
    }

    fn aggregation(&self) -> ScoreAggregator {
        self.aggregation
    }
}

/// Response schema for each per-context judgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceResponse {
    pub relevant: bool,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Average Precision of a relevance vector (1-indexed ranks).
///
/// 0.0 when nothing is relevant.
pub(crate) fn average_precision(relevance: &[bool]) -> f64 {
    let mut hits = 0usize;
    let mut sum = 0.0;
    for (rank, relevant) in relevance.iter().enumerate() {
        if *relevant {
            hits += 1;
            sum += hits as f64 / (rank + 1) as f64;
        }
    }
    if hits == 0 {
        0.0
    } else {
        sum / hits as f64
    }
}

/// Average Precision of the per-context relevance judgements
#[derive(Clone)]
pub struct ContextPrecision {
    executor: Arc<MultiModelExecutor>,
}

impl ContextPrecision {
    pub fn new(executor: Arc<MultiModelExecutor>) -> Self {
        Self { executor }
    }

    pub async fn single_turn_score(
        &self,
        config: &ContextPrecisionConfig,
        sample: &Sample,
    ) -> Result<f64> {
        self.score(config, sample).await
    }

    pub async fn single_turn_score_default(&self, sample: &Sample) -> Result<f64> {
        self.score(&ContextPrecisionConfig::default(), sample).await
    }

    pub fn single_turn_score_async(
        &self,
        config: &ContextPrecisionConfig,
        sample: &Sample,
    ) -> ScoreHandle {
        self.score_async(config, sample)
    }

    /// Effective strategy for this sample, falling back to response-based
    /// when a pinned reference-based run has no reference to compare with.
    fn resolve_strategy(
        &self,
        config: &ContextPrecisionConfig,
        sample: &Sample,
    ) -> (ContextPrecisionStrategy, bool) {
        match config.strategy {
            Some(ContextPrecisionStrategy::ReferenceBased) if !sample.has_reference() => {
                (ContextPrecisionStrategy::ResponseBased, true)
            }
            Some(strategy) => (strategy, false),
            None if sample.has_reference() => (ContextPrecisionStrategy::ReferenceBased, false),
            None => (ContextPrecisionStrategy::ResponseBased, false),
        }
    }
}

#[async_trait]
impl MultiModelMetric for ContextPrecision {
    type Config = ContextPrecisionConfig;

    fn name(&self) -> &'static str {
        "context_precision"
    }

    fn executor(&self) -> &Arc<MultiModelExecutor> {
        &self.executor
    }

    fn planned_steps(&self, _config: &Self::Config, sample: &Sample) -> usize {
        sample.retrieved_contexts().len() + 1
    }

    fn missing_input(&self, config: &Self::Config, sample: &Sample) -> Option<&'static str> {
        if !sample.has_user_input() {
            return Some("user_input");
        }
        if sample.retrieved_contexts().is_empty() {
            return Some("retrieved_contexts");
        }
        let (strategy, _) = self.resolve_strategy(config, sample);
        if strategy == ContextPrecisionStrategy::ResponseBased && !sample.has_response() {
            return Some("response");
        }
        None
    }

    async fn run_pipeline(
        &self,
        eval: &mut Evaluation,
        config: &Self::Config,
        sample: &Sample,
    ) -> Result<HashMap<String, f64>> {
        let (strategy, fell_back) = self.resolve_strategy(config, sample);
        if fell_back {
            warn!(
                metric = self.name(),
                "reference-based strategy pinned but reference is blank; using response-based"
            );
            eval.set_metadata("strategy_fallback", json!(true));
        }
        eval.set_metadata("strategy", json!(strategy));

        let question = sample.user_input().unwrap_or_default();
        let mut votes: HashMap<String, Vec<bool>> = eval
            .active_models()
            .iter()
            .map(|model| (model.clone(), Vec::new()))
            .collect();

        for (rank, context) in sample.retrieved_contexts().iter().enumerate() {
            let prompt = match strategy {
                ContextPrecisionStrategy::ReferenceBased => render(
                    REFERENCE_BASED_PROMPT,
                    &[
                        ("question", question),
                        ("reference", sample.reference().unwrap_or_default()),
                        ("context", context.as_str()),
                    ],
                ),
                ContextPrecisionStrategy::ResponseBased => render(
                    RESPONSE_BASED_PROMPT,
                    &[
                        ("question", question),
                        ("answer", sample.response().unwrap_or_default()),
                        ("context", context.as_str()),
                    ],
                ),
            };

            let step_name = format!("EvaluateContext{}", rank + 1);
            // A failed judgement is a vote of "not relevant", not a drop-out
            let judgements: HashMap<String, Option<RelevanceResponse>> =
                eval.llm_step_lenient(&step_name, &prompt).await?;

            for (model, judgement) in judgements {
                let relevant = judgement.map(|j| j.relevant).unwrap_or(false);
                votes.entry(model).or_default().push(relevant);
            }
        }

        eval.compute_step("ComputePrecision", |model| {
            Ok(votes
                .get(model)
                .map(|v| average_precision(v))
                .unwrap_or(0.0))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_precision_mixed_vector() {
        let score = average_precision(&[true, false, true, false, true]);
        let expected = (1.0 / 1.0 + 2.0 / 3.0 + 3.0 / 5.0) / 3.0;
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_average_precision_nothing_relevant() {
        assert_eq!(average_precision(&[false, false, false]), 0.0);
        assert_eq!(average_precision(&[]), 0.0);
    }

    #[test]
    fn test_average_precision_everything_relevant() {
        assert!((average_precision(&[true, true, true]) - 1.0).abs() < 1e-9);
    }
}
