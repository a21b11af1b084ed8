// Faithfulness
//
// Measures how well the response is grounded in the retrieved contexts:
// the response is split into atomic claims, every claim is judged against
// the joined contexts, and the score is supported / total.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use ragscore_core::metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
use ragscore_core::prompt::render;
use ragscore_core::{MultiModelExecutor, Result, Sample, ScoreAggregator};

use crate::text::{numbered_list, ratio};

const GENERATE_STATEMENTS_PROMPT: &str = "\
Given a question and an answer, break the answer down into one or more fully \
understandable, atomic statements. Each statement must stand on its own \
without pronouns referring to other statements.

Question:
{question}

Answer:
{answer}

Respond with JSON of the form {\"statements\": [\"...\"]}.";

const EVALUATE_FAITHFULNESS_PROMPT: &str = "\
Your task is to judge the faithfulness of a series of statements based on the \
given context. For each statement return verdict 1 if the statement can be \
directly inferred from the context, or 0 if it cannot.

Context:
{context}

Statements:
{statements}

Respond with JSON of the form \
{\"verdicts\": [{\"statement\": \"...\", \"reason\": \"...\", \"verdict\": 0 or 1}]}.";

/// Configuration for [`Faithfulness`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct FaithfulnessConfig {
    /// Restrict fan-out to these models; `None` uses all configured models
    pub model_ids: Option<Vec<String>>,
    pub aggregation: ScoreAggregator,
}

impl MetricConfig for FaithfulnessConfig {
    fn model_ids(&self) -> Option<&[String]> {
        self.model_ids.as_deref()
    }

    fn aggregation(&self) -> ScoreAggregator {
        self.aggregation
    }
}

/// Response schema for the statement generation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementsResponse {
    /// Atomic claims extracted from the answer
    pub statements: Vec<String>,
}

/// One judged statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaithfulnessVerdict {
    pub statement: String,
    /// Short justification for the verdict
    #[serde(default)]
    pub reason: Option<String>,
    /// 1 when the statement is supported by the context, else 0
    pub verdict: u8,
}

/// Response schema for the verdict step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaithfulnessVerdicts {
    pub verdicts: Vec<FaithfulnessVerdict>,
}

/// Factual grounding of the response in the retrieved contexts
#[derive(Clone)]
pub struct Faithfulness {
    executor: Arc<MultiModelExecutor>,
}

impl Faithfulness {
    pub fn new(executor: Arc<MultiModelExecutor>) -> Self {
        Self { executor }
    }

    pub async fn single_turn_score(
        &self,
        config: &FaithfulnessConfig,
        sample: &Sample,
    ) -> Result<f64> {
        self.score(config, sample).await
    }

    pub async fn single_turn_score_default(&self, sample: &Sample) -> Result<f64> {
        self.score(&FaithfulnessConfig::default(), sample).await
    }

    pub fn single_turn_score_async(
        &self,
        config: &FaithfulnessConfig,
        sample: &Sample,
    ) -> ScoreHandle {
        self.score_async(config, sample)
    }
}

#[async_trait]
impl MultiModelMetric for Faithfulness {
    type Config = FaithfulnessConfig;

    fn name(&self) -> &'static str {
        "faithfulness"
    }

    fn executor(&self) -> &Arc<MultiModelExecutor> {
        &self.executor
    }

    fn planned_steps(&self, _config: &Self::Config, _sample: &Sample) -> usize {
        3
    }

    fn missing_input(&self, _config: &Self::Config, sample: &Sample) -> Option<&'static str> {
        if !sample.has_user_input() {
            Some("user_input")
        } else if !sample.has_response() {
            Some("response")
        } else if sample.retrieved_contexts().is_empty() {
            Some("retrieved_contexts")
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
        let prompt = render(
            GENERATE_STATEMENTS_PROMPT,
            &[
                ("question", sample.user_input().unwrap_or_default()),
                ("answer", sample.response().unwrap_or_default()),
            ],
        );
        let statements: HashMap<String, StatementsResponse> =
            eval.llm_step("GenerateStatements", &prompt).await?;

        let context = sample.joined_contexts();
        let verdicts: HashMap<String, FaithfulnessVerdicts> = eval
            .llm_step_per_model("EvaluateFaithfulness", |model| {
                let list = statements
                    .get(model)
                    .map(|s| numbered_list(&s.statements))
                    .unwrap_or_default();
                render(
                    EVALUATE_FAITHFULNESS_PROMPT,
                    &[("context", context.as_str()), ("statements", list.as_str())],
                )
            })
            .await?;

        eval.compute_step("ComputeFaithfulness", |model| {
            Ok(verdicts
                .get(model)
                .map(|v| {
                    let supported = v.verdicts.iter().filter(|x| x.verdict == 1).count();
                    ratio(supported, v.verdicts.len())
                })
                .unwrap_or(0.0))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdicts_deserialize_without_reason() {
        let raw = r#"{"verdicts": [{"statement": "Java is a language.", "verdict": 1}]}"#;
        let parsed: FaithfulnessVerdicts = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.verdicts.len(), 1);
        assert_eq!(parsed.verdicts[0].verdict, 1);
        assert!(parsed.verdicts[0].reason.is_none());
    }
}
