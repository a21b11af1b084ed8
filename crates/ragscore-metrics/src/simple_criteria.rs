// Simple Criteria Score
//
// Continuous judgement of the response against a free-form definition,
// scored within a caller-configured range. The only metric whose score is
// not normalized into [0, 1]; the configured bounds are the contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use ragscore_core::metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
use ragscore_core::prompt::render;
use ragscore_core::{MultiModelExecutor, Result, Sample, ScoreAggregator};

const SIMPLE_CRITERIA_PROMPT: &str = "\
Score the submission against the given criteria with a number between \
{min_score} and {max_score}.

Criteria:
{definition}

Question:
{question}

Submission:
{answer}

Reference (may be empty):
{reference}

Respond with JSON of the form {\"reason\": \"...\", \"score\": number}.";

/// Configuration for [`SimpleCriteriaScore`]
#[derive(Debug, Clone, Serialize)]
pub struct SimpleCriteriaConfig {
    /// Restrict fan-out to these models; `None` uses all configured models
    pub model_ids: Option<Vec<String>>,
    pub aggregation: ScoreAggregator,
    /// What the judge should score, in plain language
    pub definition: String,
    pub min_score: f64,
    pub max_score: f64,
}

impl SimpleCriteriaConfig {
    pub fn new(definition: impl Into<String>) -> Self {
        Self {
            model_ids: None,
            aggregation: ScoreAggregator::default(),
            definition: definition.into(),
            min_score: 0.0,
            max_score: 5.0,
        }
    }

    pub fn with_range(mut self, min_score: f64, max_score: f64) -> Self {
        self.min_score = min_score;
        self.max_score = max_score;
        self
    }
}

impl MetricConfig for SimpleCriteriaConfig {
    fn model_ids(&self) -> Option<&[String]> {
        self.model_ids.as_deref()
    }

    fn aggregation(&self) -> ScoreAggregator {
        self.aggregation
    }
}

/// Response schema for the judgement step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriteriaScoreResponse {
    #[serde(default)]
    pub reason: Option<String>,
    pub score: f64,
}

/// Continuous criteria judgement within a configured range
#[derive(Clone)]
pub struct SimpleCriteriaScore {
    executor: Arc<MultiModelExecutor>,
}

impl SimpleCriteriaScore {
    pub fn new(executor: Arc<MultiModelExecutor>) -> Self {
        Self { executor }
    }

    pub async fn single_turn_score(
        &self,
        config: &SimpleCriteriaConfig,
        sample: &Sample,
    ) -> Result<f64> {
        self.score(config, sample).await
    }

    pub fn single_turn_score_async(
        &self,
        config: &SimpleCriteriaConfig,
        sample: &Sample,
    ) -> ScoreHandle {
        self.score_async(config, sample)
    }
}

#[async_trait]
impl MultiModelMetric for SimpleCriteriaScore {
    type Config = SimpleCriteriaConfig;

    fn name(&self) -> &'static str {
        "simple_criteria_score"
    }

    fn executor(&self) -> &Arc<MultiModelExecutor> {
        &self.executor
    }

    fn planned_steps(&self, _config: &Self::Config, _sample: &Sample) -> usize {
        1
    }

    fn missing_input(&self, _config: &Self::Config, sample: &Sample) -> Option<&'static str> {
        if !sample.has_user_input() {
            Some("user_input")
        } else if !sample.has_response() {
            Some("response")
        } else {
            None
        }
    }

    async fn run_pipeline(
        &self,
        eval: &mut Evaluation,
        config: &Self::Config,
        sample: &Sample,
    ) -> Result<HashMap<String, f64>> {
        let prompt = render(
            SIMPLE_CRITERIA_PROMPT,
            &[
                ("min_score", config.min_score.to_string().as_str()),
                ("max_score", config.max_score.to_string().as_str()),
                ("definition", config.definition.as_str()),
                ("question", sample.user_input().unwrap_or_default()),
                ("answer", sample.response().unwrap_or_default()),
                ("reference", sample.reference().unwrap_or_default()),
            ],
        );

        let judged: HashMap<String, CriteriaScoreResponse> =
            eval.llm_step("EvaluateCriteria", &prompt).await?;

        let (min_score, max_score) = (config.min_score, config.max_score);
        Ok(judged
            .into_iter()
            .map(|(model, response)| (model, response.score.clamp(min_score, max_score)))
            .collect())
    }
}
