// Rubrics Score
//
// The judge picks one level from an enumerated rubric map
// ("score1_description" → text, "score2_description" → text, ...) and the
// chosen level's number is the score.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use ragscore_core::metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
use ragscore_core::prompt::render;
use ragscore_core::{MultiModelExecutor, Result, Sample, ScoreAggregator};

const RUBRICS_PROMPT: &str = "\
Judge the submission against the rubric below and pick the single score \
level that fits best.

Rubric:
{rubrics}

Question:
{question}

Submission:
{answer}

Reference (may be empty):
{reference}

Respond with JSON of the form {\"reason\": \"...\", \"score\": number}.";

/// Configuration for [`RubricsScore`]
#[derive(Debug, Clone, Serialize)]
pub struct RubricsConfig {
    /// Restrict fan-out to these models; `None` uses all configured models
    pub model_ids: Option<Vec<String>>,
    pub aggregation: ScoreAggregator,
    /// Ordered rubric levels: "score1_description" → what that level means
    pub rubrics: BTreeMap<String, String>,
}

impl RubricsConfig {
    pub fn new(rubrics: BTreeMap<String, String>) -> Self {
        Self {
            model_ids: None,
            aggregation: ScoreAggregator::default(),
            rubrics,
        }
    }
}

impl MetricConfig for RubricsConfig {
    fn model_ids(&self) -> Option<&[String]> {
        self.model_ids.as_deref()
    }

    fn aggregation(&self) -> ScoreAggregator {
        self.aggregation
    }
}

/// Response schema for the judgement step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricScoreResponse {
    #[serde(default)]
    pub reason: Option<String>,
    /// The chosen rubric level
    pub score: f64,
}

/// Rubric-level judgement
#[derive(Clone)]
pub struct RubricsScore {
    executor: Arc<MultiModelExecutor>,
}

impl RubricsScore {
    pub fn new(executor: Arc<MultiModelExecutor>) -> Self {
        Self { executor }
    }

    pub async fn single_turn_score(
        &self,
        config: &RubricsConfig,
        sample: &Sample,
    ) -> Result<f64> {
        self.score(config, sample).await
    }

    pub fn single_turn_score_async(
        &self,
        config: &RubricsConfig,
        sample: &Sample,
    ) -> ScoreHandle {
        self.score_async(config, sample)
    }
}

#[async_trait]
impl MultiModelMetric for RubricsScore {
    type Config = RubricsConfig;

    fn name(&self) -> &'static str {
        "rubrics_score"
    }

    fn executor(&self) -> &Arc<MultiModelExecutor> {
        &self.executor
    }

    fn planned_steps(&self, _config: &Self::Config, _sample: &Sample) -> usize {
        1
    }

    fn missing_input(&self, config: &Self::Config, sample: &Sample) -> Option<&'static str> {
        if config.rubrics.is_empty() {
            Some("rubrics")
        } else if !sample.has_user_input() {
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
        let rubric_lines = config
            .rubrics
            .iter()
            .map(|(level, description)| format!("{level}: {description}"))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = render(
            RUBRICS_PROMPT,
            &[
                ("rubrics", rubric_lines.as_str()),
                ("question", sample.user_input().unwrap_or_default()),
                ("answer", sample.response().unwrap_or_default()),
                ("reference", sample.reference().unwrap_or_default()),
            ],
        );

        let judged: HashMap<String, RubricScoreResponse> =
            eval.llm_step("EvaluateRubrics", &prompt).await?;

        Ok(judged
            .into_iter()
            .map(|(model, response)| (model, response.score))
            .collect())
    }
}
