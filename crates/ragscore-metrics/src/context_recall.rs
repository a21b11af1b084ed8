// Context Recall
//
// Was everything needed to produce the reference answer actually retrieved?
// The reference is decomposed sentence by sentence and each sentence is
// classified as attributable to the joined context or not; the score is
// attributed / total.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use ragscore_core::metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
use ragscore_core::prompt::render;
use ragscore_core::{MultiModelExecutor, Result, Sample, ScoreAggregator};

use crate::text::ratio;

const CLASSIFY_STATEMENTS_PROMPT: &str = "\
Given a question, a context and a reference answer, analyze each sentence of \
the reference answer and classify whether the sentence can be attributed to \
the given context. Use 1 for attributable and 0 for not attributable.

Question:
{question}

Context:
{context}

Reference answer:
{reference}

Respond with JSON of the form \
{\"classifications\": [{\"statement\": \"...\", \"reason\": \"...\", \"attributed\": 0 or 1}]}.";

/// Configuration for [`ContextRecall`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextRecallConfig {
    /// Restrict fan-out to these models; `None` uses all configured models
    pub model_ids: Option<Vec<String>>,
    pub aggregation: ScoreAggregator,
}

impl MetricConfig for ContextRecallConfig {
    fn model_ids(&self) -> Option<&[String]> {
        self.model_ids.as_deref()
    }

    fn aggregation(&self) -> ScoreAggregator {
        self.aggregation
    }
}

/// One classified reference sentence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementClassification {
    pub statement: String,
    #[serde(default)]
    pub reason: Option<String>,
    /// 1 when the sentence is attributable to the context, else 0
    pub attributed: u8,
}

/// Response schema for the classification step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationsResponse {
    pub classifications: Vec<StatementClassification>,
}

/// Fraction of the reference answer attributable to the retrieved contexts
#[derive(Clone)]
pub struct ContextRecall {
    executor: Arc<MultiModelExecutor>,
}

impl ContextRecall {
    pub fn new(executor: Arc<MultiModelExecutor>) -> Self {
        Self { executor }
    }

    pub async fn single_turn_score(
        &self,
        config: &ContextRecallConfig,
        sample: &Sample,
    ) -> Result<f64> {
        self.score(config, sample).await
    }

    pub async fn single_turn_score_default(&self, sample: &Sample) -> Result<f64> {
        self.score(&ContextRecallConfig::default(), sample).await
    }

    pub fn single_turn_score_async(
        &self,
        config: &ContextRecallConfig,
        sample: &Sample,
    ) -> ScoreHandle {
        self.score_async(config, sample)
    }
}

#[async_trait]
impl MultiModelMetric for ContextRecall {
    type Config = ContextRecallConfig;

    fn name(&self) -> &'static str {
        "context_recall"
    }

    fn executor(&self) -> &Arc<MultiModelExecutor> {
        &self.executor
    }

    fn planned_steps(&self, _config: &Self::Config, _sample: &Sample) -> usize {
        2
    }

    fn missing_input(&self, _config: &Self::Config, sample: &Sample) -> Option<&'static str> {
        if !sample.has_user_input() {
            Some("user_input")
        } else if !sample.has_reference() {
            Some("reference")
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
            CLASSIFY_STATEMENTS_PROMPT,
            &[
                ("question", sample.user_input().unwrap_or_default()),
                ("context", sample.joined_contexts().as_str()),
                ("reference", sample.reference().unwrap_or_default()),
            ],
        );
        let classifications: HashMap<String, ClassificationsResponse> =
            eval.llm_step("ClassifyStatements", &prompt).await?;

        eval.compute_step("ComputeRecall", |model| {
            Ok(classifications
                .get(model)
                .map(|c| {
                    let attributed = c
                        .classifications
                        .iter()
                        .filter(|x| x.attributed == 1)
                        .count();
                    ratio(attributed, c.classifications.len())
                })
                .unwrap_or(0.0))
        })
        .await
    }
}
