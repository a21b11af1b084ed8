// Topic Adherence
//
// Did the agent stay within its allowed topics? Every AI turn is classified
// against the reference topics and the score is the on-topic fraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use ragscore_core::metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
use ragscore_core::prompt::render;
use ragscore_core::{MultiModelExecutor, Result, Sample, ScoreAggregator};

use crate::text::{numbered_list, ratio};

const CLASSIFY_TURNS_PROMPT: &str = "\
For each AI turn below, decide whether it stays within the allowed topics. \
Answer with 1 for on-topic and 0 for off-topic, in order.

Allowed topics:
{topics}

AI turns:
{turns}

Respond with JSON of the form \
{\"classifications\": [{\"turn\": \"...\", \"on_topic\": 0 or 1}]}.";

/// Configuration for [`TopicAdherence`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct TopicAdherenceConfig {
    /// Restrict fan-out to these models; `None` uses all configured models
    pub model_ids: Option<Vec<String>>,
    pub aggregation: ScoreAggregator,
}

impl MetricConfig for TopicAdherenceConfig {
    fn model_ids(&self) -> Option<&[String]> {
        self.model_ids.as_deref()
    }

    fn aggregation(&self) -> ScoreAggregator {
        self.aggregation
    }
}

/// One classified AI turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnClassification {
    #[serde(default)]
    pub turn: Option<String>,
    /// 1 when the turn stays within the allowed topics, else 0
    pub on_topic: u8,
}

/// Response schema for the classification step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnClassificationsResponse {
    pub classifications: Vec<TurnClassification>,
}

/// Fraction of AI turns that stay on the allowed topics
#[derive(Clone)]
pub struct TopicAdherence {
    executor: Arc<MultiModelExecutor>,
}

impl TopicAdherence {
    pub fn new(executor: Arc<MultiModelExecutor>) -> Self {
        Self { executor }
    }

    pub async fn multi_turn_score(
        &self,
        config: &TopicAdherenceConfig,
        sample: &Sample,
    ) -> Result<f64> {
        self.score(config, sample).await
    }

    pub async fn multi_turn_score_default(&self, sample: &Sample) -> Result<f64> {
        self.score(&TopicAdherenceConfig::default(), sample).await
    }

    pub fn multi_turn_score_async(
        &self,
        config: &TopicAdherenceConfig,
        sample: &Sample,
    ) -> ScoreHandle {
        self.score_async(config, sample)
    }
}

#[async_trait]
impl MultiModelMetric for TopicAdherence {
    type Config = TopicAdherenceConfig;

    fn name(&self) -> &'static str {
        "topic_adherence"
    }

    fn executor(&self) -> &Arc<MultiModelExecutor> {
        &self.executor
    }

    fn planned_steps(&self, _config: &Self::Config, _sample: &Sample) -> usize {
        2
    }

    fn missing_input(&self, _config: &Self::Config, sample: &Sample) -> Option<&'static str> {
        if sample.user_input_messages().is_empty() {
            Some("user_input_messages")
        } else if sample.reference_topics().is_empty() {
            Some("reference_topics")
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
        let turns = sample.ai_turns();
        let prompt = render(
            CLASSIFY_TURNS_PROMPT,
            &[
                ("topics", numbered_list(sample.reference_topics()).as_str()),
                ("turns", numbered_list(&turns).as_str()),
            ],
        );

        let classifications: HashMap<String, TurnClassificationsResponse> =
            eval.llm_step("ClassifyTurns", &prompt).await?;

        eval.compute_step("ComputeAdherence", |model| {
            Ok(classifications
                .get(model)
                .map(|c| {
                    let on_topic = c
                        .classifications
                        .iter()
                        .filter(|x| x.on_topic == 1)
                        .count();
                    ratio(on_topic, c.classifications.len())
                })
                .unwrap_or(0.0))
        })
        .await
    }
}
