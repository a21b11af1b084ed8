// Context Entity Recall
//
// How many of the entities mentioned in the reference also occur in the
// retrieved contexts. Entities are extracted on both sides, normalized by
// trim + lowercase, and the score is |reference ∩ context| / |reference|.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ragscore_core::metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
use ragscore_core::prompt::render;
use ragscore_core::{MultiModelExecutor, Result, Sample, ScoreAggregator};

const EXTRACT_ENTITIES_PROMPT: &str = "\
Extract all named entities from the given text: people, organizations, \
locations, dates, products and other proper nouns.

Text:
{text}

Respond with JSON of the form {\"entities\": [\"...\"]}.";

/// Configuration for [`ContextEntityRecall`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextEntityRecallConfig {
    /// Restrict fan-out to these models; `None` uses all configured models
    pub model_ids: Option<Vec<String>>,
    pub aggregation: ScoreAggregator,
}

impl MetricConfig for ContextEntityRecallConfig {
    fn model_ids(&self) -> Option<&[String]> {
        self.model_ids.as_deref()
    }

    fn aggregation(&self) -> ScoreAggregator {
        self.aggregation
    }
}

/// Response schema for both extraction steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitiesResponse {
    pub entities: Vec<String>,
}

/// Normalize entities into a comparable set (trim + lowercase)
pub(crate) fn entity_set(entities: &[String]) -> HashSet<String> {
    entities
        .iter()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

/// Recall of reference entities within the retrieved contexts
#[derive(Clone)]
pub struct ContextEntityRecall {
    executor: Arc<MultiModelExecutor>,
}

impl ContextEntityRecall {
    pub fn new(executor: Arc<MultiModelExecutor>) -> Self {
        Self { executor }
    }

    pub async fn single_turn_score(
        &self,
        config: &ContextEntityRecallConfig,
        sample: &Sample,
    ) -> Result<f64> {
        self.score(config, sample).await
    }

    pub async fn single_turn_score_default(&self, sample: &Sample) -> Result<f64> {
        self.score(&ContextEntityRecallConfig::default(), sample)
            .await
    }

    pub fn single_turn_score_async(
        &self,
        config: &ContextEntityRecallConfig,
        sample: &Sample,
    ) -> ScoreHandle {
        self.score_async(config, sample)
    }
}

#[async_trait]
impl MultiModelMetric for ContextEntityRecall {
    type Config = ContextEntityRecallConfig;

    fn name(&self) -> &'static str {
        "context_entity_recall"
    }

    fn executor(&self) -> &Arc<MultiModelExecutor> {
        &self.executor
    }

    fn planned_steps(&self, _config: &Self::Config, _sample: &Sample) -> usize {
        3
    }

    fn missing_input(&self, _config: &Self::Config, sample: &Sample) -> Option<&'static str> {
        if !sample.has_reference() {
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
        let reference_prompt = render(
            EXTRACT_ENTITIES_PROMPT,
            &[("text", sample.reference().unwrap_or_default())],
        );
        let reference_entities: HashMap<String, EntitiesResponse> = eval
            .llm_step("ExtractReferenceEntities", &reference_prompt)
            .await?;

        // Only models that produced reference entities are still active here
        let context_prompt = render(
            EXTRACT_ENTITIES_PROMPT,
            &[("text", sample.joined_contexts().as_str())],
        );
        let context_entities: HashMap<String, EntitiesResponse> = eval
            .llm_step("ExtractContextEntities", &context_prompt)
            .await?;

        eval.compute_step("ComputeEntityRecall", |model| {
            let reference = reference_entities
                .get(model)
                .map(|r| entity_set(&r.entities))
                .unwrap_or_default();
            let context = context_entities
                .get(model)
                .map(|c| entity_set(&c.entities))
                .unwrap_or_default();
            if reference.is_empty() {
                return Ok(0.0);
            }
            let overlap = reference.intersection(&context).count();
            Ok(overlap as f64 / reference.len() as f64)
        })
        .await
    }
}
