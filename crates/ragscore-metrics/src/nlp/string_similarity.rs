// String similarity
//
// Edit-distance style similarity between response and reference, delegated
// to strsim: normalized Levenshtein, Jaro or Jaro-Winkler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use ragscore_core::metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
use ragscore_core::{MultiModelExecutor, Result, Sample, ScoreAggregator};

/// Which similarity to compute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringSimilarityVariant {
    #[default]
    Levenshtein,
    Jaro,
    JaroWinkler,
}

/// Configuration for [`StringSimilarity`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct StringSimilarityConfig {
    /// Restrict fan-out to these models; `None` uses all configured models
    pub model_ids: Option<Vec<String>>,
    pub aggregation: ScoreAggregator,
    pub variant: StringSimilarityVariant,
}

impl MetricConfig for StringSimilarityConfig {
    fn model_ids(&self) -> Option<&[String]> {
        self.model_ids.as_deref()
    }

    fn aggregation(&self) -> ScoreAggregator {
        self.aggregation
    }
}

/// Similarity of the response to the reference, in [0, 1]
pub fn string_similarity(response: &str, reference: &str, variant: StringSimilarityVariant) -> f64 {
    match variant {
        StringSimilarityVariant::Levenshtein => strsim::normalized_levenshtein(response, reference),
        StringSimilarityVariant::Jaro => strsim::jaro(response, reference),
        StringSimilarityVariant::JaroWinkler => strsim::jaro_winkler(response, reference),
    }
}

/// Edit-distance similarity between response and reference
#[derive(Clone)]
pub struct StringSimilarity {
    executor: Arc<MultiModelExecutor>,
}

impl StringSimilarity {
    pub fn new(executor: Arc<MultiModelExecutor>) -> Self {
        Self { executor }
    }

    pub async fn single_turn_score(
        &self,
        config: &StringSimilarityConfig,
        sample: &Sample,
    ) -> Result<f64> {
        self.score(config, sample).await
    }

    pub async fn single_turn_score_default(&self, sample: &Sample) -> Result<f64> {
        self.score(&StringSimilarityConfig::default(), sample).await
    }

    pub fn single_turn_score_async(
        &self,
        config: &StringSimilarityConfig,
        sample: &Sample,
    ) -> ScoreHandle {
        self.score_async(config, sample)
    }
}

#[async_trait]
impl MultiModelMetric for StringSimilarity {
    type Config = StringSimilarityConfig;

    fn name(&self) -> &'static str {
        "string_similarity"
    }

    fn executor(&self) -> &Arc<MultiModelExecutor> {
        &self.executor
    }

    fn planned_steps(&self, _config: &Self::Config, _sample: &Sample) -> usize {
        1
    }

    fn missing_input(&self, _config: &Self::Config, sample: &Sample) -> Option<&'static str> {
        if !sample.has_response() {
            Some("response")
        } else if !sample.has_reference() {
            Some("reference")
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
        let score = string_similarity(
            sample.response().unwrap_or_default(),
            sample.reference().unwrap_or_default(),
            config.variant,
        );
        eval.compute_step("ComputeStringSimilarity", |_| Ok(score))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_strings_score_one() {
        for variant in [
            StringSimilarityVariant::Levenshtein,
            StringSimilarityVariant::Jaro,
            StringSimilarityVariant::JaroWinkler,
        ] {
            assert!((string_similarity("same", "same", variant) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_jaro_transposition_value() {
        let score = string_similarity("martha", "marhta", StringSimilarityVariant::Jaro);
        assert!((score - 0.944_444).abs() < 1e-3);
    }

    #[test]
    fn test_jaro_winkler_rewards_common_prefix() {
        let jaro = string_similarity("martha", "marhta", StringSimilarityVariant::Jaro);
        let winkler = string_similarity("martha", "marhta", StringSimilarityVariant::JaroWinkler);
        assert!(winkler > jaro);
    }

    #[test]
    fn test_levenshtein_single_edit() {
        // one substitution over four characters
        let score = string_similarity("java", "lava", StringSimilarityVariant::Levenshtein);
        assert!((score - 0.75).abs() < 1e-9);
    }
}
