// ROUGE
//
// Recall-oriented n-gram overlap. Supports ROUGE-1, ROUGE-2 and ROUGE-L
// (longest common subsequence), each as precision, recall or F1.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use ragscore_core::metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
use ragscore_core::{MultiModelExecutor, Result, Sample, ScoreAggregator};

use super::{clipped_overlap, ngram_counts, tokens};

/// Which ROUGE flavour to compute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RougeVariant {
    #[default]
    Rouge1,
    Rouge2,
    RougeL,
}

/// Which side of the overlap to report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RougeMeasure {
    Precision,
    Recall,
    #[default]
    F1,
}

/// Configuration for [`Rouge`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct RougeConfig {
    /// Restrict fan-out to these models; `None` uses all configured models
    pub model_ids: Option<Vec<String>>,
    pub aggregation: ScoreAggregator,
    pub variant: RougeVariant,
    pub measure: RougeMeasure,
}

impl MetricConfig for RougeConfig {
    fn model_ids(&self) -> Option<&[String]> {
        self.model_ids.as_deref()
    }

    fn aggregation(&self) -> ScoreAggregator {
        self.aggregation
    }
}

fn lcs_length(a: &[String], b: &[String]) -> usize {
    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            current[j + 1] = if x == y {
                previous[j] + 1
            } else {
                previous[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

fn measure_of(matches: f64, candidate_total: f64, reference_total: f64, measure: RougeMeasure) -> f64 {
    let precision = if candidate_total > 0.0 {
        matches / candidate_total
    } else {
        0.0
    };
    let recall = if reference_total > 0.0 {
        matches / reference_total
    } else {
        0.0
    };
    match measure {
        RougeMeasure::Precision => precision,
        RougeMeasure::Recall => recall,
        RougeMeasure::F1 => {
            if precision + recall == 0.0 {
                0.0
            } else {
                2.0 * precision * recall / (precision + recall)
            }
        }
    }
}

/// ROUGE of the response against the reference, in [0, 1]
pub fn rouge_score(
    response: &str,
    reference: &str,
    variant: RougeVariant,
    measure: RougeMeasure,
) -> f64 {
    let candidate = tokens(response);
    let reference = tokens(reference);
    if candidate.is_empty() || reference.is_empty() {
        return 0.0;
    }

    match variant {
        RougeVariant::Rouge1 | RougeVariant::Rouge2 => {
            let n = if variant == RougeVariant::Rouge1 { 1 } else { 2 };
            let cand_counts = ngram_counts(&candidate, n);
            let ref_counts = ngram_counts(&reference, n);
            let matches = clipped_overlap(&cand_counts, &ref_counts) as f64;
            let cand_total = cand_counts.values().sum::<usize>() as f64;
            let ref_total = ref_counts.values().sum::<usize>() as f64;
            measure_of(matches, cand_total, ref_total, measure)
        }
        RougeVariant::RougeL => {
            let lcs = lcs_length(&candidate, &reference) as f64;
            measure_of(lcs, candidate.len() as f64, reference.len() as f64, measure)
        }
    }
}

/// N-gram and longest-common-subsequence overlap with the reference
#[derive(Clone)]
pub struct Rouge {
    executor: Arc<MultiModelExecutor>,
}

impl Rouge {
    pub fn new(executor: Arc<MultiModelExecutor>) -> Self {
        Self { executor }
    }

    pub async fn single_turn_score(&self, config: &RougeConfig, sample: &Sample) -> Result<f64> {
        self.score(config, sample).await
    }

    pub async fn single_turn_score_default(&self, sample: &Sample) -> Result<f64> {
        self.score(&RougeConfig::default(), sample).await
    }

    pub fn single_turn_score_async(&self, config: &RougeConfig, sample: &Sample) -> ScoreHandle {
        self.score_async(config, sample)
    }
}

#[async_trait]
impl MultiModelMetric for Rouge {
    type Config = RougeConfig;

    fn name(&self) -> &'static str {
        "rouge"
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
        let score = rouge_score(
            sample.response().unwrap_or_default(),
            sample.reference().unwrap_or_default(),
            config.variant,
            config.measure,
        );
        eval.compute_step("ComputeRouge", |_| Ok(score)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_sentences_score_one() {
        let text = "the cat sat on the mat";
        for variant in [RougeVariant::Rouge1, RougeVariant::Rouge2, RougeVariant::RougeL] {
            let score = rouge_score(text, text, variant, RougeMeasure::F1);
            assert!((score - 1.0).abs() < 1e-9, "{variant:?}");
        }
    }

    #[test]
    fn test_rouge1_partial_overlap() {
        // matches: the×2, cat, on, mat = 5 of 6 unigrams on both sides
        let score = rouge_score(
            "the cat sat on the mat",
            "the cat lay on the mat",
            RougeVariant::Rouge1,
            RougeMeasure::F1,
        );
        assert!((score - 5.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_rouge_l_subsequence() {
        // LCS of "a b c d" and "a x b d" is "a b d" = 3
        let score = rouge_score("a b c d", "a x b d", RougeVariant::RougeL, RougeMeasure::Recall);
        assert!((score - 3.0 / 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_sentences_score_zero() {
        let score = rouge_score("alpha beta", "gamma delta", RougeVariant::Rouge1, RougeMeasure::F1);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_precision_and_recall_differ_on_length() {
        let precision = rouge_score("the cat", "the cat sat", RougeVariant::Rouge1, RougeMeasure::Precision);
        let recall = rouge_score("the cat", "the cat sat", RougeVariant::Rouge1, RougeMeasure::Recall);
        assert!((precision - 1.0).abs() < 1e-9);
        assert!((recall - 2.0 / 3.0).abs() < 1e-9);
    }
}
