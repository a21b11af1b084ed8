// BLEU
//
// Modified n-gram precision with a brevity penalty. N-gram orders longer
// than the candidate are skipped; with smoothing enabled every precision is
// add-1 smoothed so a single missing order does not zero the score.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use ragscore_core::metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
use ragscore_core::{MultiModelExecutor, Result, Sample, ScoreAggregator};

use super::{clipped_overlap, ngram_counts, tokens};

/// Configuration for [`Bleu`]
#[derive(Debug, Clone, Serialize)]
pub struct BleuConfig {
    /// Restrict fan-out to these models; `None` uses all configured models
    pub model_ids: Option<Vec<String>>,
    pub aggregation: ScoreAggregator,
    /// Highest n-gram order
    pub max_ngram: usize,
    /// Add-1 smoothing of the modified precisions
    pub smoothing: bool,
}

impl Default for BleuConfig {
    fn default() -> Self {
        Self {
            model_ids: None,
            aggregation: ScoreAggregator::default(),
            max_ngram: 4,
            smoothing: false,
        }
    }
}

impl MetricConfig for BleuConfig {
    fn model_ids(&self) -> Option<&[String]> {
        self.model_ids.as_deref()
    }

    fn aggregation(&self) -> ScoreAggregator {
        self.aggregation
    }
}

/// BLEU of the response against the reference, in [0, 1]
pub fn bleu_score(response: &str, reference: &str, max_ngram: usize, smoothing: bool) -> f64 {
    let candidate = tokens(response);
    let reference = tokens(reference);
    if candidate.is_empty() || reference.is_empty() {
        return 0.0;
    }

    let highest = max_ngram.max(1).min(candidate.len());
    let mut log_sum = 0.0;
    for n in 1..=highest {
        let cand_counts = ngram_counts(&candidate, n);
        let ref_counts = ngram_counts(&reference, n);
        let total = candidate.len() + 1 - n;
        let clipped = clipped_overlap(&cand_counts, &ref_counts);

        let (numerator, denominator) = if smoothing {
            (clipped + 1, total + 1)
        } else {
            (clipped, total)
        };
        if numerator == 0 {
            return 0.0;
        }
        log_sum += (numerator as f64 / denominator as f64).ln();
    }
    let precision = (log_sum / highest as f64).exp();

    let brevity_penalty = if candidate.len() >= reference.len() {
        1.0
    } else {
        (1.0 - reference.len() as f64 / candidate.len() as f64).exp()
    };
    precision * brevity_penalty
}

/// Modified n-gram precision with brevity penalty
#[derive(Clone)]
pub struct Bleu {
    executor: Arc<MultiModelExecutor>,
}

impl Bleu {
    pub fn new(executor: Arc<MultiModelExecutor>) -> Self {
        Self { executor }
    }

    pub async fn single_turn_score(&self, config: &BleuConfig, sample: &Sample) -> Result<f64> {
        self.score(config, sample).await
    }

    pub async fn single_turn_score_default(&self, sample: &Sample) -> Result<f64> {
        self.score(&BleuConfig::default(), sample).await
    }

    pub fn single_turn_score_async(&self, config: &BleuConfig, sample: &Sample) -> ScoreHandle {
        self.score_async(config, sample)
    }
}

#[async_trait]
impl MultiModelMetric for Bleu {
    type Config = BleuConfig;

    fn name(&self) -> &'static str {
        "bleu"
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
        let score = bleu_score(
            sample.response().unwrap_or_default(),
            sample.reference().unwrap_or_default(),
            config.max_ngram,
            config.smoothing,
        );
        eval.compute_step("ComputeBleu", |_| Ok(score)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_sentences_score_one() {
        let text = "the quick brown fox jumps over the lazy dog";
        assert!((bleu_score(text, text, 4, false) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_sentences_score_zero() {
        assert_eq!(bleu_score("alpha beta gamma", "delta epsilon zeta", 4, false), 0.0);
    }

    #[test]
    fn test_partial_overlap_bigram_value() {
        // unigrams: 2/3, bigrams: 1/2, equal length so no brevity penalty
        let score = bleu_score("the cat sat", "the cat slept", 2, false);
        let expected = (2.0f64 / 3.0 * 0.5).sqrt();
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_brevity_penalty_penalizes_short_candidates() {
        let full = bleu_score("the cat sat on the mat", "the cat sat on the mat", 2, false);
        let short = bleu_score("the cat", "the cat sat on the mat", 2, false);
        assert!(short < full);
        // Matching prefix: precision is 1, so the whole score is the penalty
        let expected = (1.0f64 - 6.0 / 2.0).exp();
        assert!((short - expected).abs() < 1e-9);
    }

    #[test]
    fn test_smoothing_rescues_missing_orders() {
        let unsmoothed = bleu_score("the dog sat", "the cat sat", 3, false);
        let smoothed = bleu_score("the dog sat", "the cat sat", 3, true);
        assert_eq!(unsmoothed, 0.0);
        assert!(smoothed > 0.0);
    }

    #[test]
    fn test_empty_candidate_scores_zero() {
        assert_eq!(bleu_score("", "the cat", 4, false), 0.0);
        assert_eq!(bleu_score("the cat", "", 4, false), 0.0);
    }
}
