// chrF
//
// Character n-gram F-score. Works on whitespace-stripped lowercase
// characters, averaging precision and recall over n-gram orders 1..=6 by
// default, then combining with beta = 2 (recall weighted double). Robust
// for morphologically rich languages where token-level overlap is brittle.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use ragscore_core::metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
use ragscore_core::{MultiModelExecutor, Result, Sample, ScoreAggregator};

/// Configuration for [`Chrf`]
#[derive(Debug, Clone, Serialize)]
pub struct ChrfConfig {
    /// Restrict fan-out to these models; `None` uses all configured models
    pub model_ids: Option<Vec<String>>,
    pub aggregation: ScoreAggregator,
    /// Highest character n-gram order
    pub max_char_ngram: usize,
    /// Recall weight in the F-score
    pub beta: f64,
}

impl Default for ChrfConfig {
    fn default() -> Self {
        Self {
            model_ids: None,
            aggregation: ScoreAggregator::default(),
            max_char_ngram: 6,
            beta: 2.0,
        }
    }
}

impl MetricConfig for ChrfConfig {
    fn model_ids(&self) -> Option<&[String]> {
        self.model_ids.as_deref()
    }

    fn aggregation(&self) -> ScoreAggregator {
        self.aggregation
    }
}

fn char_ngram_counts(chars: &[char], n: usize) -> HashMap<&[char], usize> {
    let mut counts = HashMap::new();
    if n == 0 || chars.len() < n {
        return counts;
    }
    for window in chars.windows(n) {
        *counts.entry(window).or_insert(0) += 1;
    }
    counts
}

/// chrF of the response against the reference, in [0, 1]
pub fn chrf_score(response: &str, reference: &str, max_char_ngram: usize, beta: f64) -> f64 {
    let candidate: Vec<char> = response
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let reference: Vec<char> = reference
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if candidate.is_empty() || reference.is_empty() {
        return 0.0;
    }

    let mut precisions = Vec::new();
    let mut recalls = Vec::new();
    for n in 1..=max_char_ngram.max(1) {
        if candidate.len() < n || reference.len() < n {
            break;
        }
        let cand_counts = char_ngram_counts(&candidate, n);
        let ref_counts = char_ngram_counts(&reference, n);
        let overlap: usize = cand_counts
            .iter()
            .map(|(gram, count)| (*count).min(ref_counts.get(gram).copied().unwrap_or(0)))
            .sum();
        let cand_total = candidate.len() + 1 - n;
        let ref_total = reference.len() + 1 - n;
        precisions.push(overlap as f64 / cand_total as f64);
        recalls.push(overlap as f64 / ref_total as f64);
    }
    if precisions.is_empty() {
        return 0.0;
    }

    let precision = precisions.iter().sum::<f64>() / precisions.len() as f64;
    let recall = recalls.iter().sum::<f64>() / recalls.len() as f64;
    let beta_sq = beta * beta;
    let denominator = beta_sq * precision + recall;
    if denominator == 0.0 {
        0.0
    } else {
        (1.0 + beta_sq) * precision * recall / denominator
    }
}

/// Character n-gram F-score against the reference
#[derive(Clone)]
pub struct Chrf {
    executor: Arc<MultiModelExecutor>,
}

impl Chrf {
    pub fn new(executor: Arc<MultiModelExecutor>) -> Self {
        Self { executor }
    }

    pub async fn single_turn_score(&self, config: &ChrfConfig, sample: &Sample) -> Result<f64> {
        self.score(config, sample).await
    }

    pub async fn single_turn_score_default(&self, sample: &Sample) -> Result<f64> {
        self.score(&ChrfConfig::default(), sample).await
    }

    pub fn single_turn_score_async(&self, config: &ChrfConfig, sample: &Sample) -> ScoreHandle {
        self.score_async(config, sample)
    }
}

#[async_trait]
impl MultiModelMetric for Chrf {
    type Config = ChrfConfig;

    fn name(&self) -> &'static str {
        "chrf"
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
        let score = chrf_score(
            sample.response().unwrap_or_default(),
            sample.reference().unwrap_or_default(),
            config.max_char_ngram,
            config.beta,
        );
        eval.compute_step("ComputeChrf", |_| Ok(score)).await
    }
}
