// Factual Correctness
//
// Compares the response against the reference claim by claim. Both texts are
// decomposed into claims; response claims are verified against the reference
// (precision) and reference claims against the response (recall) with NLI
// labels. Only SUPPORTED counts towards the numerator; the default mode
// combines both directions into an F1.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use ragscore_core::metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
use ragscore_core::prompt::render;
use ragscore_core::{MultiModelExecutor, Result, Sample, ScoreAggregator};

use crate::text::{numbered_list, ratio};

const DECOMPOSE_CLAIMS_PROMPT: &str = "\
Decompose the given text into standalone factual claims. Each claim must be \
verifiable on its own, without pronouns referring to other claims.

Text:
{text}

Respond with JSON of the form {\"claims\": [\"...\"]}.";

const VERIFY_CLAIMS_PROMPT: &str = "\
For each claim below, decide whether it is SUPPORTED, CONTRADICTED or \
NEUTRAL (neither supported nor contradicted) with respect to the premise.

Premise:
{premise}

Claims:
{claims}

Respond with JSON of the form \
{\"verdicts\": [{\"claim\": \"...\", \"reason\": \"...\", \"verdict\": \"SUPPORTED\" | \"CONTRADICTED\" | \"NEUTRAL\"}]}.";

/// Which direction(s) of the claim verification make up the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactualCorrectnessMode {
    /// Harmonic mean of precision and recall
    #[default]
    F1,
    /// Fraction of response claims supported by the reference
    Precision,
    /// Fraction of reference claims supported by the response
    Recall,
}

/// Configuration for [`FactualCorrectness`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct FactualCorrectnessConfig {
    /// Restrict fan-out to these models; `None` uses all configured models
    pub model_ids: Option<Vec<String>>,
    pub aggregation: ScoreAggregator,
    pub mode: FactualCorrectnessMode,
}

impl MetricConfig for FactualCorrectnessConfig {
    fn model_ids(&self) -> Option<&[String]> {
        self.model_ids.as_deref()
    }

    fn aggregation(&self) -> ScoreAggregator {
        self.aggregation
    }
}

/// Response schema for the claim decomposition steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimsResponse {
    pub claims: Vec<String>,
}

/// NLI label for one claim against a premise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NliLabel {
    Supported,
    Contradicted,
    Neutral,
}

/// One verified claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NliVerdict {
    pub claim: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub verdict: NliLabel,
}

/// Response schema for the verification steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NliResponse {
    pub verdicts: Vec<NliVerdict>,
}

fn supported_ratio(response: Option<&NliResponse>) -> f64 {
    response
        .map(|r| {
            let supported = r
                .verdicts
                .iter()
                .filter(|v| v.verdict == NliLabel::Supported)
                .count();
            ratio(supported, r.verdicts.len())
        })
        .unwrap_or(0.0)
}

/// Claim-level agreement between response and reference
#[derive(Clone)]
pub struct FactualCorrectness {
    executor: Arc<MultiModelExecutor>,
}

impl FactualCorrectness {
    pub fn new(executor: Arc<MultiModelExecutor>) -> Self {
        Self { executor }
    }

    pub async fn single_turn_score(
        &self,
        config: &FactualCorrectnessConfig,
        sample: &Sample,
    ) -> Result<f64> {
        self.score(config, sample).await
    }

    pub async fn single_turn_score_default(&self, sample: &Sample) -> Result<f64> {
        self.score(&FactualCorrectnessConfig::default(), sample)
            .await
    }

    pub fn single_turn_score_async(
        &self,
        config: &FactualCorrectnessConfig,
        sample: &Sample,
    ) -> ScoreHandle {
        self.score_async(config, sample)
    }
}

#[async_trait]
impl MultiModelMetric for FactualCorrectness {
    type Config = FactualCorrectnessConfig;

    fn name(&self) -> &'static str {
        "factual_correctness"
    }

    fn executor(&self) -> &Arc<MultiModelExecutor> {
        &self.executor
    }

    fn planned_steps(&self, config: &Self::Config, _sample: &Sample) -> usize {
        match config.mode {
            FactualCorrectnessMode::F1 => 5,
            FactualCorrectnessMode::Precision | FactualCorrectnessMode::Recall => 3,
        }
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
        let response = sample.response().unwrap_or_default();
        let reference = sample.reference().unwrap_or_default();
        let needs_precision = config.mode != FactualCorrectnessMode::Recall;
        let needs_recall = config.mode != FactualCorrectnessMode::Precision;

        let response_claims: Option<HashMap<String, ClaimsResponse>> = if needs_precision {
            let prompt = render(DECOMPOSE_CLAIMS_PROMPT, &[("text", response)]);
            Some(eval.llm_step("DecomposeResponseClaims", &prompt).await?)
        } else {
            None
        };

        let reference_claims: Option<HashMap<String, ClaimsResponse>> = if needs_recall {
            let prompt = render(DECOMPOSE_CLAIMS_PROMPT, &[("text", reference)]);
            Some(eval.llm_step("DecomposeReferenceClaims", &prompt).await?)
        } else {
            None
        };

        // Response claims against the reference → precision
        let precision_verdicts: Option<HashMap<String, NliResponse>> =
            if let Some(claims) = &response_claims {
                Some(
                    eval.llm_step_per_model("VerifyResponseClaims", |model| {
                        let list = claims
                            .get(model)
                            .map(|c| numbered_list(&c.claims))
                            .unwrap_or_default();
                        render(
                            VERIFY_CLAIMS_PROMPT,
                            &[("premise", reference), ("claims", list.as_str())],
                        )
                    })
                    .await?,
                )
            } else {
                None
            };

        // Reference claims against the response → recall
        let recall_verdicts: Option<HashMap<String, NliResponse>> =
            if let Some(claims) = &reference_claims {
                Some(
                    eval.llm_step_per_model("VerifyReferenceClaims", |model| {
                        let list = claims
                            .get(model)
                            .map(|c| numbered_list(&c.claims))
                            .unwrap_or_default();
                        render(
                            VERIFY_CLAIMS_PROMPT,
                            &[("premise", response), ("claims", list.as_str())],
                        )
                    })
                    .await?,
                )
            } else {
                None
            };

        let mode = config.mode;
        eval.compute_step("ComputeFactualCorrectness", |model| {
            let precision = precision_verdicts
                .as_ref()
                .map(|v| supported_ratio(v.get(model)));
            let recall = recall_verdicts
                .as_ref()
                .map(|v| supported_ratio(v.get(model)));
            Ok(match mode {
                FactualCorrectnessMode::Precision => precision.unwrap_or(0.0),
                FactualCorrectnessMode::Recall => recall.unwrap_or(0.0),
                FactualCorrectnessMode::F1 => {
                    let p = precision.unwrap_or(0.0);
                    let r = recall.unwrap_or(0.0);
                    if p + r == 0.0 {
                        0.0
                    } else {
                        2.0 * p * r / (p + r)
                    }
                }
            })
        })
        .await
    }
}
