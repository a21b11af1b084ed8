// Noise Sensitivity
//
// How often does the response pick up wrong claims from the retrieved
// contexts? Reference and response are decomposed into statements, every
// statement is judged against every context, and response statements are
// verified against the reference. An error is a response statement the
// reference does not support that is nevertheless supported by a context of
// the chosen subset (relevant or irrelevant, depending on the mode). The
// score is errors over all response statements; lower is better.
//
// A context counts as relevant when it supports at least one reference
// statement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use ragscore_core::metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
use ragscore_core::prompt::render;
use ragscore_core::{MultiModelExecutor, Result, Sample, ScoreAggregator};

use crate::faithfulness::StatementsResponse;
use crate::text::{numbered_list, ratio};

const DECOMPOSE_PROMPT: &str = "\
Given a question and a text, break the text down into one or more fully \
understandable, atomic statements. Each statement must stand on its own.

Question:
{question}

Text:
{text}

Respond with JSON of the form {\"statements\": [\"...\"]}.";

const CONTEXT_VERDICTS_PROMPT: &str = "\
Judge which of the statements below can be directly inferred from the given \
context. Return verdict 1 for supported and 0 for unsupported, for every \
statement of both lists, in order.

Context:
{context}

Response statements:
{response_statements}

Reference statements:
{reference_statements}

Respond with JSON of the form \
{\"response_verdicts\": [{\"statement\": \"...\", \"verdict\": 0 or 1}], \
\"reference_verdicts\": [{\"statement\": \"...\", \"verdict\": 0 or 1}]}.";

const REFERENCE_CHECK_PROMPT: &str = "\
Judge which of the statements below agree with the reference answer. Return \
verdict 1 when the statement is supported by the reference and 0 when it is \
not, in order.

Reference answer:
{reference}

Statements:
{statements}

Respond with JSON of the form \
{\"verdicts\": [{\"statement\": \"...\", \"verdict\": 0 or 1}]}.";

/// Which context subset counts towards the error rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseSensitivityMode {
    /// Errors introduced by contexts judged relevant
    #[default]
    Relevant,
    /// Errors introduced by contexts judged irrelevant
    Irrelevant,
}

/// Configuration for [`NoiseSensitivity`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct NoiseSensitivityConfig {
    /// Restrict fan-out to these models; `None` uses all configured models
    pub model_ids: Option<Vec<String>>,
    pub aggregation: ScoreAggregator,
    pub mode: NoiseSensitivityMode,
}

impl MetricConfig for NoiseSensitivityConfig {
    fn model_ids(&self) -> Option<&[String]> {
        self.model_ids.as_deref()
    }

    fn aggregation(&self) -> ScoreAggregator {
        self.aggregation
    }
}

/// One 0/1 verdict on a statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryVerdict {
    pub statement: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub verdict: u8,
}

/// Response schema for the per-context step: verdicts for both lists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextVerdictsResponse {
    pub response_verdicts: Vec<BinaryVerdict>,
    pub reference_verdicts: Vec<BinaryVerdict>,
}

/// Response schema for the reference check step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceCheckResponse {
    pub verdicts: Vec<BinaryVerdict>,
}

/// Rate of wrong claims picked up from the chosen context subset
/// (lower is better)
#[derive(Clone)]
pub struct NoiseSensitivity {
    executor: Arc<MultiModelExecutor>,
}

impl NoiseSensitivity {
    pub fn new(executor: Arc<MultiModelExecutor>) -> Self {
        Self { executor }
    }

    pub async fn single_turn_score(
        &self,
        config: &NoiseSensitivityConfig,
        sample: &Sample,
    ) -> Result<f64> {
        self.score(config, sample).await
    }

    pub async fn single_turn_score_default(&self, sample: &Sample) -> Result<f64> {
        self.score(&NoiseSensitivityConfig::default(), sample).await
    }

    pub fn single_turn_score_async(
        &self,
        config: &NoiseSensitivityConfig,
        sample: &Sample,
    ) -> ScoreHandle {
        self.score_async(config, sample)
    }
}

#[async_trait]
impl MultiModelMetric for NoiseSensitivity {
    type Config = NoiseSensitivityConfig;

    fn name(&self) -> &'static str {
        "noise_sensitivity"
    }

    fn executor(&self) -> &Arc<MultiModelExecutor> {
        &self.executor
    }

    fn planned_steps(&self, _config: &Self::Config, sample: &Sample) -> usize {
        sample.retrieved_contexts().len() + 4
    }

    fn missing_input(&self, _config: &Self::Config, sample: &Sample) -> Option<&'static str> {
        if !sample.has_user_input() {
            Some("user_input")
        } else if !sample.has_response() {
            Some("response")
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
        config: &Self::Config,
        sample: &Sample,
    ) -> Result<HashMap<String, f64>> {
        eval.set_metadata("mode", json!(config.mode));
        let question = sample.user_input().unwrap_or_default();

        let reference_prompt = render(
            DECOMPOSE_PROMPT,
            &[
                ("question", question),
                ("text", sample.reference().unwrap_or_default()),
            ],
        );
        let reference_statements: HashMap<String, StatementsResponse> = eval
            .llm_step("DecomposeReferenceStatements", &reference_prompt)
            .await?;

        let response_prompt = render(
            DECOMPOSE_PROMPT,
            &[
                ("question", question),
                ("text", sample.response().unwrap_or_default()),
            ],
        );
        let response_statements: HashMap<String, StatementsResponse> = eval
            .llm_step("DecomposeResponseStatements", &response_prompt)
            .await?;

        // Per-context verdicts for both statement lists, per model
        let mut context_verdicts: Vec<HashMap<String, ContextVerdictsResponse>> = Vec::new();
        for (rank, context) in sample.retrieved_contexts().iter().enumerate() {
            let step_name = format!("EvaluateContext{}", rank + 1);
            let verdicts: HashMap<String, ContextVerdictsResponse> = eval
                .llm_step_per_model(&step_name, |model| {
                    let response_list = response_statements
                        .get(model)
                        .map(|s| numbered_list(&s.statements))
                        .unwrap_or_default();
                    let reference_list = reference_statements
                        .get(model)
                        .map(|s| numbered_list(&s.statements))
                        .unwrap_or_default();
                    render(
                        CONTEXT_VERDICTS_PROMPT,
                        &[
                            ("context", context.as_str()),
                            ("response_statements", response_list.as_str()),
                            ("reference_statements", reference_list.as_str()),
                        ],
                    )
                })
                .await?;
            context_verdicts.push(verdicts);
        }

        let reference_checks: HashMap<String, ReferenceCheckResponse> = eval
            .llm_step_per_model("VerifyAgainstReference", |model| {
                let statements = response_statements
                    .get(model)
                    .map(|s| numbered_list(&s.statements))
                    .unwrap_or_default();
                render(
                    REFERENCE_CHECK_PROMPT,
                    &[
                        ("reference", sample.reference().unwrap_or_default()),
                        ("statements", statements.as_str()),
                    ],
                )
            })
            .await?;

        let mode = config.mode;
        eval.compute_step("ComputeNoiseSensitivity", |model| {
            let statement_count = response_statements
                .get(model)
                .map(|s| s.statements.len())
                .unwrap_or(0);
            let correct: Vec<bool> = reference_checks
                .get(model)
                .map(|c| c.verdicts.iter().map(|v| v.verdict == 1).collect())
                .unwrap_or_default();

            // Which contexts belong to the chosen subset for this model
            let in_subset: Vec<bool> = context_verdicts
                .iter()
                .map(|per_model| {
                    let relevant = per_model
                        .get(model)
                        .map(|v| v.reference_verdicts.iter().any(|x| x.verdict == 1))
                        .unwrap_or(false);
                    match mode {
                        NoiseSensitivityMode::Relevant => relevant,
                        NoiseSensitivityMode::Irrelevant => !relevant,
                    }
                })
                .collect();

            let mut errors = 0usize;
            for index in 0..statement_count {
                let is_correct = correct.get(index).copied().unwrap_or(false);
                if is_correct {
                    continue;
                }
                let picked_up = context_verdicts.iter().zip(&in_subset).any(
                    |(per_model, in_subset)| {
                        *in_subset
                            && per_model
                                .get(model)
                                .and_then(|v| v.response_verdicts.get(index))
                                .map(|x| x.verdict == 1)
                                .unwrap_or(false)
                    },
                );
                if picked_up {
                    errors += 1;
                }
            }
            Ok(ratio(errors, statement_count))
        })
        .await
    }
}
