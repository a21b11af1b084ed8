// Aspect Critic
//
// Binary judgement of the response against a free-form aspect definition
// ("Is the submission harmful?", "Does the answer contain code?"). With
// strictness > 1 each model votes that many times independently and the
// majority wins.

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use ragscore_core::metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
use ragscore_core::prompt::render;
use ragscore_core::{EvalError, ModelResult, MultiModelExecutor, Result, Sample, ScoreAggregator, StepType};

const EVALUATE_ASPECT_PROMPT: &str = "\
Judge the submission using the given criteria, answering with verdict 1 for \
yes and 0 for no.

Criteria ({name}):
{definition}

Question:
{question}

Submission:
{answer}

Respond with JSON of the form {\"reason\": \"...\", \"verdict\": 0 or 1}.";

/// Configuration for [`AspectCritic`]
#[derive(Debug, Clone, Serialize)]
pub struct AspectCriticConfig {
    /// Restrict fan-out to these models; `None` uses all configured models
    pub model_ids: Option<Vec<String>>,
    pub aggregation: ScoreAggregator,
    /// Short name of the aspect, e.g. "harmfulness"
    pub name: String,
    /// What the judge should check, in plain language
    pub definition: String,
    /// Number of independent votes per model; the majority wins
    pub strictness: usize,
}

impl AspectCriticConfig {
    pub fn new(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            model_ids: None,
            aggregation: ScoreAggregator::default(),
            name: name.into(),
            definition: definition.into(),
            strictness: 1,
        }
    }

    pub fn with_strictness(mut self, strictness: usize) -> Self {
        self.strictness = strictness.max(1);
        self
    }
}

impl MetricConfig for AspectCriticConfig {
    fn model_ids(&self) -> Option<&[String]> {
        self.model_ids.as_deref()
    }

    fn aggregation(&self) -> ScoreAggregator {
        self.aggregation
    }
}

/// Response schema for the judgement step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticResponse {
    #[serde(default)]
    pub reason: Option<String>,
    /// 1 when the submission meets the criteria, else 0
    pub verdict: u8,
}

/// Binary criteria judgement with optional majority voting
#[derive(Clone)]
pub struct AspectCritic {
    executor: Arc<MultiModelExecutor>,
}

impl AspectCritic {
    pub fn new(executor: Arc<MultiModelExecutor>) -> Self {
        Self { executor }
    }

    pub async fn single_turn_score(
        &self,
        config: &AspectCriticConfig,
        sample: &Sample,
    ) -> Result<f64> {
        self.score(config, sample).await
    }

    pub fn single_turn_score_async(
        &self,
        config: &AspectCriticConfig,
        sample: &Sample,
    ) -> ScoreHandle {
        self.score_async(config, sample)
    }
}

#[async_trait]
impl MultiModelMetric for AspectCritic {
    type Config = AspectCriticConfig;

    fn name(&self) -> &'static str {
        "aspect_critic"
    }

    fn executor(&self) -> &Arc<MultiModelExecutor> {
        &self.executor
    }

    fn planned_steps(&self, _config: &Self::Config, _sample: &Sample) -> usize {
        1
    }

    fn missing_input(&self, _config: &Self::Config, sample: &Sample) -> Option<&'static str> {
        if !sample.has_user_input() {
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
        let prompt = render(
            EVALUATE_ASPECT_PROMPT,
            &[
                ("name", config.name.as_str()),
                ("definition", config.definition.as_str()),
                ("question", sample.user_input().unwrap_or_default()),
                ("answer", sample.response().unwrap_or_default()),
            ],
        );

        let executor = eval.executor();
        let cancel = eval.cancel_token();
        let votes = config.strictness.max(1);
        let prompt_for_step = prompt.clone();

        eval.model_step(
            "EvaluateAspect",
            StepType::Llm,
            Some(prompt_for_step),
            move |model| {
                let executor = executor.clone();
                let cancel = cancel.clone();
                let prompt = prompt.clone();
                async move {
                    let started = Instant::now();
                    let calls = (0..votes).map(|_| {
                        executor.execute_llm_on_model_with::<CriticResponse>(
                            &model, &prompt, &cancel,
                        )
                    });
                    let results = join_all(calls).await;

                    let verdicts: Vec<u8> = results
                        .iter()
                        .filter_map(|r| r.result().map(|v| v.verdict))
                        .collect();
                    if verdicts.is_empty() {
                        let cause = results
                            .into_iter()
                            .find_map(|r| r.error().cloned())
                            .unwrap_or_else(|| {
                                Arc::new(EvalError::model("no votes returned"))
                            });
                        return ModelResult::failure_shared(
                            model,
                            prompt,
                            started.elapsed(),
                            cause,
                        );
                    }

                    let passed = verdicts.iter().filter(|v| **v == 1).count();
                    let score = if passed * 2 > verdicts.len() { 1.0 } else { 0.0 };
                    ModelResult::success(model, prompt, started.elapsed(), score)
                }
                .boxed()
            },
        )
        .await
    }
}
