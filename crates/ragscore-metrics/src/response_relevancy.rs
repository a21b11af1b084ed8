// Response Relevancy
//
// Does the response actually address the question? Each model generates
// hypothetical questions the response would answer; the score is the mean
// cosine similarity between the embedded user input and those questions.
//
// Caveat: a single question flagged noncommittal ("I don't know" style
// answers) zeroes that model's score, which makes the metric sensitive to
// generation randomness.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use ragscore_core::metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
use ragscore_core::prompt::render;
use ragscore_core::{EvalError, ModelResult, MultiModelExecutor, Result, Sample, ScoreAggregator, StepType};

const GENERATE_QUESTIONS_PROMPT: &str = "\
Generate exactly {count} questions that the given answer would directly \
respond to. For each question also flag whether the answer is noncommittal \
(evasive, vague or refusing, e.g. \"I don't know\"): 1 for noncommittal, 0 \
otherwise.

Answer:
{answer}

Respond with JSON of the form \
{\"questions\": [{\"question\": \"...\", \"noncommittal\": 0 or 1}]}.";

/// Configuration for [`ResponseRelevancy`]
#[derive(Debug, Clone, Serialize)]
pub struct ResponseRelevancyConfig {
    /// Restrict fan-out to these models; `None` uses all configured models
    pub model_ids: Option<Vec<String>>,
    pub aggregation: ScoreAggregator,
    /// How many hypothetical questions each model generates
    pub question_count: usize,
    /// Embedding model to use; `None` uses the store default
    pub embedding_model_id: Option<String>,
}

impl Default for ResponseRelevancyConfig {
    fn default() -> Self {
        Self {
            model_ids: None,
            aggregation: ScoreAggregator::default(),
            question_count: 3,
            embedding_model_id: None,
        }
    }
}

impl MetricConfig for ResponseRelevancyConfig {
    fn model_ids(&self) -> Option<&[String]> {
        self.model_ids.as_deref()
    }

    fn aggregation(&self) -> ScoreAggregator {
        self.aggregation
    }
}

/// One generated question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub question: String,
    /// 1 when the answer was evasive for this question, else 0
    pub noncommittal: u8,
}

/// Response schema for the question generation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionsResponse {
    pub questions: Vec<GeneratedQuestion>,
}

/// Cosine similarity; 0.0 when either vector is zero (or lengths differ)
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

/// Mean cosine similarity between the question and what the response answers
#[derive(Clone)]
pub struct ResponseRelevancy {
    executor: Arc<MultiModelExecutor>,
}

impl ResponseRelevancy {
    pub fn new(executor: Arc<MultiModelExecutor>) -> Self {
        Self { executor }
    }

    pub async fn single_turn_score(
        &self,
        config: &ResponseRelevancyConfig,
        sample: &Sample,
    ) -> Result<f64> {
        self.score(config, sample).await
    }

    pub async fn single_turn_score_default(&self, sample: &Sample) -> Result<f64> {
        self.score(&ResponseRelevancyConfig::default(), sample).await
    }

    pub fn single_turn_score_async(
        &self,
        config: &ResponseRelevancyConfig,
        sample: &Sample,
    ) -> ScoreHandle {
        self.score_async(config, sample)
    }
}

#[async_trait]
impl MultiModelMetric for ResponseRelevancy {
    type Config = ResponseRelevancyConfig;

    fn name(&self) -> &'static str {
        "response_relevancy"
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
            GENERATE_QUESTIONS_PROMPT,
            &[
                ("count", config.question_count.to_string().as_str()),
                ("answer", sample.response().unwrap_or_default()),
            ],
        );
        let questions: HashMap<String, QuestionsResponse> =
            eval.llm_step("GenerateQuestions", &prompt).await?;

        let executor = eval.executor();
        let cancel = eval.cancel_token();
        let embedding_model = config
            .embedding_model_id
            .clone()
            .unwrap_or_else(|| executor.embedding_store().default_model_id().to_string());
        let user_input = sample.user_input().unwrap_or_default().to_string();

        // The user input is embedded once and shared by every model's future
        let input_embedding = {
            let executor = executor.clone();
            let cancel = cancel.clone();
            let embedding_model = embedding_model.clone();
            async move {
                executor
                    .execute_embedding_on_model_with(&embedding_model, &user_input, &cancel)
                    .await
            }
        }
        .boxed()
        .shared();

        let questions = Arc::new(questions);
        eval.model_step("ComputeCosineSimilarity", StepType::Embedding, None, {
            let questions = questions.clone();
            move |model| {
                let executor = executor.clone();
                let cancel = cancel.clone();
                let embedding_model = embedding_model.clone();
                let input_embedding = input_embedding.clone();
                let questions = questions.clone();
                let request = format!("embedding via {embedding_model}");
                async move {
                    let started = Instant::now();
                    let input = input_embedding.await;
                    let Some(input_vector) = input.result().cloned() else {
                        let cause = input
                            .error()
                            .cloned()
                            .unwrap_or_else(|| {
                                Arc::new(EvalError::embedding(
                                    "user input embedding unavailable",
                                ))
                            });
                        return ModelResult::failure_shared(
                            model,
                            request,
                            started.elapsed(),
                            cause,
                        );
                    };

                    let generated = match questions.get(&model) {
                        Some(generated) => generated.clone(),
                        None => {
                            return ModelResult::failure(
                                model,
                                request,
                                started.elapsed(),
                                EvalError::model("no generated questions"),
                            )
                        }
                    };

                    if generated.questions.iter().any(|q| q.noncommittal == 1) {
                        return ModelResult::success(model, request, started.elapsed(), 0.0);
                    }
                    if generated.questions.is_empty() {
                        return ModelResult::success(model, request, started.elapsed(), 0.0);
                    }

                    let mut total = 0.0;
                    for question in &generated.questions {
                        let embedded = executor
                            .execute_embedding_on_model_with(
                                &embedding_model,
                                &question.question,
                                &cancel,
                            )
                            .await;
                        match embedded.result() {
                            Some(vector) => total += cosine_similarity(&input_vector, vector),
                            None => {
                                let cause = embedded.error().cloned().unwrap_or_else(|| {
                                    Arc::new(EvalError::embedding(
                                        "question embedding unavailable",
                                    ))
                                });
                                return ModelResult::failure_shared(
                                    model,
                                    request,
                                    started.elapsed(),
                                    cause,
                                );
                            }
                        }
                    }
                    let score = total / generated.questions.len() as f64;
                    ModelResult::success(model, request, started.elapsed(), score)
                }
                .boxed()
            }
        })
        .await
    }
}
