// Metric protocol
//
// The shared contract every metric implements: pick the effective model set,
// frame the run with begin/end events through a per-evaluation notifier,
// drive an ordered pipeline of steps in which failing models drop out, and
// fold the surviving per-model scores with the configured aggregator.
//
// A step with zero survivors is fatal; missing required inputs are not (they
// score 0.0 with a warning, still emitting the begin/end envelopes).

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aggregate::ScoreAggregator;
use crate::error::{EvalError, Result};
use crate::events::{
    MetricEvaluationContext, MetricEvaluationResult, ModelExclusionEvent, ModelResult, StepResults,
    StepType,
};
use crate::executor::MultiModelExecutor;
use crate::listener::EvaluationNotifier;
use crate::sample::Sample;

/// Common surface of every metric config: an optional fan-out restriction
/// and the aggregation strategy.
pub trait MetricConfig: Serialize + Send + Sync {
    /// Restrict fan-out to these models; `None` means all configured models
    fn model_ids(&self) -> Option<&[String]>;

    /// How per-model scores fold into the final score
    fn aggregation(&self) -> ScoreAggregator;
}

/// Cancellable handle for an evaluation scheduled on the worker pool.
///
/// Dropping the handle detaches: the evaluation runs to completion in the
/// background.
pub struct ScoreHandle {
    join: JoinHandle<Result<f64>>,
    cancel: CancellationToken,
}

impl ScoreHandle {
    /// Request cancellation: no new model calls start, in-flight rate-limit
    /// waits are interrupted, and the evaluation still emits its end event.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the final score
    pub async fn join(self) -> Result<f64> {
        match self.join.await {
            Ok(result) => result,
            Err(err) => Err(EvalError::Internal(anyhow::anyhow!(
                "evaluation task failed: {err}"
            ))),
        }
    }
}

/// Per-evaluation pipeline driver.
///
/// Owns the notifier, the active model set and the accumulating envelope.
/// Created by the metric framing; metrics only call the step primitives.
pub struct Evaluation {
    executor: Arc<MultiModelExecutor>,
    notifier: EvaluationNotifier,
    metric_name: String,
    context: MetricEvaluationContext,
    active: Vec<String>,
    steps: Vec<StepResults>,
    exclusions: Vec<ModelExclusionEvent>,
    metadata: HashMap<String, Value>,
    total_steps: usize,
    started: Instant,
    cancel: CancellationToken,
}

impl Evaluation {
    pub fn new(
        executor: Arc<MultiModelExecutor>,
        metric_name: &str,
        sample: &Sample,
        config: Value,
        model_ids: Vec<String>,
        total_steps: usize,
        cancel: CancellationToken,
    ) -> Self {
        let notifier = EvaluationNotifier::new(executor.listener_snapshot());
        let context =
            MetricEvaluationContext::new(metric_name, sample.clone(), config, model_ids.clone());
        notifier.before_metric_evaluation(&context);

        Self {
            executor,
            notifier,
            metric_name: metric_name.to_string(),
            context,
            active: model_ids,
            steps: Vec::new(),
            exclusions: Vec::new(),
            metadata: HashMap::new(),
            total_steps,
            started: Instant::now(),
            cancel,
        }
    }

    pub fn executor(&self) -> Arc<MultiModelExecutor> {
        self.executor.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Models still in the pipeline
    pub fn active_models(&self) -> &[String] {
        &self.active
    }

    /// Attach a metadata entry to the end envelope
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// One LLM step with a common prompt for every active model.
    ///
    /// Models that fail are excluded from later steps; zero survivors is
    /// fatal.
    pub async fn llm_step<T>(&mut self, name: &str, prompt: &str) -> Result<HashMap<String, T>>
    where
        T: DeserializeOwned + Serialize + Send + 'static,
    {
        let executor = self.executor.clone();
        let cancel = self.cancel.clone();
        let prompt_owned = prompt.to_string();
        self.model_step(name, StepType::Llm, Some(prompt.to_string()), move |model| {
            let executor = executor.clone();
            let cancel = cancel.clone();
            let prompt = prompt_owned.clone();
            async move {
                executor
                    .execute_llm_on_model_with::<T>(&model, &prompt, &cancel)
                    .await
            }
            .boxed()
        })
        .await
    }

    /// One LLM step whose prompt differs per model (e.g. it embeds that
    /// model's output from an earlier step).
    pub async fn llm_step_per_model<T>(
        &mut self,
        name: &str,
        prompt_for: impl Fn(&str) -> String,
    ) -> Result<HashMap<String, T>>
    where
        T: DeserializeOwned + Serialize + Send + 'static,
    {
        let prompts: HashMap<String, String> = self
            .active
            .iter()
            .map(|model| (model.clone(), prompt_for(model)))
            .collect();
        let executor = self.executor.clone();
        let cancel = self.cancel.clone();
        self.model_step(name, StepType::Llm, None, move |model| {
            let executor = executor.clone();
            let cancel = cancel.clone();
            let prompt = prompts.get(&model).cloned().unwrap_or_default();
            async move {
                executor
                    .execute_llm_on_model_with::<T>(&model, &prompt, &cancel)
                    .await
            }
            .boxed()
        })
        .await
    }

    /// Like [`llm_step`](Self::llm_step), but failing models stay in the
    /// pipeline: their entry is `None` and no exclusion is recorded. Used
    /// where a failed judgement is counted as a negative vote instead of
    /// dropping the model.
    pub async fn llm_step_lenient<T>(
        &mut self,
        name: &str,
        prompt: &str,
    ) -> Result<HashMap<String, Option<T>>>
    where
        T: DeserializeOwned + Serialize + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        let executor = self.executor.clone();
        let cancel = self.cancel.clone();

        let index = self.steps.len();
        self.notifier.before_step(name, index, self.total_steps);

        let calls = self.active.iter().map(|model| {
            executor.execute_llm_on_model_with::<T>(model, prompt, &cancel)
        });
        let results: Vec<ModelResult<T>> = join_all(calls).await;

        let step = StepResults {
            step_name: name.to_string(),
            step_index: index,
            total_steps: self.total_steps,
            step_type: StepType::Llm,
            request: Some(prompt.to_string()),
            results: results.iter().map(ModelResult::recorded).collect(),
        };
        self.notifier.after_llm_step(&step);
        self.steps.push(step);

        Ok(results
            .into_iter()
            .map(|result| (result.model_id().to_string(), result.into_result()))
            .collect())
    }

    /// One pure compute step over the active models
    pub async fn compute_step<T, F>(&mut self, name: &str, f: F) -> Result<HashMap<String, T>>
    where
        T: Serialize + Send + 'static,
        F: Fn(&str) -> Result<T>,
    {
        if self.cancel.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        let index = self.steps.len();
        self.notifier.before_step(name, index, self.total_steps);

        let results = self.executor.execute_compute(&self.active, f)?;
        self.absorb(name, StepType::Compute, None, index, results)
    }

    /// Generic step primitive: one per-model async closure, run concurrently
    /// over the active models in order, with the standard exclusion
    /// bookkeeping. LLM and embedding steps that need custom per-model work
    /// (shared sub-calls, voting) build on this.
    pub async fn model_step<T, F>(
        &mut self,
        name: &str,
        step_type: StepType,
        request: Option<String>,
        f: F,
    ) -> Result<HashMap<String, T>>
    where
        T: Serialize + Send + 'static,
        F: Fn(String) -> BoxFuture<'static, ModelResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        let index = self.steps.len();
        self.notifier.before_step(name, index, self.total_steps);

        let calls: Vec<_> = self.active.iter().cloned().map(&f).collect();
        let results: Vec<ModelResult<T>> = join_all(calls).await;
        self.absorb(name, step_type, request, index, results)
    }

    fn absorb<T: Serialize>(
        &mut self,
        name: &str,
        step_type: StepType,
        request: Option<String>,
        index: usize,
        results: Vec<ModelResult<T>>,
    ) -> Result<HashMap<String, T>> {
        let step = StepResults {
            step_name: name.to_string(),
            step_index: index,
            total_steps: self.total_steps,
            step_type,
            request,
            results: results.iter().map(ModelResult::recorded).collect(),
        };
        match step_type {
            StepType::Compute => self.notifier.after_compute_step(&step),
            StepType::Llm | StepType::Embedding => self.notifier.after_llm_step(&step),
        }
        self.steps.push(step);

        let mut survivors = HashMap::new();
        for result in results {
            let model_id = result.model_id().to_string();
            if let Some(error) = result.error().cloned() {
                debug!(
                    metric = %self.metric_name,
                    model_id = %model_id,
                    step = name,
                    error = %error,
                    "model excluded from remaining steps"
                );
                let event = ModelExclusionEvent {
                    model_id: model_id.clone(),
                    failed_step_name: name.to_string(),
                    failed_step_index: index,
                    cause: error,
                };
                self.notifier.on_model_excluded(&event);
                self.exclusions.push(event);
                self.active.retain(|m| m != &model_id);
            } else if let Some(value) = result.into_result() {
                survivors.insert(model_id, value);
            }
        }

        if survivors.is_empty() {
            if self.cancel.is_cancelled() {
                return Err(EvalError::Cancelled);
            }
            return Err(EvalError::AllModelsFailed {
                step_name: name.to_string(),
                metric_name: self.metric_name.clone(),
            });
        }
        Ok(survivors)
    }

    /// Emit the end envelope for a scored run
    pub fn finish(self, aggregated: f64, model_scores: HashMap<String, f64>) {
        let (notifier, result) = self.into_result(Some(aggregated), model_scores, None);
        notifier.after_metric_evaluation(&result);
    }

    /// Emit the end envelope for a run that ended in a fatal error
    pub fn finish_error(self, error: &EvalError) {
        let message = error.to_string();
        let (notifier, result) = self.into_result(None, HashMap::new(), Some(message));
        notifier.after_metric_evaluation(&result);
    }

    /// Emit the end envelope for a missing-required-input short circuit
    pub fn finish_missing_input(self, field: &str) {
        let message = format!("required input '{field}' is missing or blank");
        let (notifier, result) = self.into_result(Some(0.0), HashMap::new(), Some(message));
        notifier.after_metric_evaluation(&result);
    }

    fn into_result(
        self,
        aggregated_score: Option<f64>,
        model_scores: HashMap<String, f64>,
        error: Option<String>,
    ) -> (EvaluationNotifier, MetricEvaluationResult) {
        let excluded_models = self
            .exclusions
            .iter()
            .map(|e| e.model_id.clone())
            .collect();
        let result = MetricEvaluationResult {
            evaluation_id: self.context.evaluation_id,
            metric_name: self.context.metric_name,
            sample: self.context.sample,
            config: self.context.config,
            model_ids: self.context.model_ids,
            aggregated_score,
            model_scores,
            excluded_models,
            total_duration: self.started.elapsed(),
            steps: self.steps,
            exclusions: self.exclusions,
            metadata: self.metadata,
            error,
        };
        (self.notifier, result)
    }
}

/// The shared contract of every metric in the library.
///
/// A metric declares its name, its pipeline length, its required sample
/// fields and the pipeline itself; the provided methods supply the framing:
/// model selection, begin/end events, missing-input short circuit,
/// aggregation and async scheduling.
#[async_trait::async_trait]
pub trait MultiModelMetric: Clone + Send + Sync + 'static {
    type Config: MetricConfig + Clone + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn executor(&self) -> &Arc<MultiModelExecutor>;

    /// Number of steps the pipeline will run for this config and sample
    fn planned_steps(&self, config: &Self::Config, sample: &Sample) -> usize;

    /// First required sample field that is missing or blank, if any
    fn missing_input(&self, config: &Self::Config, sample: &Sample) -> Option<&'static str>;

    /// The metric's pipeline: drive steps on the evaluation and return the
    /// per-model scores of the survivors.
    async fn run_pipeline(
        &self,
        eval: &mut Evaluation,
        config: &Self::Config,
        sample: &Sample,
    ) -> Result<HashMap<String, f64>>;

    /// Models this run fans out to: the config override or every configured
    /// chat model.
    fn effective_models(&self, config: &Self::Config) -> Vec<String> {
        config
            .model_ids()
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| self.executor().chat_model_ids())
    }

    /// Evaluate and block until the final score
    async fn score(&self, config: &Self::Config, sample: &Sample) -> Result<f64> {
        self.score_with_cancel(config, sample, CancellationToken::new())
            .await
    }

    /// Evaluate with an externally owned cancellation token
    async fn score_with_cancel(
        &self,
        config: &Self::Config,
        sample: &Sample,
        cancel: CancellationToken,
    ) -> Result<f64> {
        let models = self.effective_models(config);
        if models.is_empty() {
            return Err(EvalError::config(format!(
                "no models configured for metric '{}'",
                self.name()
            )));
        }
        let config_json = serde_json::to_value(config).unwrap_or(Value::Null);
        let total_steps = self.planned_steps(config, sample);
        let mut eval = Evaluation::new(
            self.executor().clone(),
            self.name(),
            sample,
            config_json,
            models,
            total_steps,
            cancel,
        );

        if let Some(field) = self.missing_input(config, sample) {
            warn!(
                metric = self.name(),
                field, "required input missing or blank; scoring 0.0"
            );
            eval.finish_missing_input(field);
            return Ok(0.0);
        }

        match self.run_pipeline(&mut eval, config, sample).await {
            Ok(scores) => match config.aggregation().aggregate(&scores) {
                Ok(aggregated) => {
                    eval.finish(aggregated, scores);
                    Ok(aggregated)
                }
                Err(err) => {
                    eval.finish_error(&err);
                    Err(err)
                }
            },
            Err(err) => {
                eval.finish_error(&err);
                Err(err)
            }
        }
    }

    /// Schedule the evaluation on the worker pool and return a cancellable
    /// handle. Never fails synchronously; every error arrives through the
    /// handle.
    fn score_async(&self, config: &Self::Config, sample: &Sample) -> ScoreHandle {
        let metric = self.clone();
        let config = config.clone();
        let sample = sample.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            metric.score_with_cancel(&config, &sample, cancel).await
        });
        ScoreHandle {
            join,
            cancel: token,
        }
    }
}
