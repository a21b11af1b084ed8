// Execution listeners and the per-evaluation notifier
//
// Listeners observe the lifecycle of one metric evaluation: the begin
// envelope, every step, every model exclusion, and the end envelope. They
// are ordered by priority (lower runs first) and dispatched through an
// EvaluationNotifier that is created per evaluation and never shared, so
// callback ordering within one evaluation is total.
//
// Listeners should be fast and non-blocking; for heavy processing, hand the
// event off to a background task. A panicking listener is caught and logged
// and never aborts the evaluation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

use crate::events::{
    MetricEvaluationContext, MetricEvaluationResult, ModelExclusionEvent, StepResults,
};

/// Observer of metric evaluation lifecycle events.
///
/// All callbacks default to no-ops so implementations pick what they need.
pub trait ModelExecutionListener: Send + Sync {
    /// Dispatch order among listeners; lower runs first, ties keep
    /// registration order.
    fn priority(&self) -> i32 {
        0
    }

    fn before_metric_evaluation(&self, _ctx: &MetricEvaluationContext) {}

    fn before_step(&self, _step_name: &str, _step_index: usize, _total_steps: usize) {}

    /// After a step that called models (LLM or embedding)
    fn after_llm_step(&self, _step: &StepResults) {}

    /// After a pure in-process step
    fn after_compute_step(&self, _step: &StepResults) {}

    fn on_model_excluded(&self, _event: &ModelExclusionEvent) {}

    fn after_metric_evaluation(&self, _result: &MetricEvaluationResult) {}
}

/// Ordered listener dispatch for one evaluation.
///
/// Takes a snapshot of the registered listeners at creation time and sorts
/// it by priority, so concurrent registration never reorders callbacks
/// mid-evaluation.
pub struct EvaluationNotifier {
    listeners: Vec<Arc<dyn ModelExecutionListener>>,
}

impl EvaluationNotifier {
    pub fn new(mut listeners: Vec<Arc<dyn ModelExecutionListener>>) -> Self {
        listeners.sort_by_key(|listener| listener.priority());
        Self { listeners }
    }

    pub fn before_metric_evaluation(&self, ctx: &MetricEvaluationContext) {
        self.dispatch("before_metric_evaluation", |l| {
            l.before_metric_evaluation(ctx)
        });
    }

    pub fn before_step(&self, step_name: &str, step_index: usize, total_steps: usize) {
        self.dispatch("before_step", |l| {
            l.before_step(step_name, step_index, total_steps)
        });
    }

    pub fn after_llm_step(&self, step: &StepResults) {
        self.dispatch("after_llm_step", |l| l.after_llm_step(step));
    }

    pub fn after_compute_step(&self, step: &StepResults) {
        self.dispatch("after_compute_step", |l| l.after_compute_step(step));
    }

    pub fn on_model_excluded(&self, event: &ModelExclusionEvent) {
        self.dispatch("on_model_excluded", |l| l.on_model_excluded(event));
    }

    pub fn after_metric_evaluation(&self, result: &MetricEvaluationResult) {
        self.dispatch("after_metric_evaluation", |l| {
            l.after_metric_evaluation(result)
        });
    }

    fn dispatch(&self, callback: &str, f: impl Fn(&dyn ModelExecutionListener)) {
        for listener in &self.listeners {
            if catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))).is_err() {
                warn!(callback, "listener panicked; continuing evaluation");
            }
        }
    }
}
