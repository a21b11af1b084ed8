// Multi-Model Evaluation Engine
//
// This crate provides the core of an LLM output quality evaluation engine:
// metrics fan out to a configurable set of chat and embedding models, drive
// an ordered pipeline of LLM / embedding / compute steps, and fold the
// per-model scores into one number.
//
// Key design decisions:
// - Providers are reached through traits (ChatClient, EmbeddingModel) so the
//   engine carries no SDK dependency; concrete clients register in read-only
//   stores keyed by model id
// - Per-model failures are data (a failure ModelResult), never control flow;
//   only a step that loses every model is fatal
// - Rate limiting is per provider: models of one provider share a token
//   bucket, buckets of different providers are independent
// - Lifecycle events dispatch through a per-evaluation notifier, so listener
//   ordering within one evaluation is total and concurrent evaluations never
//   share mutable listener state
// - Metric configs are flat option records with defaults, not builders

pub mod aggregate;
pub mod client;
pub mod error;
pub mod events;
pub mod executor;
pub mod limiter;
pub mod listener;
pub mod metric;
pub mod prompt;
pub mod sample;

// In-memory implementations for examples and testing
pub mod memory;

// Re-exports for convenience
pub use aggregate::ScoreAggregator;
pub use client::{ChatClient, ChatClientStore, EmbeddingModel, EmbeddingModelStore};
pub use error::{EvalError, RateLimitReason, Result};
pub use events::{
    MetricEvaluationContext, MetricEvaluationResult, ModelExclusionEvent, ModelResult, StepResults,
    StepType,
};
pub use executor::MultiModelExecutor;
pub use limiter::{ProviderRateLimiterRegistry, RateLimitConfig, RateLimitStrategy};
pub use listener::{EvaluationNotifier, ModelExecutionListener};
pub use metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
pub use sample::{Message, Sample, SampleBuilder, ToolCall};
