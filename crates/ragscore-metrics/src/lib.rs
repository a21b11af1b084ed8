// Metric Library
//
// The metrics built on top of the ragscore-core engine:
// - RAG metrics: faithfulness, context recall / precision / entity recall,
//   noise sensitivity, response relevancy, factual correctness
// - Judge metrics: aspect critic, simple criteria score, rubrics score
// - Agent metrics (multi-turn): tool call accuracy, agent goal accuracy,
//   topic adherence
// - NLP metrics: BLEU, ROUGE, chrF, string similarity
//
// Every metric follows the same protocol: an ordered pipeline of LLM /
// embedding / compute steps fanned out to the configured models, with
// per-model scores folded by the config's aggregation strategy.

pub mod agent_goal_accuracy;
pub mod aspect_critic;
pub mod context_entity_recall;
pub mod context_precision;
pub mod context_recall;
pub mod factual_correctness;
pub mod faithfulness;
pub mod nlp;
pub mod noise_sensitivity;
pub mod response_relevancy;
pub mod rubrics;
pub mod simple_criteria;
pub mod tool_call_accuracy;
pub mod topic_adherence;

mod text;

// Re-exports for convenience
pub use agent_goal_accuracy::{AgentGoalAccuracy, AgentGoalAccuracyConfig};
pub use aspect_critic::{AspectCritic, AspectCriticConfig};
pub use context_entity_recall::{ContextEntityRecall, ContextEntityRecallConfig};
pub use context_precision::{ContextPrecision, ContextPrecisionConfig, ContextPrecisionStrategy};
pub use context_recall::{ContextRecall, ContextRecallConfig};
pub use factual_correctness::{FactualCorrectness, FactualCorrectnessConfig, FactualCorrectnessMode};
pub use faithfulness::{Faithfulness, FaithfulnessConfig};
pub use nlp::{
    Bleu, BleuConfig, Chrf, ChrfConfig, Rouge, RougeConfig, RougeMeasure, RougeVariant,
    StringSimilarity, StringSimilarityConfig, StringSimilarityVariant,
};
pub use noise_sensitivity::{NoiseSensitivity, NoiseSensitivityConfig, NoiseSensitivityMode};
pub use response_relevancy::{ResponseRelevancy, ResponseRelevancyConfig};
pub use rubrics::{RubricsConfig, RubricsScore};
pub use simple_criteria::{SimpleCriteriaConfig, SimpleCriteriaScore};
pub use tool_call_accuracy::{ToolCallAccuracy, ToolCallAccuracyConfig};
pub use topic_adherence::{TopicAdherence, TopicAdherenceConfig};

// Engine types callers need alongside the metrics
pub use ragscore_core::metric::MultiModelMetric;
pub use ragscore_core::{
    ChatClientStore, EmbeddingModelStore, MultiModelExecutor, ProviderRateLimiterRegistry,
    RateLimitConfig, Sample, ScoreAggregator,
};
