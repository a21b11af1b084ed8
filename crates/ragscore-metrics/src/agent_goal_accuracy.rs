// Agent Goal Accuracy
//
// Did the agent achieve what the user wanted? With a reference the judge
// compares the conversation's end state against it directly; without one the
// goal is first inferred from the conversation and then judged. Binary per
// model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use ragscore_core::metric::{Evaluation, MetricConfig, MultiModelMetric, ScoreHandle};
use ragscore_core::prompt::render;
use ragscore_core::{MultiModelExecutor, Result, Sample, ScoreAggregator};

const INFER_GOAL_PROMPT: &str = "\
Read the conversation and state the user's end goal in one sentence.

Conversation:
{conversation}

Respond with JSON of the form {\"goal\": \"...\"}.";

const JUDGE_GOAL_PROMPT: &str = "\
Given the conversation and the user's goal, judge whether the goal was \
achieved by the end of the conversation. Answer with verdict 1 for achieved \
and 0 for not achieved.

Goal:
{goal}

Conversation:
{conversation}

Respond with JSON of the form {\"reason\": \"...\", \"achieved\": 0 or 1}.";

/// Configuration for [`AgentGoalAccuracy`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentGoalAccuracyConfig {
    /// Restrict fan-out to these models; `None` uses all configured models
    pub model_ids: Option<Vec<String>>,
    pub aggregation: ScoreAggregator,
}

impl MetricConfig for AgentGoalAccuracyConfig {
    fn model_ids(&self) -> Option<&[String]> {
        self.model_ids.as_deref()
    }

    fn aggregation(&self) -> ScoreAggregator {
        self.aggregation
    }
}

/// Response schema for the goal inference step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferredGoalResponse {
    pub goal: String,
}

/// Response schema for the judgement step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalVerdictResponse {
    #[serde(default)]
    pub reason: Option<String>,
    /// 1 when the goal was achieved, else 0
    pub achieved: u8,
}

/// Whether the agent achieved the user's goal
#[derive(Clone)]
pub struct AgentGoalAccuracy {
    executor: Arc<MultiModelExecutor>,
}

impl AgentGoalAccuracy {
    pub fn new(executor: Arc<MultiModelExecutor>) -> Self {
        Self { executor }
    }

    pub async fn multi_turn_score(
        &self,
        config: &AgentGoalAccuracyConfig,
        sample: &Sample,
    ) -> Result<f64> {
        self.score(config, sample).await
    }

    pub async fn multi_turn_score_default(&self, sample: &Sample) -> Result<f64> {
        self.score(&AgentGoalAccuracyConfig::default(), sample).await
    }

    pub fn multi_turn_score_async(
        &self,
        config: &AgentGoalAccuracyConfig,
        sample: &Sample,
    ) -> ScoreHandle {
        self.score_async(config, sample)
    }
}

#[async_trait]
impl MultiModelMetric for AgentGoalAccuracy {
    type Config = AgentGoalAccuracyConfig;

    fn name(&self) -> &'static str {
        "agent_goal_accuracy"
    }

    fn executor(&self) -> &Arc<MultiModelExecutor> {
        &self.executor
    }

    fn planned_steps(&self, _config: &Self::Config, sample: &Sample) -> usize {
        if sample.has_reference() {
            1
        } else {
            2
        }
    }

    fn missing_input(&self, _config: &Self::Config, sample: &Sample) -> Option<&'static str> {
        if sample.user_input_messages().is_empty() {
            Some("user_input_messages")
        } else {
            None
        }
    }

    async fn run_pipeline(
        &self,
        eval: &mut Evaluation,
        _config: &Self::Config,
        sample: &Sample,
    ) -> Result<HashMap<String, f64>> {
        let conversation = sample.conversation_text();

        let verdicts: HashMap<String, GoalVerdictResponse> = if sample.has_reference() {
            eval.set_metadata("goal_source", json!("reference"));
            let prompt = render(
                JUDGE_GOAL_PROMPT,
                &[
                    ("goal", sample.reference().unwrap_or_default()),
                    ("conversation", conversation.as_str()),
                ],
            );
            eval.llm_step("JudgeGoalAchievement", &prompt).await?
        } else {
            eval.set_metadata("goal_source", json!("inferred"));
            let infer_prompt = render(
                INFER_GOAL_PROMPT,
                &[("conversation", conversation.as_str())],
            );
            let goals: HashMap<String, InferredGoalResponse> =
                eval.llm_step("InferGoal", &infer_prompt).await?;

            eval.llm_step_per_model("JudgeGoalAchievement", |model| {
                let goal = goals
                    .get(model)
                    .map(|g| g.goal.as_str())
                    .unwrap_or_default();
                render(
                    JUDGE_GOAL_PROMPT,
                    &[("goal", goal), ("conversation", conversation.as_str())],
                )
            })
            .await?
        };

        Ok(verdicts
            .into_iter()
            .map(|(model, verdict)| {
                let score = if verdict.achieved == 1 { 1.0 } else { 0.0 };
                (model, score)
            })
            .collect())
    }
}
