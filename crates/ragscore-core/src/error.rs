// Error types for the evaluation engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EvalError>;

/// Why a rate-limit acquisition did not hand out a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    /// The bucket was empty and the provider uses the reject strategy
    Rejected,
    /// The wait deadline elapsed before a token refilled
    Timeout,
    /// The waiting evaluation was cancelled
    Interrupted,
}

impl std::fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimitReason::Rejected => write!(f, "rejected"),
            RateLimitReason::Timeout => write!(f, "timeout"),
            RateLimitReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Errors that can occur while evaluating a metric
#[derive(Debug, Error)]
pub enum EvalError {
    /// A provider bucket refused or timed out a model call
    #[error("rate limit exceeded for model '{model_id}' on provider '{provider}' ({reason})")]
    RateLimitExceeded {
        model_id: String,
        provider: String,
        reason: RateLimitReason,
    },

    /// Every remaining model failed the same pipeline step
    #[error("All models failed at step {step_name} for metric: {metric_name}")]
    AllModelsFailed {
        step_name: String,
        metric_name: String,
    },

    /// Chat model call error
    #[error("model call failed: {0}")]
    ModelCall(String),

    /// Embedding model call error
    #[error("embedding call failed: {0}")]
    Embedding(String),

    /// The model produced output that does not match the step's response schema
    #[error("malformed model response: {message}")]
    MalformedResponse { message: String, raw: String },

    /// Configuration error (caller bug)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Aggregation was asked to fold an empty score map (caller bug)
    #[error("score aggregation requires at least one successful model")]
    EmptyScores,

    /// Consensus aggregation found the models too far apart
    #[error("consensus not reached: score spread {spread} exceeds tolerance {tolerance}")]
    ConsensusNotReached { spread: f64, tolerance: f64 },

    /// The evaluation was cancelled via its handle
    #[error("evaluation cancelled")]
    Cancelled,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EvalError {
    /// Create a model call error
    pub fn model(msg: impl Into<String>) -> Self {
        EvalError::ModelCall(msg.into())
    }

    /// Create an embedding call error
    pub fn embedding(msg: impl Into<String>) -> Self {
        EvalError::Embedding(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        EvalError::Configuration(msg.into())
    }

    /// Create a rate-limit error
    pub fn rate_limited(
        model_id: impl Into<String>,
        provider: impl Into<String>,
        reason: RateLimitReason,
    ) -> Self {
        EvalError::RateLimitExceeded {
            model_id: model_id.into(),
            provider: provider.into(),
            reason,
        }
    }

    /// Create a malformed-response error, keeping a bounded echo of the raw output
    pub fn malformed(message: impl Into<String>, raw: &str) -> Self {
        const MAX_ECHO: usize = 512;
        let mut raw = raw.to_string();
        if raw.len() > MAX_ECHO {
            let mut cut = MAX_ECHO;
            while !raw.is_char_boundary(cut) {
                cut -= 1;
            }
            raw.truncate(cut);
        }
        EvalError::MalformedResponse {
            message: message.into(),
            raw,
        }
    }

    /// True when this error is a rate-limit rejection, timeout or interruption
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, EvalError::RateLimitExceeded { .. })
    }
}
