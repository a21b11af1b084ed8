// Per-provider rate limiting
//
// Every provider gets one token bucket shared by all of its models; the
// bucket refills at `rps` tokens per second with a burst capacity of `rps`.
// Models are mapped to providers at registry construction time. Models
// without a provider mapping are not limited at all.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{EvalError, RateLimitReason, Result};

type ProviderBucket = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// What to do when a provider's bucket is empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Block until a token refills (bounded by `timeout` when non-zero)
    Wait,
    /// Fail immediately
    Reject,
}

/// Per-provider rate limit configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests per second; also the burst capacity of the bucket
    pub rps: NonZeroU32,
    pub strategy: RateLimitStrategy,
    /// Upper bound for `Wait`; `Duration::ZERO` waits without bound
    pub timeout: Duration,
}

impl RateLimitConfig {
    /// Wait strategy without a deadline
    pub fn wait(rps: u32) -> Self {
        Self {
            rps: NonZeroU32::new(rps.max(1)).expect("rps is at least 1"),
            strategy: RateLimitStrategy::Wait,
            timeout: Duration::ZERO,
        }
    }

    /// Reject strategy
    pub fn reject(rps: u32) -> Self {
        Self {
            strategy: RateLimitStrategy::Reject,
            ..Self::wait(rps)
        }
    }

    /// Bound the wait with a deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

struct Provider {
    config: RateLimitConfig,
    bucket: ProviderBucket,
}

/// Process-scoped registry of provider buckets plus the model → provider map
#[derive(Default)]
pub struct ProviderRateLimiterRegistry {
    providers: HashMap<String, Provider>,
    model_providers: HashMap<String, String>,
}

impl ProviderRateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure a provider bucket (construction-time only)
    pub fn with_provider(mut self, provider: impl Into<String>, config: RateLimitConfig) -> Self {
        let bucket = RateLimiter::direct(Quota::per_second(config.rps));
        self.providers
            .insert(provider.into(), Provider { config, bucket });
        self
    }

    /// Map a model id onto a configured provider (construction-time only)
    pub fn with_model(mut self, model_id: impl Into<String>, provider: impl Into<String>) -> Self {
        self.model_providers
            .insert(model_id.into(), provider.into());
        self
    }

    /// Provider a model is registered against, if any
    pub fn provider_for(&self, model_id: &str) -> Option<&str> {
        self.model_providers.get(model_id).map(String::as_str)
    }

    /// Take one token from the model's provider bucket.
    ///
    /// Unregistered models return immediately. `Reject` fails when the bucket
    /// is empty; `Wait` blocks until refill, bounded by the provider timeout
    /// when one is configured. Cancelling `cancel` interrupts a wait and
    /// surfaces as a rate-limit error with the `interrupted` reason.
    pub async fn acquire(&self, model_id: &str, cancel: &CancellationToken) -> Result<()> {
        let Some(provider_name) = self.model_providers.get(model_id) else {
            return Ok(());
        };
        let Some(provider) = self.providers.get(provider_name) else {
            debug!(model_id, provider = %provider_name, "model mapped to unconfigured provider; not limiting");
            return Ok(());
        };

        match provider.config.strategy {
            RateLimitStrategy::Reject => provider.bucket.check().map_err(|_| {
                EvalError::rate_limited(model_id, provider_name, RateLimitReason::Rejected)
            }),
            RateLimitStrategy::Wait if provider.config.timeout.is_zero() => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(EvalError::rate_limited(
                        model_id,
                        provider_name,
                        RateLimitReason::Interrupted,
                    )),
                    _ = provider.bucket.until_ready() => Ok(()),
                }
            }
            RateLimitStrategy::Wait => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(EvalError::rate_limited(
                        model_id,
                        provider_name,
                        RateLimitReason::Interrupted,
                    )),
                    outcome = tokio::time::timeout(provider.config.timeout, provider.bucket.until_ready()) => {
                        outcome.map_err(|_| {
                            EvalError::rate_limited(model_id, provider_name, RateLimitReason::Timeout)
                        })
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_two_models_one_provider(config: RateLimitConfig) -> ProviderRateLimiterRegistry {
        ProviderRateLimiterRegistry::new()
            .with_provider("openai", config)
            .with_model("gpt-4o", "openai")
            .with_model("gpt-4o-mini", "openai")
    }

    #[tokio::test]
    async fn test_models_of_one_provider_share_a_bucket() {
        let registry = registry_two_models_one_provider(RateLimitConfig::reject(2));
        let cancel = CancellationToken::new();

        registry.acquire("gpt-4o", &cancel).await.unwrap();
        registry.acquire("gpt-4o-mini", &cancel).await.unwrap();

        let err = registry.acquire("gpt-4o", &cancel).await.unwrap_err();
        match err {
            EvalError::RateLimitExceeded {
                provider, reason, ..
            } => {
                assert_eq!(provider, "openai");
                assert_eq!(reason, RateLimitReason::Rejected);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_provider_buckets_are_independent() {
        let registry = ProviderRateLimiterRegistry::new()
            .with_provider("openai", RateLimitConfig::reject(1))
            .with_provider("anthropic", RateLimitConfig::reject(1))
            .with_model("gpt-4o", "openai")
            .with_model("claude", "anthropic");
        let cancel = CancellationToken::new();

        registry.acquire("gpt-4o", &cancel).await.unwrap();
        assert!(registry.acquire("gpt-4o", &cancel).await.is_err());

        // Exhausting openai must not affect anthropic
        registry.acquire("claude", &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_unregistered_model_is_not_limited() {
        let registry = registry_two_models_one_provider(RateLimitConfig::reject(1));
        let cancel = CancellationToken::new();

        for _ in 0..10 {
            registry.acquire("local-model", &cancel).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_wait_with_timeout_expires() {
        let registry = registry_two_models_one_provider(
            RateLimitConfig::wait(1).with_timeout(Duration::from_millis(50)),
        );
        let cancel = CancellationToken::new();

        registry.acquire("gpt-4o", &cancel).await.unwrap();
        let err = registry.acquire("gpt-4o", &cancel).await.unwrap_err();
        match err {
            EvalError::RateLimitExceeded { reason, .. } => {
                assert_eq!(reason, RateLimitReason::Timeout)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_a_wait() {
        let registry = registry_two_models_one_provider(RateLimitConfig::wait(1));
        let cancel = CancellationToken::new();

        registry.acquire("gpt-4o", &cancel).await.unwrap();

        let interrupter = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            interrupter.cancel();
        });

        let err = registry.acquire("gpt-4o", &cancel).await.unwrap_err();
        match err {
            EvalError::RateLimitExceeded { reason, .. } => {
                assert_eq!(reason, RateLimitReason::Interrupted)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_wait_without_timeout_eventually_refills() {
        let registry = registry_two_models_one_provider(RateLimitConfig::wait(10));
        let cancel = CancellationToken::new();

        // Drain the burst, then one more acquire must succeed after a refill
        for _ in 0..10 {
            registry.acquire("gpt-4o", &cancel).await.unwrap();
        }
        registry.acquire("gpt-4o", &cancel).await.unwrap();
    }
}
