// Provider rate limiting through the executor
//
// Models of one provider share a token bucket; buckets of different
// providers are independent. Rejections surface as per-model failures that
// name the provider, never as escaping errors.

use std::sync::Arc;

use ragscore_core::memory::{MockChatClient, MockEmbeddingModel};
use ragscore_core::{
    ChatClientStore, EmbeddingModelStore, EvalError, MultiModelExecutor,
    ProviderRateLimiterRegistry, RateLimitConfig,
};

fn executor(limiter: ProviderRateLimiterRegistry) -> Arc<MultiModelExecutor> {
    let store = ChatClientStore::new(Arc::new(MockChatClient::fixed("{}")))
        .with_client("shared-a", Arc::new(MockChatClient::fixed("{}")))
        .with_client("shared-b", Arc::new(MockChatClient::fixed("{}")))
        .with_client("other", Arc::new(MockChatClient::fixed("{}")));
    Arc::new(MultiModelExecutor::new(
        Arc::new(store),
        Arc::new(EmbeddingModelStore::new(Arc::new(MockEmbeddingModel::new()))),
        Arc::new(limiter),
    ))
}

#[tokio::test]
async fn test_same_provider_models_compete_for_one_bucket() {
    // Two models on provider "p" with one token, a third model on "q":
    // exactly one of the shared-provider models wins the token.
    let limiter = ProviderRateLimiterRegistry::new()
        .with_provider("p", RateLimitConfig::reject(1))
        .with_provider("q", RateLimitConfig::reject(1))
        .with_model("shared-a", "p")
        .with_model("shared-b", "p")
        .with_model("other", "q");
    let executor = executor(limiter);

    let models: Vec<String> = ["shared-a", "shared-b", "other"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let results = executor
        .execute_llm::<serde_json::Value>(&models, "judge")
        .await
        .unwrap();

    let shared_successes = results[..2].iter().filter(|r| r.is_success()).count();
    assert_eq!(shared_successes, 1, "exactly one shared-provider model wins");

    let loser = results[..2].iter().find(|r| !r.is_success()).unwrap();
    match loser.error().unwrap().as_ref() {
        EvalError::RateLimitExceeded { provider, .. } => assert_eq!(provider, "p"),
        other => panic!("unexpected error: {other}"),
    }

    // The model on the independent provider is unaffected
    assert!(results[2].is_success());
}

#[tokio::test]
async fn test_exhausting_one_provider_leaves_the_other_untouched() {
    let limiter = ProviderRateLimiterRegistry::new()
        .with_provider("p", RateLimitConfig::reject(2))
        .with_provider("q", RateLimitConfig::reject(2))
        .with_model("shared-a", "p")
        .with_model("shared-b", "p")
        .with_model("other", "q");
    let executor = executor(limiter);

    // Two successful calls from either model of provider "p"
    assert!(executor
        .execute_llm_on_model::<serde_json::Value>("shared-a", "x")
        .await
        .is_success());
    assert!(executor
        .execute_llm_on_model::<serde_json::Value>("shared-b", "x")
        .await
        .is_success());

    // The third call on "p" is rejected regardless of which model asks
    let third = executor
        .execute_llm_on_model::<serde_json::Value>("shared-a", "x")
        .await;
    assert!(third.error().unwrap().is_rate_limit());

    // Provider "q" still has its tokens
    assert!(executor
        .execute_llm_on_model::<serde_json::Value>("other", "x")
        .await
        .is_success());
}

#[tokio::test]
async fn test_unregistered_models_are_never_limited() {
    let limiter = ProviderRateLimiterRegistry::new()
        .with_provider("p", RateLimitConfig::reject(1))
        .with_model("shared-a", "p");
    let executor = executor(limiter);

    for _ in 0..5 {
        assert!(executor
            .execute_llm_on_model::<serde_json::Value>("other", "x")
            .await
            .is_success());
    }
}
