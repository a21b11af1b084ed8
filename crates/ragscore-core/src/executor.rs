// Multi-model executor
//
// The fan-out engine. Every step of a metric pipeline runs through here:
// LLM calls and embedding calls go acquire-token → call client → decode →
// wrap, compute steps just wrap. Per-model failures are data (a failure
// ModelResult), never an escaping error; the executor only errors on caller
// bugs such as an empty model list.
//
// Ordering: the returned sequence always preserves the input model order,
// even though the underlying calls run concurrently via join_all.

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{ChatClientStore, EmbeddingModelStore};
use crate::error::{EvalError, Result};
use crate::events::ModelResult;
use crate::limiter::ProviderRateLimiterRegistry;
use crate::listener::ModelExecutionListener;

/// Fan-out runner for LLM, embedding and compute steps.
///
/// Holds the read-only stores, the shared rate limiter registry and the
/// listener registrations. Constructed once and shared by every metric.
pub struct MultiModelExecutor {
    chat_store: Arc<ChatClientStore>,
    embedding_store: Arc<EmbeddingModelStore>,
    limiter: Arc<ProviderRateLimiterRegistry>,
    listeners: RwLock<Vec<Arc<dyn ModelExecutionListener>>>,
}

impl MultiModelExecutor {
    pub fn new(
        chat_store: Arc<ChatClientStore>,
        embedding_store: Arc<EmbeddingModelStore>,
        limiter: Arc<ProviderRateLimiterRegistry>,
    ) -> Self {
        Self {
            chat_store,
            embedding_store,
            limiter,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a lifecycle listener. Evaluations already in flight keep the
    /// snapshot they started with.
    pub fn add_listener(&self, listener: Arc<dyn ModelExecutionListener>) {
        self.listeners
            .write()
            .expect("listener registry poisoned")
            .push(listener);
    }

    /// Snapshot of the registered listeners, in registration order
    pub fn listener_snapshot(&self) -> Vec<Arc<dyn ModelExecutionListener>> {
        self.listeners
            .read()
            .expect("listener registry poisoned")
            .clone()
    }

    /// Ids of every configured chat model
    pub fn chat_model_ids(&self) -> Vec<String> {
        self.chat_store.model_ids()
    }

    pub fn embedding_store(&self) -> &Arc<EmbeddingModelStore> {
        &self.embedding_store
    }

    /// Run one prompt against every model in parallel.
    ///
    /// The response of each model is decoded into `T`; any rate-limit
    /// rejection, client error or schema mismatch becomes a failure result
    /// for that model alone.
    pub async fn execute_llm<T>(&self, model_ids: &[String], prompt: &str) -> Result<Vec<ModelResult<T>>>
    where
        T: DeserializeOwned + Send,
    {
        self.execute_llm_with(model_ids, prompt, &CancellationToken::new())
            .await
    }

    /// Cancellable variant of [`execute_llm`](Self::execute_llm)
    pub async fn execute_llm_with<T>(
        &self,
        model_ids: &[String],
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ModelResult<T>>>
    where
        T: DeserializeOwned + Send,
    {
        if model_ids.is_empty() {
            return Err(EvalError::config("model id list must not be empty"));
        }
        let calls = model_ids
            .iter()
            .map(|model_id| self.execute_llm_on_model_with::<T>(model_id, prompt, cancel));
        Ok(join_all(calls).await)
    }

    /// Single-model LLM call
    pub async fn execute_llm_on_model<T>(&self, model_id: &str, prompt: &str) -> ModelResult<T>
    where
        T: DeserializeOwned,
    {
        self.execute_llm_on_model_with(model_id, prompt, &CancellationToken::new())
            .await
    }

    /// Cancellable single-model LLM call
    pub async fn execute_llm_on_model_with<T>(
        &self,
        model_id: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> ModelResult<T>
    where
        T: DeserializeOwned,
    {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return ModelResult::failure(model_id, prompt, started.elapsed(), EvalError::Cancelled);
        }
        if let Err(err) = self.limiter.acquire(model_id, cancel).await {
            debug!(model_id, error = %err, "model call not admitted");
            return ModelResult::failure(model_id, prompt, started.elapsed(), err);
        }

        let client = self.chat_store.get(model_id);
        match client.complete(prompt).await {
            Ok(raw) => match decode::<T>(&raw) {
                Ok(value) => ModelResult::success(model_id, prompt, started.elapsed(), value),
                Err(err) => {
                    debug!(model_id, error = %err, "model response did not match schema");
                    ModelResult::failure(model_id, prompt, started.elapsed(), err)
                }
            },
            Err(err) => ModelResult::failure(
                model_id,
                prompt,
                started.elapsed(),
                EvalError::model(err.to_string()),
            ),
        }
    }

    /// Single-model embedding call; same acquire-then-call-then-wrap shape
    pub async fn execute_embedding_on_model(&self, model_id: &str, text: &str) -> ModelResult<Vec<f32>> {
        self.execute_embedding_on_model_with(model_id, text, &CancellationToken::new())
            .await
    }

    /// Cancellable single-model embedding call
    pub async fn execute_embedding_on_model_with(
        &self,
        model_id: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> ModelResult<Vec<f32>> {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return ModelResult::failure(model_id, text, started.elapsed(), EvalError::Cancelled);
        }
        if let Err(err) = self.limiter.acquire(model_id, cancel).await {
            return ModelResult::failure(model_id, text, started.elapsed(), err);
        }

        let model = self.embedding_store.get(model_id);
        match model.embed(text).await {
            Ok(vector) => ModelResult::success(model_id, text, started.elapsed(), vector),
            Err(err) => ModelResult::failure(
                model_id,
                text,
                started.elapsed(),
                EvalError::embedding(err.to_string()),
            ),
        }
    }

    /// Run a pure in-process computation once per model. No rate limiting.
    pub fn execute_compute<T, F>(&self, model_ids: &[String], f: F) -> Result<Vec<ModelResult<T>>>
    where
        T: Serialize,
        F: Fn(&str) -> Result<T>,
    {
        if model_ids.is_empty() {
            return Err(EvalError::config("model id list must not be empty"));
        }
        Ok(model_ids
            .iter()
            .map(|model_id| {
                let started = Instant::now();
                match f(model_id) {
                    Ok(value) => ModelResult::success(model_id, "", started.elapsed(), value),
                    Err(err) => ModelResult::failure(model_id, "", started.elapsed(), err),
                }
            })
            .collect())
    }
}

/// Decode a raw completion into the step's response type.
///
/// Models frequently wrap JSON in Markdown code fences; those are stripped
/// before parsing.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let body = strip_code_fences(raw);
    serde_json::from_str(body).map_err(|err| EvalError::malformed(err.to_string(), raw))
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") up to the first newline
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ChatClient, EmbeddingModel};
    use crate::limiter::{ProviderRateLimiterRegistry, RateLimitConfig};
    use async_trait::async_trait;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        verdict: u8,
    }

    struct Canned(&'static str);

    #[async_trait]
    impl ChatClient for Canned {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Failing;

    #[async_trait]
    impl ChatClient for Failing {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            anyhow::bail!("provider unavailable")
        }
    }

    struct NoEmbeddings;

    #[async_trait]
    impl EmbeddingModel for NoEmbeddings {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("no embedding model configured")
        }
    }

    fn executor(chat_store: ChatClientStore) -> MultiModelExecutor {
        MultiModelExecutor::new(
            Arc::new(chat_store),
            Arc::new(EmbeddingModelStore::new(Arc::new(NoEmbeddings))),
            Arc::new(ProviderRateLimiterRegistry::new()),
        )
    }

    #[test]
    fn test_decode_strips_code_fences() {
        let fenced = "```json\n{\"verdict\": 1}\n```";
        assert_eq!(decode::<Verdict>(fenced).unwrap(), Verdict { verdict: 1 });

        let bare = "{\"verdict\": 0}";
        assert_eq!(decode::<Verdict>(bare).unwrap(), Verdict { verdict: 0 });
    }

    #[test]
    fn test_decode_schema_mismatch_is_malformed() {
        let err = decode::<Verdict>("{\"other\": true}").unwrap_err();
        assert!(matches!(err, EvalError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_results_preserve_input_model_order() {
        let store = ChatClientStore::new(Arc::new(Canned("{\"verdict\": 1}")))
            .with_client("a", Arc::new(Canned("{\"verdict\": 1}")))
            .with_client("b", Arc::new(Canned("{\"verdict\": 0}")))
            .with_client("c", Arc::new(Canned("{\"verdict\": 1}")));
        let executor = executor(store);

        let models: Vec<String> = ["c", "a", "b"].iter().map(|s| s.to_string()).collect();
        let results = executor
            .execute_llm::<Verdict>(&models, "judge this")
            .await
            .unwrap();

        let order: Vec<&str> = results.iter().map(|r| r.model_id()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_client_error_becomes_failure_result() {
        let store = ChatClientStore::new(Arc::new(Failing)).with_client("a", Arc::new(Failing));
        let executor = executor(store);

        let result = executor
            .execute_llm_on_model::<Verdict>("a", "judge this")
            .await;

        assert!(!result.is_success());
        assert!(result.error().unwrap().to_string().contains("provider unavailable"));
        assert_eq!(result.request(), "judge this");
    }

    #[tokio::test]
    async fn test_rate_limit_rejection_becomes_failure_result() {
        let store =
            ChatClientStore::new(Arc::new(Canned("{}"))).with_client("a", Arc::new(Canned("{}")));
        let limiter = ProviderRateLimiterRegistry::new()
            .with_provider("p", RateLimitConfig::reject(1))
            .with_model("a", "p");
        let executor = MultiModelExecutor::new(
            Arc::new(store),
            Arc::new(EmbeddingModelStore::new(Arc::new(NoEmbeddings))),
            Arc::new(limiter),
        );

        let first = executor
            .execute_llm_on_model::<serde_json::Value>("a", "x")
            .await;
        let second = executor
            .execute_llm_on_model::<serde_json::Value>("a", "x")
            .await;

        assert!(first.is_success());
        assert!(second.error().unwrap().is_rate_limit());
    }

    #[tokio::test]
    async fn test_empty_model_list_is_a_caller_bug() {
        let executor = executor(ChatClientStore::new(Arc::new(Canned("{}"))));
        let err = executor
            .execute_llm::<serde_json::Value>(&[], "x")
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_compute_wraps_per_model_errors() {
        let executor = executor(ChatClientStore::new(Arc::new(Canned("{}"))));
        let models: Vec<String> = ["good", "bad"].iter().map(|s| s.to_string()).collect();

        let results = executor
            .execute_compute(&models, |model| {
                if model == "bad" {
                    Err(EvalError::model("nope"))
                } else {
                    Ok(0.5_f64)
                }
            })
            .unwrap();

        assert!(results[0].is_success());
        assert!(!results[1].is_success());
    }
}
