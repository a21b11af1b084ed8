// Model client capabilities and stores
//
// The engine is SDK-agnostic: chat and embedding providers are reached
// through the ChatClient and EmbeddingModel traits, and concrete clients are
// registered in read-only stores keyed by model id. Lookups for unknown ids
// fall back to the store's default client, so a metric restricted to a model
// that was never registered still runs instead of erroring at lookup time.

use async_trait::async_trait;
use std::sync::Arc;

/// Capability for chat completion models.
///
/// Implementations handle provider-specific API calls. Metrics that expect
/// structured output prompt for a JSON document; the executor owns decoding.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Run the prompt and return the raw completion text.
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Capability for embedding models.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embed the text into a dense vector.
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Registry mapping chat model ids to clients. Immutable after construction.
pub struct ChatClientStore {
    clients: Vec<(String, Arc<dyn ChatClient>)>,
    default_client: Arc<dyn ChatClient>,
}

impl ChatClientStore {
    /// Create a store with the fallback client used for unknown model ids
    pub fn new(default_client: Arc<dyn ChatClient>) -> Self {
        Self {
            clients: Vec::new(),
            default_client,
        }
    }

    /// Register a client under a model id (construction-time only)
    pub fn with_client(mut self, model_id: impl Into<String>, client: Arc<dyn ChatClient>) -> Self {
        self.clients.push((model_id.into(), client));
        self
    }

    /// Look up a client; unknown ids resolve to the default client
    pub fn get(&self, model_id: &str) -> Arc<dyn ChatClient> {
        self.clients
            .iter()
            .find(|(id, _)| id == model_id)
            .map(|(_, client)| client.clone())
            .unwrap_or_else(|| self.default_client.clone())
    }

    /// Registered model ids, in registration order
    pub fn model_ids(&self) -> Vec<String> {
        self.clients.iter().map(|(id, _)| id.clone()).collect()
    }

    /// True when the model id was explicitly registered
    pub fn contains(&self, model_id: &str) -> bool {
        self.clients.iter().any(|(id, _)| id == model_id)
    }
}

/// Registry mapping embedding model ids to models. Immutable after
/// construction. The first registered model is the store's default.
pub struct EmbeddingModelStore {
    models: Vec<(String, Arc<dyn EmbeddingModel>)>,
    default_model: Arc<dyn EmbeddingModel>,
}

impl EmbeddingModelStore {
    /// Create a store with the fallback model used for unknown model ids
    pub fn new(default_model: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            models: Vec::new(),
            default_model,
        }
    }

    /// Register a model under a model id (construction-time only)
    pub fn with_model(
        mut self,
        model_id: impl Into<String>,
        model: Arc<dyn EmbeddingModel>,
    ) -> Self {
        self.models.push((model_id.into(), model));
        self
    }

    /// Look up a model; unknown ids resolve to the default model
    pub fn get(&self, model_id: &str) -> Arc<dyn EmbeddingModel> {
        self.models
            .iter()
            .find(|(id, _)| id == model_id)
            .map(|(_, model)| model.clone())
            .unwrap_or_else(|| self.default_model.clone())
    }

    /// Registered model ids, in registration order
    pub fn model_ids(&self) -> Vec<String> {
        self.models.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Id used when a metric does not pin an embedding model
    pub fn default_model_id(&self) -> &str {
        self.models
            .first()
            .map(|(id, _)| id.as_str())
            .unwrap_or("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(&'static str);

    #[async_trait]
    impl ChatClient for Canned {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct CannedEmbedding(Vec<f32>);

    #[async_trait]
    impl EmbeddingModel for CannedEmbedding {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_unknown_model_falls_back_to_default() {
        let store = ChatClientStore::new(Arc::new(Canned("default")))
            .with_client("gpt-4o", Arc::new(Canned("registered")));

        let registered = store.get("gpt-4o").complete("hi").await.unwrap();
        let fallback = store.get("nope").complete("hi").await.unwrap();

        assert_eq!(registered, "registered");
        assert_eq!(fallback, "default");
        assert_eq!(store.model_ids(), vec!["gpt-4o".to_string()]);
        assert!(store.contains("gpt-4o"));
        assert!(!store.contains("nope"));
    }

    #[tokio::test]
    async fn test_first_embedding_model_is_default_id() {
        let store = EmbeddingModelStore::new(Arc::new(CannedEmbedding(vec![0.0])))
            .with_model("embed-small", Arc::new(CannedEmbedding(vec![1.0])))
            .with_model("embed-large", Arc::new(CannedEmbedding(vec![2.0])));

        assert_eq!(store.default_model_id(), "embed-small");
        assert_eq!(store.get("embed-large").embed("x").await.unwrap(), vec![2.0]);
    }
}
