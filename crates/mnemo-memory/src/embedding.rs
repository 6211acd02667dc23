//! Cache-first embedding.
//!
//! Wraps an embedding provider with the persistent cache: every request is
//! checked against the store first, and only uncached texts reach the
//! provider. Batch requests preserve input order when reassembling cached
//! and fresh vectors.

use std::sync::Arc;

use tracing::debug;

use mnemo_llm::SharedEmbedder;
use mnemo_types::Id;

use crate::error::Result;
use crate::store::MemoryStore;

/// Settings key for the admin-selected embedding provider.
pub const PROVIDER_SETTING: &str = "embedding.provider";
/// Settings key for the admin-selected embedding model.
pub const MODEL_SETTING: &str = "embedding.model";

/// The effective (provider, model) pair for embedding.
///
/// Admin settings win; static configuration is the fallback. Whoever
/// constructs the embedder consults this first, so an admin can repoint
/// embedding without a redeploy (a reset is still needed, vectors from
/// different models are not comparable).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingSelection {
    pub provider: String,
    pub model: String,
}

impl EmbeddingSelection {
    pub fn resolve(
        store: &MemoryStore,
        default_provider: &str,
        default_model: &str,
    ) -> Result<Self> {
        let provider = store
            .get_setting(PROVIDER_SETTING)?
            .unwrap_or_else(|| default_provider.to_string());
        let model = store
            .get_setting(MODEL_SETTING)?
            .unwrap_or_else(|| default_model.to_string());
        Ok(Self { provider, model })
    }
}

/// Embedding provider fronted by the persistent cache.
#[derive(Clone)]
pub struct EmbeddingService {
    store: Arc<MemoryStore>,
    embedder: SharedEmbedder,
}

impl EmbeddingService {
    pub fn new(store: Arc<MemoryStore>, embedder: SharedEmbedder) -> Self {
        Self { store, embedder }
    }

    /// Dimensionality of the vectors this service produces.
    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    /// Provider name, for logging and cache keys.
    pub fn provider_name(&self) -> &str {
        self.embedder.name()
    }

    /// Model identifier, for cache keys.
    pub fn model(&self) -> &str {
        self.embedder.model()
    }

    /// Embed a single text, consulting the cache first.
    pub async fn embed(&self, text: &str, workspace_id: Option<Id>) -> Result<Vec<f32>> {
        let provider = self.embedder.name();
        let model = self.embedder.model();

        if let Some(cached) = self.store.cache_get(provider, model, text)? {
            debug!(provider, model, "Embedding cache hit");
            return Ok(cached);
        }

        let embedding = self.embedder.embed(text).await?;
        self.store
            .cache_put(provider, model, text, workspace_id, &embedding)?;

        Ok(embedding)
    }

    /// Embed a batch of texts, fetching only cache misses from the provider.
    ///
    /// Output order matches input order. A provider failure leaves the cache
    /// untouched for the missed texts and propagates the error.
    pub async fn embed_batch(
        &self,
        texts: &[String],
        workspace_id: Option<Id>,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let provider = self.embedder.name();
        let model = self.embedder.model();

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut missed: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.store.cache_get(provider, model, text)? {
                Some(cached) => results[i] = Some(cached),
                None => missed.push(i),
            }
        }

        debug!(
            total = texts.len(),
            hits = texts.len() - missed.len(),
            misses = missed.len(),
            "Embedding batch cache lookup"
        );

        if !missed.is_empty() {
            let uncached: Vec<&str> = missed.iter().map(|&i| texts[i].as_str()).collect();
            let fresh = self.embedder.embed_batch(&uncached).await?;

            for (&i, embedding) in missed.iter().zip(fresh) {
                self.store
                    .cache_put(provider, model, &texts[i], workspace_id, &embedding)?;
                results[i] = Some(embedding);
            }
        }

        // Every slot is filled: hits above, misses just now.
        Ok(results.into_iter().flatten().collect())
    }
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("provider", &self.embedder.name())
            .field("model", &self.embedder.model())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_llm::MockEmbedder;

    fn service(embedder: Arc<MockEmbedder>) -> EmbeddingService {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        EmbeddingService::new(store, embedder)
    }

    #[tokio::test]
    async fn test_embed_caches_result() {
        let embedder = Arc::new(MockEmbedder::new(8));
        let service = service(embedder.clone());

        let first = service.embed("hello", None).await.unwrap();
        let second = service.embed("hello", None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(embedder.call_count(), 1);
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_order() {
        let embedder = Arc::new(MockEmbedder::new(8));
        let service = service(embedder.clone());

        let texts: Vec<String> = ["alpha", "beta", "gamma"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let batch = service.embed_batch(&texts, None).await.unwrap();
        assert_eq!(batch.len(), 3);

        for (text, embedding) in texts.iter().zip(&batch) {
            let single = service.embed(text, None).await.unwrap();
            assert_eq!(&single, embedding);
        }
    }

    #[tokio::test]
    async fn test_embed_batch_only_fetches_misses() {
        let embedder = Arc::new(MockEmbedder::new(8));
        let service = service(embedder.clone());

        service.embed("alpha", None).await.unwrap();
        let calls_after_single = embedder.call_count();

        let texts: Vec<String> = ["alpha", "beta"].iter().map(|s| s.to_string()).collect();
        service.embed_batch(&texts, None).await.unwrap();

        // Only "beta" should have reached the provider.
        assert_eq!(embedder.call_count(), calls_after_single + 1);
    }

    #[test]
    fn test_selection_settings_override_defaults() {
        let store = MemoryStore::open_in_memory().unwrap();

        let selection = EmbeddingSelection::resolve(&store, "openai", "text-embedding-3-small")
            .unwrap();
        assert_eq!(selection.provider, "openai");
        assert_eq!(selection.model, "text-embedding-3-small");

        store.set_setting(PROVIDER_SETTING, "mock").unwrap();
        store.set_setting(MODEL_SETTING, "mock-embedder").unwrap();

        let selection = EmbeddingSelection::resolve(&store, "openai", "text-embedding-3-small")
            .unwrap();
        assert_eq!(selection.provider, "mock");
        assert_eq!(selection.model, "mock-embedder");
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let embedder = Arc::new(MockEmbedder::new(8));
        let service = service(embedder.clone());

        let batch = service.embed_batch(&[], None).await.unwrap();
        assert!(batch.is_empty());
        assert_eq!(embedder.call_count(), 0);
    }
}
