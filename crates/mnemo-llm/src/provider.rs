//! LLM provider trait and implementations.
//!
//! This module defines the abstraction the memory subsystem uses for model
//! completions and (when available) dedicated reranking, along with a mock
//! implementation for deterministic testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{is_retryable, LlmError, Result};
use crate::types::{CompletionRequest, CompletionResponse, RerankEntry};

// ─────────────────────────────────────────────────────────────────────────────
// Retry helper
// ─────────────────────────────────────────────────────────────────────────────

/// Execute an async operation with exponential backoff retry.
///
/// Retries only on transient errors (network failures). Non-retryable errors
/// are returned immediately.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    provider_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_error = None;
    let mut backoff = initial_backoff;

    for attempt in 0..=max_retries {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !is_retryable(&e) {
                    return Err(e);
                }

                last_error = Some(e);

                if attempt < max_retries {
                    tracing::warn!(
                        provider = provider_name,
                        attempt = attempt + 1,
                        max_retries = max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    Err(last_error.unwrap())
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for LLM providers.
///
/// Implementations connect to a concrete model service. Providers may
/// optionally expose a dedicated reranking endpoint; the reranking service
/// falls back to per-document relevance judgments when they don't.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute a completion request and return the full response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Check if the provider is reachable and properly configured.
    ///
    /// Used as a fast connectivity probe before fan-out operations so an
    /// unreachable backend fails over immediately instead of timing out once
    /// per document.
    async fn health_check(&self) -> Result<()>;

    /// Whether this provider exposes a dedicated reranking endpoint.
    fn supports_rerank(&self) -> bool {
        false
    }

    /// Rerank documents by relevance to the query.
    ///
    /// Returns entries sorted by descending relevance, truncated to `top_k`.
    /// Only called when `supports_rerank()` is true.
    async fn rerank(
        &self,
        _query: &str,
        _documents: &[String],
        _top_k: usize,
    ) -> Result<Vec<RerankEntry>> {
        Err(LlmError::Unsupported(format!(
            "provider '{}' has no rerank endpoint",
            self.name()
        )))
    }
}

/// A provider that can be shared across threads.
pub type SharedProvider = Arc<dyn LlmProvider>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock provider
// ─────────────────────────────────────────────────────────────────────────────

/// A mock provider for testing purposes.
///
/// Returns pre-configured responses in order and records every request,
/// useful for deterministic testing of compaction, flushing, and reranking.
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    responses: std::sync::Mutex<Vec<CompletionResponse>>,
    request_log: std::sync::Mutex<Vec<CompletionRequest>>,
    rerank_results: Option<Vec<RerankEntry>>,
    healthy: bool,
    fail_completions: bool,
}

impl MockProvider {
    /// Create a new mock provider with the given responses.
    ///
    /// Responses are returned in order. If more requests are made than
    /// responses available, an error is returned.
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            name: "mock".to_string(),
            responses: std::sync::Mutex::new(responses),
            request_log: std::sync::Mutex::new(Vec::new()),
            rerank_results: None,
            healthy: true,
            fail_completions: false,
        }
    }

    /// Create a mock provider with a single text response.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![CompletionResponse::text("mock-model", text)])
    }

    /// Create a mock provider that returns the same text for every request.
    pub fn repeating(text: impl Into<String>, count: usize) -> Self {
        let text = text.into();
        Self::new(
            (0..count)
                .map(|_| CompletionResponse::text("mock-model", text.clone()))
                .collect(),
        )
    }

    /// Create a mock provider whose health check and completions fail.
    pub fn unreachable() -> Self {
        let mut p = Self::new(vec![]);
        p.healthy = false;
        p.fail_completions = true;
        p
    }

    /// Configure a native rerank endpoint returning the given entries.
    pub fn with_rerank_results(mut self, results: Vec<RerankEntry>) -> Self {
        self.rerank_results = Some(results);
        self
    }

    /// Get all requests that were made to this provider.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.request_log.lock().unwrap().clone()
    }

    /// Get the number of requests made.
    pub fn request_count(&self) -> usize {
        self.request_log.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.request_log.lock().unwrap().push(request);

        if self.fail_completions {
            return Err(LlmError::Provider(
                "MockProvider: completions disabled".to_string(),
            ));
        }

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(LlmError::Provider(
                "MockProvider: no more responses available".to_string(),
            ));
        }
        Ok(responses.remove(0))
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> Result<()> {
        if self.healthy {
            Ok(())
        } else {
            Err(LlmError::Provider("MockProvider: unhealthy".to_string()))
        }
    }

    fn supports_rerank(&self) -> bool {
        self.rerank_results.is_some()
    }

    async fn rerank(
        &self,
        _query: &str,
        _documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankEntry>> {
        match &self.rerank_results {
            Some(results) => Ok(results.iter().take(top_k).cloned().collect()),
            None => Err(LlmError::Unsupported("no rerank endpoint".to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[tokio::test]
    async fn test_mock_provider_single_response() {
        let provider = MockProvider::with_text("Hello!");

        let request = CompletionRequest::new("test-model", vec![Message::user("Hi")], 100);
        let response = provider.complete(request).await.unwrap();

        assert_eq!(response.text, "Hello!");
        assert_eq!(provider.request_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_provider_exhausted() {
        let provider = MockProvider::new(vec![]);

        let request = CompletionRequest::new("test-model", vec![Message::user("Hi")], 100);
        assert!(provider.complete(request).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_provider_unreachable() {
        let provider = MockProvider::unreachable();
        assert!(provider.health_check().await.is_err());

        let request = CompletionRequest::new("test-model", vec![Message::user("Hi")], 100);
        assert!(provider.complete(request).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_provider_rerank() {
        let provider = MockProvider::with_text("unused").with_rerank_results(vec![
            RerankEntry { index: 2, score: 0.9 },
            RerankEntry { index: 0, score: 0.4 },
        ]);

        assert!(provider.supports_rerank());
        let docs = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let ranked = provider.rerank("query", &docs, 10).await.unwrap();
        assert_eq!(ranked[0].index, 2);
        assert_eq!(ranked.len(), 2);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_on_non_retryable() {
        let mut calls = 0u32;
        let result: Result<()> = with_retry(3, Duration::from_millis(1), "test", || {
            calls += 1;
            async { Err(LlmError::Config("bad".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_first_try() {
        let result = with_retry(3, Duration::from_millis(1), "test", || async {
            Ok::<_, LlmError>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }
}
