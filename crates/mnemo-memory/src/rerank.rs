//! Result reranking.
//!
//! Reorders fused search hits by query relevance using the best mechanism
//! the configured provider offers:
//!
//! 1. A native rerank endpoint, when the provider exposes one.
//! 2. Per-document yes/no relevance judgments via completions.
//! 3. Pass-through: original fused order with synthetic descending scores.
//!
//! Fallback judgments fan out one completion per document, so an
//! unreachable provider is detected with a single health probe first
//! rather than one timeout per document.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use mnemo_llm::{CompletionRequest, Message, RerankEntry, SharedProvider};

use crate::error::Result;
use crate::fusion::FusedChunk;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the reranking service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    /// Whether reranking runs at all; disabled means pass-through.
    pub enabled: bool,
    /// Model used for fallback relevance judgments.
    pub model: String,
    /// Maximum tokens for each fallback judgment completion.
    pub judgment_max_tokens: u32,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gpt-4o-mini".to_string(),
            judgment_max_tokens: 8,
        }
    }
}

const JUDGMENT_SYSTEM_PROMPT: &str = "You judge whether a document is relevant to a query. \
Answer with exactly one word: yes or no.";

// ─────────────────────────────────────────────────────────────────────────────
// RerankService
// ─────────────────────────────────────────────────────────────────────────────

/// Reranks fused search results by query relevance.
pub struct RerankService {
    provider: Option<SharedProvider>,
    config: RerankConfig,
}

impl RerankService {
    pub fn new(provider: Option<SharedProvider>, config: RerankConfig) -> Self {
        Self { provider, config }
    }

    /// Pass-through service with no provider.
    pub fn passthrough() -> Self {
        Self {
            provider: None,
            config: RerankConfig {
                enabled: false,
                ..Default::default()
            },
        }
    }

    /// Rerank `results` by relevance to `query`, returning at most `top_k`.
    ///
    /// Falls back through the strategy chain; reranking never fails the
    /// search, the worst case is fused order.
    pub async fn rerank(
        &self,
        query: &str,
        results: Vec<FusedChunk>,
        top_k: usize,
    ) -> Result<Vec<FusedChunk>> {
        if results.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let provider = match (&self.provider, self.config.enabled) {
            (Some(provider), true) => provider,
            _ => return Ok(passthrough(results, top_k)),
        };

        if provider.supports_rerank() {
            let documents: Vec<String> = results.iter().map(|r| r.chunk.content.clone()).collect();
            match provider.rerank(query, &documents, top_k).await {
                Ok(entries) => return Ok(apply_entries(results, entries, top_k)),
                Err(e) => {
                    warn!(error = %e, "Native rerank failed, falling back to judgments");
                }
            }
        }

        // One completion per document; probe first so an unreachable
        // provider fails once instead of once per document.
        if provider.health_check().await.is_err() {
            debug!("Rerank provider unreachable, using fused order");
            return Ok(passthrough(results, top_k));
        }

        self.judgment_rerank(provider, query, results, top_k).await
    }

    async fn judgment_rerank(
        &self,
        provider: &SharedProvider,
        query: &str,
        results: Vec<FusedChunk>,
        top_k: usize,
    ) -> Result<Vec<FusedChunk>> {
        let mut scored: Vec<(usize, f32, FusedChunk)> = Vec::with_capacity(results.len());

        for (index, item) in results.into_iter().enumerate() {
            let prompt = format!(
                "Query: {query}\n\nDocument:\n{}\n\nIs this document relevant to the query?",
                item.chunk.content
            );
            let request = CompletionRequest::new(
                self.config.model.clone(),
                vec![Message::user(prompt)],
                self.config.judgment_max_tokens,
            )
            .with_system(JUDGMENT_SYSTEM_PROMPT);

            let score = match provider.complete(request).await {
                Ok(response) => parse_judgment(&response.text),
                Err(e) => {
                    warn!(error = %e, index, "Relevance judgment failed, scoring neutral");
                    0.5
                }
            };

            scored.push((index, score, item));
        }

        // Stable on the original fused order for equal scores.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, score, mut item)| {
                item.score = score;
                item
            })
            .collect())
    }
}

impl std::fmt::Debug for RerankService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RerankService")
            .field("config", &self.config)
            .field("has_provider", &self.provider.is_some())
            .finish()
    }
}

/// Original order with synthetic descending scores (1.0, 0.99, ...).
fn passthrough(results: Vec<FusedChunk>, top_k: usize) -> Vec<FusedChunk> {
    results
        .into_iter()
        .take(top_k)
        .enumerate()
        .map(|(i, mut item)| {
            item.score = 1.0 - (i as f32) * 0.01;
            item
        })
        .collect()
}

/// Reorder results according to provider rerank entries.
fn apply_entries(
    results: Vec<FusedChunk>,
    entries: Vec<RerankEntry>,
    top_k: usize,
) -> Vec<FusedChunk> {
    let mut slots: Vec<Option<FusedChunk>> = results.into_iter().map(Some).collect();

    entries
        .into_iter()
        .filter_map(|entry| {
            slots.get_mut(entry.index).and_then(|slot| {
                slot.take().map(|mut item| {
                    item.score = entry.score;
                    item
                })
            })
        })
        .take(top_k)
        .collect()
}

/// Map a yes/no judgment to a score; unparseable replies score neutral.
fn parse_judgment(text: &str) -> f32 {
    let normalized = text.trim().to_lowercase();
    if normalized.starts_with("yes") {
        1.0
    } else if normalized.starts_with("no") {
        0.0
    } else {
        0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChunkMetadata, ChunkRecord};
    use mnemo_llm::{CompletionResponse, MockProvider};
    use mnemo_types::{new_id, now};
    use std::sync::Arc;

    fn fused(content: &str) -> FusedChunk {
        FusedChunk {
            chunk: ChunkRecord {
                id: new_id(),
                document_id: new_id(),
                workspace_id: None,
                agent_id: None,
                collection: "general".to_string(),
                seq: 0,
                content: content.to_string(),
                content_hash: String::new(),
                embedding: vec![],
                metadata: ChunkMetadata::default(),
                created_at: now(),
            },
            score: 0.5,
        }
    }

    #[tokio::test]
    async fn test_passthrough_scores_descend() {
        let svc = RerankService::passthrough();
        let results = svc
            .rerank("query", vec![fused("a"), fused("b"), fused("c")], 10)
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].score, 1.0);
        assert!(results[0].score > results[1].score);
        assert!(results[1].score > results[2].score);
        assert_eq!(results[0].chunk.content, "a");
    }

    #[tokio::test]
    async fn test_native_rerank_applies_entries() {
        let provider: SharedProvider = Arc::new(
            MockProvider::new(vec![]).with_rerank_results(vec![
                RerankEntry { index: 2, score: 0.95 },
                RerankEntry { index: 0, score: 0.40 },
            ]),
        );
        let svc = RerankService::new(Some(provider), RerankConfig::default());

        let results = svc
            .rerank("query", vec![fused("a"), fused("b"), fused("c")], 10)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.content, "c");
        assert_eq!(results[0].score, 0.95);
        assert_eq!(results[1].chunk.content, "a");
    }

    #[tokio::test]
    async fn test_judgment_fallback_orders_by_verdict() {
        let provider: SharedProvider = Arc::new(MockProvider::new(vec![
            CompletionResponse::text("m", "no"),
            CompletionResponse::text("m", "yes"),
            CompletionResponse::text("m", "maybe?"),
        ]));
        let svc = RerankService::new(Some(provider), RerankConfig::default());

        let results = svc
            .rerank("query", vec![fused("a"), fused("b"), fused("c")], 10)
            .await
            .unwrap();

        // yes (1.0) > unparseable (0.5) > no (0.0)
        assert_eq!(results[0].chunk.content, "b");
        assert_eq!(results[1].chunk.content, "c");
        assert_eq!(results[2].chunk.content, "a");
    }

    #[tokio::test]
    async fn test_unreachable_provider_passthrough() {
        let provider: SharedProvider = Arc::new(MockProvider::unreachable());
        let svc = RerankService::new(Some(provider), RerankConfig::default());

        let results = svc
            .rerank("query", vec![fused("a"), fused("b")], 10)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.content, "a");
        assert_eq!(results[0].score, 1.0);
    }

    #[tokio::test]
    async fn test_top_k_truncates() {
        let svc = RerankService::passthrough();
        let results = svc
            .rerank("query", vec![fused("a"), fused("b"), fused("c")], 2)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_results() {
        let svc = RerankService::passthrough();
        let results = svc.rerank("query", vec![], 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_parse_judgment() {
        assert_eq!(parse_judgment("Yes"), 1.0);
        assert_eq!(parse_judgment(" yes, it is"), 1.0);
        assert_eq!(parse_judgment("No."), 0.0);
        assert_eq!(parse_judgment("I am not sure"), 0.5);
    }
}
