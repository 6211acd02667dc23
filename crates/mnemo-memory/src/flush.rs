//! Pre-compaction memory flush.
//!
//! Shortly before a conversation crosses the compaction threshold, the agent
//! gets one last chance to persist anything important: a fixed instructional
//! prompt is sent through the provider, whose tool loop handles any memory
//! writes. The completion text itself is discarded. Flushes are rate-limited
//! per compaction cycle via the summary row's flush counter, which resets
//! when a compaction lands.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use mnemo_llm::{CompletionRequest, Message, SharedProvider};
use mnemo_types::Id;

use crate::error::Result;
use crate::store::MemoryStore;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for pre-compaction flushing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Whether flushing runs at all.
    pub enabled: bool,
    /// Width of the token zone below the compaction threshold in which a
    /// flush fires.
    pub soft_zone_tokens: usize,
    /// Maximum flushes between two compactions.
    pub max_flushes_per_cycle: usize,
    /// Token budget for the flush completion.
    pub flush_max_tokens: u32,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            soft_zone_tokens: 1_024,
            max_flushes_per_cycle: 1,
            flush_max_tokens: 512,
        }
    }
}

const FLUSH_PROMPT: &str = "Older messages in this conversation will soon be folded into a \
summary. Review the recent discussion and save any facts, decisions, or preferences worth \
keeping with your memory tools now. If nothing needs saving, reply briefly and do nothing.";

// ─────────────────────────────────────────────────────────────────────────────
// MemoryFlushService
// ─────────────────────────────────────────────────────────────────────────────

/// Triggers agent memory flushes ahead of compaction.
pub struct MemoryFlushService {
    store: Arc<MemoryStore>,
    provider: SharedProvider,
    config: FlushConfig,
}

impl MemoryFlushService {
    pub fn new(store: Arc<MemoryStore>, provider: SharedProvider, config: FlushConfig) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    pub fn config(&self) -> &FlushConfig {
        &self.config
    }

    /// Whether the conversation sits in the soft zone and still has flush
    /// budget for this cycle.
    ///
    /// The soft zone is `[threshold - soft_zone_tokens, threshold)`: close
    /// enough that compaction is imminent, but not yet past it. At or past
    /// the threshold, compaction takes over and flushing is pointless.
    pub fn should_flush(
        &self,
        estimated_tokens: usize,
        threshold_tokens: usize,
        flushes_this_cycle: usize,
    ) -> bool {
        if !self.config.enabled {
            return false;
        }
        if flushes_this_cycle >= self.config.max_flushes_per_cycle {
            return false;
        }

        let zone_start = threshold_tokens.saturating_sub(self.config.soft_zone_tokens);
        estimated_tokens >= zone_start && estimated_tokens < threshold_tokens
    }

    /// Send the flush prompt and record the flush.
    ///
    /// The completion text is discarded; any memory writes happen through
    /// the provider's tool loop. Returns the flush count for this cycle.
    pub async fn flush(&self, channel_id: Id, agent_id: Id, model: &str) -> Result<usize> {
        let request = CompletionRequest::new(
            model,
            vec![Message::user(FLUSH_PROMPT)],
            self.config.flush_max_tokens,
        );

        let response = self.provider.complete(request).await?;
        debug!(
            channel = %channel_id,
            reply_len = response.text.len(),
            "Flush reply discarded"
        );

        let count = self.store.record_flush(channel_id, agent_id)?;
        info!(channel = %channel_id, agent = %agent_id, cycle_flushes = count, "Memory flush recorded");
        Ok(count)
    }
}

impl std::fmt::Debug for MemoryFlushService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFlushService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_llm::MockProvider;
    use mnemo_types::new_id;

    fn service(provider: Arc<MockProvider>, config: FlushConfig) -> MemoryFlushService {
        MemoryFlushService::new(
            Arc::new(MemoryStore::open_in_memory().unwrap()),
            provider,
            config,
        )
    }

    #[test]
    fn test_should_flush_inside_soft_zone() {
        let svc = service(Arc::new(MockProvider::with_text("ok")), FlushConfig::default());

        // Threshold 5000, zone [3976, 5000)
        assert!(!svc.should_flush(3000, 5000, 0));
        assert!(svc.should_flush(4000, 5000, 0));
        assert!(svc.should_flush(4999, 5000, 0));
        assert!(!svc.should_flush(5000, 5000, 0));
        assert!(!svc.should_flush(6000, 5000, 0));
    }

    #[test]
    fn test_should_flush_respects_cycle_budget() {
        let svc = service(Arc::new(MockProvider::with_text("ok")), FlushConfig::default());
        assert!(svc.should_flush(4500, 5000, 0));
        assert!(!svc.should_flush(4500, 5000, 1));
    }

    #[test]
    fn test_should_flush_disabled() {
        let config = FlushConfig {
            enabled: false,
            ..Default::default()
        };
        let svc = service(Arc::new(MockProvider::with_text("ok")), config);
        assert!(!svc.should_flush(4500, 5000, 0));
    }

    #[tokio::test]
    async fn test_flush_sends_prompt_and_records() {
        let provider = Arc::new(MockProvider::with_text("saved two facts"));
        let svc = service(provider.clone(), FlushConfig::default());
        let channel = new_id();
        let agent = new_id();

        let count = svc.flush(channel, agent, "gpt-4").await.unwrap();
        assert_eq!(count, 1);

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].messages[0].content.contains("memory tools"));

        let summary = svc.store.get_summary(channel, agent).unwrap().unwrap();
        assert_eq!(summary.flush_count, 1);
    }

    #[tokio::test]
    async fn test_flush_provider_failure_does_not_record() {
        let provider = Arc::new(MockProvider::unreachable());
        let svc = service(provider, FlushConfig::default());
        let channel = new_id();
        let agent = new_id();

        assert!(svc.flush(channel, agent, "gpt-4").await.is_err());
        assert!(svc.store.get_summary(channel, agent).unwrap().is_none());
    }
}
