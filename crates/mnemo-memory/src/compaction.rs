//! Conversation compaction.
//!
//! When a conversation's estimated footprint approaches the model's context
//! window, older messages are folded into a rolling summary and dropped from
//! the live context. The summary row's watermark records the last message
//! folded in; compaction only ever considers messages past it, and a
//! compare-and-swap on the watermark keeps concurrent compactions of the
//! same conversation from double-summarizing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use mnemo_llm::{CompletionRequest, Message, SharedProvider};
use mnemo_types::{ChannelMessage, Id};

use crate::context_window::ModelContextRegistry;
use crate::error::{MemoryError, Result};
use crate::store::{ConversationSummary, MemoryStore};
use crate::tokens::{estimate_tokens, estimate_tokens_all};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for conversation compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Whether compaction runs at all.
    pub enabled: bool,
    /// Fraction of the usable window at which compaction triggers.
    pub threshold_ratio: f32,
    /// Multiplier applied to token estimates to absorb estimation error.
    pub safety_margin: f32,
    /// Token budget of recent messages kept verbatim after compaction.
    pub keep_recent_tokens: usize,
    /// Minimum messages worth summarizing; below this, compaction is skipped.
    pub min_messages: usize,
    /// Tokens reserved for the model's reply.
    pub output_reserve_tokens: usize,
    /// Tokens reserved for the system prompt and tool definitions.
    pub system_reserve_tokens: usize,
    /// Maximum tokens requested for the summary completion.
    pub summary_max_tokens: u32,
    /// Model used for summarization; `None` uses the conversation's model.
    pub summary_model: Option<String>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_ratio: 0.75,
            safety_margin: 1.2,
            keep_recent_tokens: 2_048,
            min_messages: 5,
            output_reserve_tokens: 1_024,
            system_reserve_tokens: 1_024,
            summary_max_tokens: 512,
            summary_model: None,
        }
    }
}

const SUMMARY_SYSTEM_PROMPT: &str = "You maintain a running summary of a conversation. \
Produce a concise summary that preserves decisions, open questions, names, and facts \
the participants will need later. Fold the previous summary and the new messages into \
a single coherent summary. Respond with the summary text only.";

// ─────────────────────────────────────────────────────────────────────────────
// ConversationCompactionService
// ─────────────────────────────────────────────────────────────────────────────

/// The outcome of a successful compaction pass.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub summary: ConversationSummary,
    /// Messages folded into the summary by this pass.
    pub messages_compacted: usize,
    /// Recent messages left in the live context.
    pub messages_kept: usize,
}

/// Folds older conversation history into rolling summaries.
pub struct ConversationCompactionService {
    store: Arc<MemoryStore>,
    provider: SharedProvider,
    registry: ModelContextRegistry,
    config: CompactionConfig,
}

impl ConversationCompactionService {
    pub fn new(
        store: Arc<MemoryStore>,
        provider: SharedProvider,
        registry: ModelContextRegistry,
        config: CompactionConfig,
    ) -> Self {
        Self {
            store,
            provider,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Usable token budget for conversation content on the given model.
    ///
    /// The system prompt is estimated when supplied; otherwise the fixed
    /// reserve stands in for it.
    pub fn usable_window(&self, model: &str, system_prompt: Option<&str>) -> usize {
        let system_tokens = system_prompt
            .map(estimate_tokens)
            .unwrap_or(self.config.system_reserve_tokens);
        self.registry
            .context_window(model)
            .saturating_sub(self.config.output_reserve_tokens)
            .saturating_sub(system_tokens)
    }

    /// Compaction trigger point in tokens for the given model.
    pub fn threshold_tokens(&self, model: &str, system_prompt: Option<&str>) -> usize {
        (self.usable_window(model, system_prompt) as f32 * self.config.threshold_ratio) as usize
    }

    /// Estimated conversation footprint, with the safety margin applied.
    pub fn estimated_tokens(
        &self,
        summary: Option<&ConversationSummary>,
        messages: &[ChannelMessage],
    ) -> usize {
        let raw = summary.map(|s| estimate_tokens(&s.summary)).unwrap_or(0)
            + estimate_tokens_all(messages.iter().map(|m| m.content.as_str()));
        (raw as f32 * self.config.safety_margin).ceil() as usize
    }

    /// Whether the conversation has grown enough to warrant compaction.
    ///
    /// Always false when disabled or for very small message sets.
    pub fn needs_compaction(
        &self,
        model: &str,
        system_prompt: Option<&str>,
        summary: Option<&ConversationSummary>,
        messages: &[ChannelMessage],
    ) -> bool {
        if !self.config.enabled || messages.len() < self.config.min_messages {
            return false;
        }
        self.estimated_tokens(summary, messages) >= self.threshold_tokens(model, system_prompt)
    }

    /// Compact a conversation, folding older messages into the summary.
    ///
    /// `messages` is the full live history for the (channel, agent) pair in
    /// chronological order; anything at or before the stored watermark is
    /// ignored. Returns `None` when there is nothing worth compacting: fewer
    /// than `min_messages` messages would be summarized.
    ///
    /// If another compaction lands first the watermark check fails and this
    /// pass discards its own result in favor of the stored one.
    pub async fn compact(
        &self,
        channel_id: Id,
        agent_id: Id,
        model: &str,
        messages: &[ChannelMessage],
    ) -> Result<Option<CompactionOutcome>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let previous = self.store.get_summary(channel_id, agent_id)?;
        let watermark = previous.as_ref().and_then(|s| s.last_message_id);

        let pending = messages_past_watermark(messages, watermark);
        let keep_from = self.keep_boundary(pending);
        let (to_summarize, kept) = pending.split_at(keep_from);

        if to_summarize.len() < self.config.min_messages {
            debug!(
                channel = %channel_id,
                candidates = to_summarize.len(),
                "Too few messages to compact"
            );
            return Ok(None);
        }

        let previous_text = previous.as_ref().map(|s| s.summary.as_str()).unwrap_or("");
        let tokens_before = estimate_tokens(previous_text)
            + estimate_tokens_all(pending.iter().map(|m| m.content.as_str()));

        let summary_text = match self
            .summarize(model, previous_text, to_summarize)
            .await
        {
            Ok(text) => text,
            Err(e) if !previous_text.is_empty() => {
                // Keep the conversation shrinking even when the summarizer is
                // down: reuse the previous summary and advance the watermark.
                warn!(
                    channel = %channel_id,
                    error = %e,
                    "Summarization failed, retaining previous summary"
                );
                previous_text.to_string()
            }
            Err(e) => return Err(e.into()),
        };

        let tokens_after = estimate_tokens(&summary_text)
            + estimate_tokens_all(kept.iter().map(|m| m.content.as_str()));
        let new_watermark = to_summarize
            .last()
            .map(|m| m.id)
            .ok_or_else(|| MemoryError::InvalidData("empty compaction batch".to_string()))?;

        let summary = match self.store.apply_compaction(
            channel_id,
            agent_id,
            &summary_text,
            tokens_before,
            tokens_after,
            to_summarize.len(),
            watermark,
            new_watermark,
        ) {
            Ok(summary) => summary,
            Err(MemoryError::Conflict(reason)) => {
                debug!(channel = %channel_id, reason, "Lost compaction race, using stored summary");
                return Ok(self
                    .store
                    .get_summary(channel_id, agent_id)?
                    .map(|summary| CompactionOutcome {
                        summary,
                        messages_compacted: 0,
                        messages_kept: kept.len(),
                    }));
            }
            Err(e) => return Err(e),
        };

        info!(
            channel = %channel_id,
            compacted = to_summarize.len(),
            kept = kept.len(),
            tokens_before,
            tokens_after,
            "Conversation compacted"
        );

        Ok(Some(CompactionOutcome {
            summary,
            messages_compacted: to_summarize.len(),
            messages_kept: kept.len(),
        }))
    }

    /// Index of the first message kept verbatim, walking newest to oldest
    /// until the keep-recent budget is spent. The newest message is always
    /// kept, even when it alone exceeds the budget.
    fn keep_boundary(&self, pending: &[ChannelMessage]) -> usize {
        let mut tokens = 0;
        let mut boundary = pending.len();

        for (i, message) in pending.iter().enumerate().rev() {
            let message_tokens = estimate_tokens(&message.content);
            if tokens + message_tokens > self.config.keep_recent_tokens {
                break;
            }
            tokens += message_tokens;
            boundary = i;
        }

        if boundary == pending.len() && !pending.is_empty() {
            boundary = pending.len() - 1;
        }
        boundary
    }

    async fn summarize(
        &self,
        model: &str,
        previous_summary: &str,
        messages: &[ChannelMessage],
    ) -> std::result::Result<String, mnemo_llm::LlmError> {
        let mut transcript = String::new();
        if !previous_summary.is_empty() {
            transcript.push_str("Previous summary:\n");
            transcript.push_str(previous_summary);
            transcript.push_str("\n\nNew messages:\n");
        }
        for message in messages {
            transcript.push_str(&message.author);
            transcript.push_str(": ");
            transcript.push_str(&message.content);
            transcript.push('\n');
        }

        let summary_model = self
            .config
            .summary_model
            .as_deref()
            .unwrap_or(model)
            .to_string();

        let request = CompletionRequest::new(
            summary_model,
            vec![Message::user(transcript)],
            self.config.summary_max_tokens,
        )
        .with_system(SUMMARY_SYSTEM_PROMPT);

        let response = self.provider.complete(request).await?;
        Ok(response.text.trim().to_string())
    }
}

impl std::fmt::Debug for ConversationCompactionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationCompactionService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Messages strictly after the watermark; the full slice when the watermark
/// is absent or no longer present in the history.
fn messages_past_watermark(
    messages: &[ChannelMessage],
    watermark: Option<Id>,
) -> &[ChannelMessage] {
    match watermark {
        Some(id) => match messages.iter().position(|m| m.id == id) {
            Some(pos) => &messages[pos + 1..],
            None => messages,
        },
        None => messages,
    }
}
