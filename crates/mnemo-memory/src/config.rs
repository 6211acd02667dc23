//! Aggregate configuration for the memory subsystem.
//!
//! One serde-friendly struct bundling every service's options, so a host
//! application can deserialize the whole subsystem's configuration from a
//! single section of its config file. Every field has a working default.

use serde::{Deserialize, Serialize};

use crate::chunking::ChunkingConfig;
use crate::compaction::CompactionConfig;
use crate::context_window::ContextWindowConfig;
use crate::flush::FlushConfig;
use crate::indexing::HybridSearchConfig;
use crate::rerank::RerankConfig;
use crate::scope::MemoryScopeMode;

/// Configuration for the whole memory subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub chunking: ChunkingConfig,
    pub context_window: ContextWindowConfig,
    pub search: HybridSearchConfig,
    pub compaction: CompactionConfig,
    pub flush: FlushConfig,
    pub rerank: RerankConfig,
    pub scope_mode: MemoryScopeMode,
    /// Fallback embedding provider when no admin setting is present.
    pub embedding_provider: String,
    /// Fallback embedding model when no admin setting is present.
    pub embedding_model: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            context_window: ContextWindowConfig::default(),
            search: HybridSearchConfig::default(),
            compaction: CompactionConfig::default(),
            flush: FlushConfig::default(),
            rerank: RerankConfig::default(),
            scope_mode: MemoryScopeMode::default(),
            embedding_provider: "openai".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}
