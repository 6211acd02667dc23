//! Memory and retrieval subsystem.
//!
//! Long-term memory for conversational agents, built around a single SQLite
//! file:
//!
//! - **Indexing**: documents are chunked, embedded (through a persistent
//!   cache), and stored for retrieval ([`indexing`], [`chunking`],
//!   [`embedding`]).
//! - **Search**: hybrid vector + keyword retrieval fused by rank, with an
//!   optional reranking pass ([`fusion`], [`rerank`]).
//! - **Compaction**: conversations that outgrow their model's context
//!   window are folded into rolling summaries, with a pre-compaction flush
//!   so agents can persist important facts first ([`compaction`],
//!   [`flush`], [`context_window`]).
//! - **Scoping**: memory tools are gated by channel privacy ([`scope`]).

pub mod chunking;
pub mod compaction;
pub mod config;
pub mod context_window;
pub mod embedding;
pub mod error;
pub mod flush;
pub mod fusion;
pub mod indexing;
pub mod rerank;
pub mod scope;
pub mod store;
pub mod tokens;

pub use chunking::{ChunkingConfig, ChunkingService};
pub use compaction::{CompactionConfig, CompactionOutcome, ConversationCompactionService};
pub use config::MemoryConfig;
pub use context_window::{ContextWindowConfig, ModelContextRegistry};
pub use embedding::{EmbeddingSelection, EmbeddingService};
pub use error::{MemoryError, Result};
pub use flush::{FlushConfig, MemoryFlushService};
pub use fusion::{reciprocal_rank_fusion, FusedChunk};
pub use indexing::{DocumentIndexingService, HybridSearchConfig};
pub use rerank::{RerankConfig, RerankService};
pub use scope::{can_use_memory_tools, MemoryScopeMode, MEMORY_SCOPE_DENIAL};
pub use store::{
    init_vector_extension, ChunkMetadata, ChunkRecord, ConversationSummary, MemoryStore,
    RankedChunk, SearchFilter, StoreStats,
};
pub use tokens::{estimate_tokens, estimate_tokens_all};
