//! LLM and embedding provider abstraction for Mnemo.
//!
//! This crate defines the narrow provider surface the memory subsystem
//! consumes: "complete prompt → text", "embed text → vector", and optionally
//! "rerank documents → ranked list". Concrete providers are swappable; mock
//! implementations support deterministic tests.

pub mod embeddings;
pub mod error;
pub mod provider;
pub mod types;

pub use embeddings::{
    cosine_similarity, Embedder, MockEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig,
    SharedEmbedder,
};
pub use error::{is_retryable, LlmError, Result};
pub use provider::{with_retry, LlmProvider, MockProvider, SharedProvider};
pub use types::{CompletionRequest, CompletionResponse, Message, RerankEntry, Role};
