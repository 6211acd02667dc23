//! Document indexing and hybrid search.
//!
//! The top of the retrieval pipeline: chunk a document, embed the chunks
//! through the cache, and replace its rows atomically; at query time, run
//! vector and keyword retrieval and fuse the lists. Either retrieval source
//! may be absent (no vector index yet, FTS not compiled in) and search
//! degrades to whatever remains.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use mnemo_types::{new_id, now, Document, Id};

use crate::chunking::ChunkingService;
use crate::embedding::EmbeddingService;
use crate::error::Result;
use crate::fusion::{reciprocal_rank_fusion, FusedChunk};
use crate::store::{ChunkMetadata, ChunkRecord, MemoryStore, SearchFilter};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for hybrid search and index maintenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridSearchConfig {
    /// Weight of the vector-similarity source in fusion.
    pub semantic_weight: f32,
    /// Weight of the keyword source in fusion.
    pub keyword_weight: f32,
    /// Rank-smoothing constant for reciprocal rank fusion.
    pub rrf_k: f32,
    /// Minimum cosine similarity for a vector hit to count.
    pub min_similarity: f32,
    /// Embedding dimensionality above which no vector index is built and
    /// search falls back to a linear scan.
    pub max_indexed_dimensions: usize,
}

impl Default for HybridSearchConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.7,
            keyword_weight: 0.3,
            rrf_k: 60.0,
            min_similarity: 0.0,
            max_indexed_dimensions: 2_000,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DocumentIndexingService
// ─────────────────────────────────────────────────────────────────────────────

/// Indexes documents into the chunk store and serves hybrid search.
#[derive(Clone)]
pub struct DocumentIndexingService {
    store: Arc<MemoryStore>,
    embedding: EmbeddingService,
    chunking: ChunkingService,
    config: HybridSearchConfig,
}

impl DocumentIndexingService {
    pub fn new(
        store: Arc<MemoryStore>,
        embedding: EmbeddingService,
        chunking: ChunkingService,
        config: HybridSearchConfig,
    ) -> Self {
        Self {
            store,
            embedding,
            chunking,
            config,
        }
    }

    /// Index a document: chunk, embed, and replace its stored chunks.
    ///
    /// A document with empty (or whitespace-only) content is deindexed
    /// instead, so updating a document to empty removes it from search.
    /// Returns the number of chunks stored.
    pub async fn index(
        &self,
        document: &Document,
        collection: &str,
        agent_id: Option<Id>,
    ) -> Result<usize> {
        let texts = self.chunking.chunk(&document.content);
        if texts.is_empty() {
            let removed = self.deindex(document.id)?;
            debug!(document = %document.id, removed, "Empty document deindexed");
            return Ok(0);
        }

        let embeddings = self
            .embedding
            .embed_batch(&texts, document.workspace_id)
            .await?;

        let indexed = self.store.ensure_vector_index(
            self.embedding.dimensions(),
            self.config.max_indexed_dimensions,
        )?;
        if !indexed {
            warn!(
                dims = self.embedding.dimensions(),
                "Vector index unavailable, search will scan linearly"
            );
        }

        let metadata = ChunkMetadata {
            title: document.title.clone(),
            source_timestamp: Some(document.created_at),
        };

        let chunks: Vec<ChunkRecord> = texts
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(seq, (content, embedding))| ChunkRecord {
                id: new_id(),
                document_id: document.id,
                workspace_id: document.workspace_id,
                agent_id,
                collection: collection.to_string(),
                seq,
                content_hash: sha256_hex(&content),
                content,
                embedding,
                metadata: metadata.clone(),
                created_at: now(),
            })
            .collect();

        let count = chunks.len();
        self.store.replace_document_chunks(document.id, &chunks)?;

        info!(document = %document.id, chunks = count, collection, "Document indexed");
        Ok(count)
    }

    /// Remove a document's chunks from the index. Idempotent.
    pub fn deindex(&self, document_id: Id) -> Result<usize> {
        self.store.delete_document_chunks(document_id)
    }

    /// Hybrid search: vector and keyword retrieval fused by rank.
    ///
    /// `min_similarity` overrides the configured vector floor for this call;
    /// `None` uses the config default. When one source returns nothing (or
    /// is unavailable), results come from the other alone. Returns at most
    /// `limit` fused chunks, best first, top score normalized to 1.0.
    pub async fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
        min_similarity: Option<f32>,
    ) -> Result<Vec<FusedChunk>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let similarity_floor = min_similarity.unwrap_or(self.config.min_similarity);

        // An embedding failure narrows search to keyword-only rather than
        // failing the query outright.
        let vector_hits = match self.embedding.embed(query, filter.workspace_id).await {
            Ok(query_embedding) => {
                self.store
                    .vector_search(&query_embedding, filter, limit, similarity_floor)?
            }
            Err(e) => {
                warn!(error = %e, "Query embedding failed, keyword-only search");
                Vec::new()
            }
        };

        let keyword_hits = if self.store.has_fts() {
            self.store.keyword_search(query, filter, limit)?
        } else {
            Vec::new()
        };

        debug!(
            vector = vector_hits.len(),
            keyword = keyword_hits.len(),
            "Hybrid search sources"
        );

        let mut fused = reciprocal_rank_fusion(
            vector_hits,
            keyword_hits,
            self.config.semantic_weight,
            self.config.keyword_weight,
            self.config.rrf_k,
            limit,
        );
        fused.truncate(limit);

        Ok(fused)
    }

    /// Wipe embeddings, optionally scoped to one workspace.
    ///
    /// Required after switching embedding model or provider, since stored
    /// vectors from different models are not comparable.
    pub fn reset(&self, workspace_id: Option<Id>) -> Result<()> {
        self.store.reset_embeddings(workspace_id)
    }
}

impl std::fmt::Debug for DocumentIndexingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentIndexingService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
