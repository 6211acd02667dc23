//! Vector and keyword retrieval over chunks.
//!
//! Both retrievals honor the same [`SearchFilter`] and return ranked chunk
//! lists; fusion happens above the store. Vector search prefers the vec0
//! index and falls back to a linear scan when no index exists (oversized
//! dimensions or none created yet). Keyword search requires FTS5; callers
//! check `has_fts()` and skip the source when absent.

use rusqlite::params;
use tracing::debug;
use zerocopy::IntoBytes;

use mnemo_llm::cosine_similarity;
use mnemo_types::Id;

use crate::error::Result;

use super::chunk_ops::row_to_chunk;
use super::{ChunkRecord, MemoryStore};

/// Over-fetch multiplier applied before post-filtering ranked candidates.
const CANDIDATE_FACTOR: usize = 4;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Scope filters applied to both retrieval sources.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Restrict to a collection namespace.
    pub collection: Option<String>,
    /// Restrict to a workspace/tenant.
    pub workspace_id: Option<Id>,
    /// Agent for ownership scoping.
    pub agent_id: Option<Id>,
    /// When true, only shared chunks and chunks owned by `agent_id` match.
    pub scope_by_agent: bool,
}

impl SearchFilter {
    fn matches(&self, chunk: &ChunkRecord) -> bool {
        if let Some(ref collection) = self.collection {
            if &chunk.collection != collection {
                return false;
            }
        }
        if let Some(workspace_id) = self.workspace_id {
            if chunk.workspace_id != Some(workspace_id) {
                return false;
            }
        }
        if self.scope_by_agent {
            match chunk.agent_id {
                None => {}
                Some(owner) => {
                    if self.agent_id != Some(owner) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// A chunk with a source-specific relevance score (higher is better).
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub chunk: ChunkRecord,
    pub score: f32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Vector search
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Rank chunks by cosine similarity to the query vector.
    ///
    /// Uses the vec0 index when present, otherwise scans embeddings stored
    /// inline on the chunk rows. Results below `min_similarity` are dropped.
    pub fn vector_search(
        &self,
        query: &[f32],
        filter: &SearchFilter,
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<RankedChunk>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        if self.vector_dims.lock().unwrap().is_some() {
            self.vector_search_indexed(query, filter, limit, min_similarity)
        } else {
            self.vector_search_linear(query, filter, limit, min_similarity)
        }
    }

    fn vector_search_indexed(
        &self,
        query: &[f32],
        filter: &SearchFilter,
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<RankedChunk>> {
        let conn = self.conn.lock().unwrap();

        // Fetch extra candidates to allow for post-filtering.
        let mut stmt = conn.prepare(
            r#"
            SELECT chunk_id, distance
            FROM chunk_embeddings
            WHERE embedding MATCH ?1
            ORDER BY distance
            LIMIT ?2
            "#,
        )?;

        let mut rows = stmt.query(params![
            query.as_bytes(),
            (limit * CANDIDATE_FACTOR) as i64
        ])?;

        let mut candidates: Vec<(String, f32)> = Vec::new();
        while let Some(row) = rows.next()? {
            let chunk_id: String = row.get(0)?;
            let distance: f32 = row.get(1)?;
            candidates.push((chunk_id, distance));
        }
        drop(rows);
        drop(stmt);

        let mut results = Vec::new();
        for (chunk_id, distance) in candidates {
            // Cosine distance -> similarity
            let similarity = 1.0 - distance;
            if similarity < min_similarity {
                continue;
            }

            let Some(chunk) = load_chunk(&conn, &chunk_id)? else {
                continue; // index row outlived its chunk
            };
            if !filter.matches(&chunk) {
                continue;
            }

            results.push(RankedChunk {
                chunk,
                score: similarity,
            });
            if results.len() >= limit {
                break;
            }
        }

        debug!(hits = results.len(), limit, "Vector search (indexed)");
        Ok(results)
    }

    /// Linear-scan fallback when no vector index exists.
    fn vector_search_linear(
        &self,
        query: &[f32],
        filter: &SearchFilter,
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<RankedChunk>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            r#"
            SELECT id, document_id, workspace_id, agent_id, collection, seq,
                   content, content_hash, embedding, metadata, created_at
            FROM chunks
            "#,
        )?;

        let mut rows = stmt.query([])?;
        let mut results: Vec<RankedChunk> = Vec::new();

        while let Some(row) = rows.next()? {
            let chunk = row_to_chunk(row)?;
            if !filter.matches(&chunk) {
                continue;
            }

            let similarity = cosine_similarity(query, &chunk.embedding);
            if similarity < min_similarity {
                continue;
            }

            results.push(RankedChunk {
                chunk,
                score: similarity,
            });
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);

        debug!(hits = results.len(), limit, "Vector search (linear scan)");
        Ok(results)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyword search
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Rank chunks by full-text relevance to the query.
    ///
    /// The query is reduced to a conjunctive term set; a query with no
    /// usable terms short-circuits to empty results. Callers should check
    /// [`MemoryStore::has_fts`] and skip this source when FTS is absent.
    pub fn keyword_search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<RankedChunk>> {
        if !self.fts_available || limit == 0 {
            return Ok(Vec::new());
        }

        let Some(match_expr) = sanitize_fts_query(query) else {
            return Ok(Vec::new());
        };

        let conn = self.conn.lock().unwrap();

        // bm25 is a cost: lower is more relevant.
        let mut stmt = conn.prepare(
            r#"
            SELECT chunk_id, bm25(chunks_fts) AS cost
            FROM chunks_fts
            WHERE chunks_fts MATCH ?1
            ORDER BY cost
            LIMIT ?2
            "#,
        )?;

        let mut rows = stmt.query(params![match_expr, (limit * CANDIDATE_FACTOR) as i64])?;

        let mut candidates: Vec<(String, f32)> = Vec::new();
        while let Some(row) = rows.next()? {
            let chunk_id: String = row.get(0)?;
            let cost: f64 = row.get(1)?;
            candidates.push((chunk_id, -cost as f32));
        }
        drop(rows);
        drop(stmt);

        let mut results = Vec::new();
        for (chunk_id, score) in candidates {
            let Some(chunk) = load_chunk(&conn, &chunk_id)? else {
                continue;
            };
            if !filter.matches(&chunk) {
                continue;
            }

            results.push(RankedChunk { chunk, score });
            if results.len() >= limit {
                break;
            }
        }

        debug!(hits = results.len(), limit, "Keyword search");
        Ok(results)
    }
}

/// Reduce a free-form query to a conjunctive FTS5 term expression.
///
/// Strips non-alphanumeric characters, drops single-character tokens, and
/// ANDs the rest. Returns `None` when no usable terms remain.
fn sanitize_fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(|t| format!("\"{}\"", t))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" AND "))
    }
}

fn load_chunk(conn: &rusqlite::Connection, chunk_id: &str) -> Result<Option<ChunkRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, document_id, workspace_id, agent_id, collection, seq,
               content, content_hash, embedding, metadata, created_at
        FROM chunks
        WHERE id = ?1
        "#,
    )?;

    let mut rows = stmt.query(params![chunk_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_chunk(row)?)),
        None => Ok(None),
    }
}
