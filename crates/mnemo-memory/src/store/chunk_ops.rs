//! Chunk persistence and vector-index lifecycle.

use rusqlite::{params, Connection, Row};
use tracing::{debug, info, warn};

use mnemo_types::Id;

use crate::error::{MemoryError, Result};

use super::{
    embedding_from_bytes, embedding_to_bytes, parse_id, parse_timestamp, ChunkRecord, MemoryStore,
};

impl MemoryStore {
    /// Lazily create the vector index once embedding dimensionality is known.
    ///
    /// Returns whether an index is in place after the call. Dimensions above
    /// `max_indexed_dimensions` skip index creation and fall back to a linear
    /// scan at query time rather than failing indexing.
    ///
    /// A dimensionality different from an existing index is an error: vectors
    /// from different embedding models are not comparable, and the caller
    /// must run a model reset first.
    pub fn ensure_vector_index(&self, dims: usize, max_indexed_dimensions: usize) -> Result<bool> {
        let mut current = self.vector_dims.lock().unwrap();

        if let Some(existing) = *current {
            if existing == dims {
                return Ok(true);
            }
            return Err(MemoryError::InvalidData(format!(
                "vector index has {existing} dimensions but embeddings have {dims}; \
                 run a model reset before reindexing"
            )));
        }

        if dims > max_indexed_dimensions {
            warn!(
                dims,
                max = max_indexed_dimensions,
                "Embedding dimensionality exceeds index limit, using linear scan"
            );
            return Ok(false);
        }

        let conn = self.conn.lock().unwrap();
        let sql = format!(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS chunk_embeddings USING vec0(
                chunk_id TEXT PRIMARY KEY,
                embedding float[{dims}] distance_metric=cosine
            )
            "#
        );
        conn.execute_batch(&sql)?;
        drop(conn);

        *current = Some(dims);
        info!("Created chunk_embeddings index with {} dimensions", dims);
        Ok(true)
    }

    /// Drop the vector index, if any.
    pub fn drop_vector_index(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("DROP TABLE IF EXISTS chunk_embeddings")?;
        drop(conn);

        *self.vector_dims.lock().unwrap() = None;
        info!("Dropped chunk_embeddings index");
        Ok(())
    }

    /// Atomically replace a document's chunks with a new set.
    ///
    /// Old chunks are deleted and new ones inserted in one transaction, so a
    /// reader never observes a partially indexed document. Callers embed the
    /// new chunks *before* calling this, so a failed embed call leaves the
    /// old chunks intact.
    pub fn replace_document_chunks(
        &self,
        document_id: Id,
        records: &[ChunkRecord],
    ) -> Result<()> {
        let has_index = self.vector_dims.lock().unwrap().is_some();
        let fts = self.fts_available;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        delete_document_rows(&tx, document_id, has_index, fts)?;

        for record in records {
            insert_chunk_row(&tx, record, has_index, fts)?;
        }

        tx.commit()?;
        debug!(
            document_id = %document_id,
            chunks = records.len(),
            "Replaced document chunks"
        );
        Ok(())
    }

    /// Delete all chunks for a document. Idempotent.
    ///
    /// Returns the number of chunks removed.
    pub fn delete_document_chunks(&self, document_id: Id) -> Result<usize> {
        let has_index = self.vector_dims.lock().unwrap().is_some();
        let fts = self.fts_available;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let removed = delete_document_rows(&tx, document_id, has_index, fts)?;
        tx.commit()?;

        if removed > 0 {
            debug!(document_id = %document_id, removed, "Deindexed document");
        }
        Ok(removed)
    }

    /// Fetch a document's chunks ordered by sequence.
    pub fn chunks_for_document(&self, document_id: Id) -> Result<Vec<ChunkRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            r#"
            SELECT id, document_id, workspace_id, agent_id, collection, seq,
                   content, content_hash, embedding, metadata, created_at
            FROM chunks
            WHERE document_id = ?1
            ORDER BY seq
            "#,
        )?;

        let mut rows = stmt.query(params![document_id.to_string()])?;
        let mut chunks = Vec::new();
        while let Some(row) = rows.next()? {
            chunks.push(row_to_chunk(row)?);
        }
        Ok(chunks)
    }

    /// Purge chunks and cache entries, per workspace or globally.
    ///
    /// Required whenever the configured embedding model changes: vectors from
    /// different models are not comparable. A global reset also drops the
    /// vector index so the next indexing run can recreate it at the new
    /// dimensionality; a per-workspace reset keeps the shared index and only
    /// removes that workspace's rows.
    pub fn reset_embeddings(&self, workspace_id: Option<Id>) -> Result<()> {
        let has_index = self.vector_dims.lock().unwrap().is_some();
        let fts = self.fts_available;

        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;

            match workspace_id {
                Some(ws) => {
                    let ids = chunk_ids_for_workspace(&tx, ws)?;
                    for id in &ids {
                        if has_index {
                            tx.execute(
                                "DELETE FROM chunk_embeddings WHERE chunk_id = ?1",
                                params![id],
                            )?;
                        }
                        if fts {
                            tx.execute("DELETE FROM chunks_fts WHERE chunk_id = ?1", params![id])?;
                        }
                    }
                    tx.execute(
                        "DELETE FROM chunks WHERE workspace_id = ?1",
                        params![ws.to_string()],
                    )?;
                    tx.execute(
                        "DELETE FROM embedding_cache WHERE workspace_id = ?1",
                        params![ws.to_string()],
                    )?;
                    info!(workspace_id = %ws, "Reset embeddings for workspace");
                }
                None => {
                    tx.execute("DELETE FROM chunks", [])?;
                    tx.execute("DELETE FROM embedding_cache", [])?;
                    if fts {
                        tx.execute("DELETE FROM chunks_fts", [])?;
                    }
                    info!("Reset all embeddings");
                }
            }

            tx.commit()?;
        }

        if workspace_id.is_none() {
            self.drop_vector_index()?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row-level helpers
// ─────────────────────────────────────────────────────────────────────────────

fn delete_document_rows(
    conn: &Connection,
    document_id: Id,
    has_index: bool,
    fts: bool,
) -> Result<usize> {
    let mut stmt = conn.prepare("SELECT id FROM chunks WHERE document_id = ?1")?;
    let mut rows = stmt.query(params![document_id.to_string()])?;

    let mut ids: Vec<String> = Vec::new();
    while let Some(row) = rows.next()? {
        ids.push(row.get(0)?);
    }
    drop(rows);
    drop(stmt);

    for id in &ids {
        if has_index {
            conn.execute(
                "DELETE FROM chunk_embeddings WHERE chunk_id = ?1",
                params![id],
            )?;
        }
        if fts {
            conn.execute("DELETE FROM chunks_fts WHERE chunk_id = ?1", params![id])?;
        }
    }

    conn.execute(
        "DELETE FROM chunks WHERE document_id = ?1",
        params![document_id.to_string()],
    )?;

    Ok(ids.len())
}

fn insert_chunk_row(
    conn: &Connection,
    record: &ChunkRecord,
    has_index: bool,
    fts: bool,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO chunks
            (id, document_id, workspace_id, agent_id, collection, seq,
             content, content_hash, embedding, metadata, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            record.id.to_string(),
            record.document_id.to_string(),
            record.workspace_id.map(|id| id.to_string()),
            record.agent_id.map(|id| id.to_string()),
            record.collection,
            record.seq as i64,
            record.content,
            record.content_hash,
            embedding_to_bytes(&record.embedding),
            serde_json::to_string(&record.metadata)?,
            record.created_at.to_rfc3339(),
        ],
    )?;

    if has_index {
        conn.execute(
            "INSERT INTO chunk_embeddings (chunk_id, embedding) VALUES (?1, ?2)",
            params![
                record.id.to_string(),
                embedding_to_bytes(&record.embedding)
            ],
        )?;
    }

    if fts {
        conn.execute(
            "INSERT INTO chunks_fts (content, chunk_id) VALUES (?1, ?2)",
            params![record.content, record.id.to_string()],
        )?;
    }

    Ok(())
}

fn chunk_ids_for_workspace(conn: &Connection, workspace_id: Id) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM chunks WHERE workspace_id = ?1")?;
    let mut rows = stmt.query(params![workspace_id.to_string()])?;

    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        ids.push(row.get(0)?);
    }
    Ok(ids)
}

pub(crate) fn row_to_chunk(row: &Row<'_>) -> Result<ChunkRecord> {
    let id: String = row.get(0)?;
    let document_id: String = row.get(1)?;
    let workspace_id: Option<String> = row.get(2)?;
    let agent_id: Option<String> = row.get(3)?;
    let collection: String = row.get(4)?;
    let seq: i64 = row.get(5)?;
    let content: String = row.get(6)?;
    let content_hash: String = row.get(7)?;
    let embedding: Vec<u8> = row.get(8)?;
    let metadata: String = row.get(9)?;
    let created_at: String = row.get(10)?;

    Ok(ChunkRecord {
        id: parse_id(&id)?,
        document_id: parse_id(&document_id)?,
        workspace_id: workspace_id.as_deref().map(parse_id).transpose()?,
        agent_id: agent_id.as_deref().map(parse_id).transpose()?,
        collection,
        seq: seq as usize,
        content,
        content_hash,
        embedding: embedding_from_bytes(&embedding)?,
        metadata: serde_json::from_str(&metadata)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChunkMetadata;
    use mnemo_types::{new_id, now};

    fn test_chunk(document_id: Id, seq: usize, content: &str) -> ChunkRecord {
        ChunkRecord {
            id: new_id(),
            document_id,
            workspace_id: None,
            agent_id: None,
            collection: "general".to_string(),
            seq,
            content: content.to_string(),
            content_hash: format!("hash-{seq}"),
            embedding: vec![seq as f32, 1.0, 0.0, 0.0],
            metadata: ChunkMetadata::default(),
            created_at: now(),
        }
    }

    #[test]
    fn test_replace_and_fetch_chunks() {
        let store = MemoryStore::open_in_memory().unwrap();
        let doc = new_id();

        let records = vec![test_chunk(doc, 0, "first"), test_chunk(doc, 1, "second")];
        store.replace_document_chunks(doc, &records).unwrap();

        let fetched = store.chunks_for_document(doc).unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].content, "first");
        assert_eq!(fetched[1].seq, 1);
        assert_eq!(fetched[0].embedding, records[0].embedding);
    }

    #[test]
    fn test_replace_is_full_replacement() {
        let store = MemoryStore::open_in_memory().unwrap();
        let doc = new_id();

        store
            .replace_document_chunks(doc, &[test_chunk(doc, 0, "old content")])
            .unwrap();
        store
            .replace_document_chunks(doc, &[test_chunk(doc, 0, "new content")])
            .unwrap();

        let fetched = store.chunks_for_document(doc).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].content, "new content");
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = MemoryStore::open_in_memory().unwrap();
        let doc = new_id();

        store
            .replace_document_chunks(doc, &[test_chunk(doc, 0, "content")])
            .unwrap();

        assert_eq!(store.delete_document_chunks(doc).unwrap(), 1);
        assert_eq!(store.delete_document_chunks(doc).unwrap(), 0);
    }

    #[test]
    fn test_ensure_vector_index_skips_oversized_dims() {
        let store = MemoryStore::open_in_memory().unwrap();
        let created = store.ensure_vector_index(4096, 2000).unwrap();
        assert!(!created);
        assert!(store.vector_dimensions().is_none());
    }

    #[test]
    fn test_ensure_vector_index_rejects_dim_change() {
        super::super::init_vector_extension();
        let store = MemoryStore::open_in_memory().unwrap();

        assert!(store.ensure_vector_index(4, 2000).unwrap());
        assert!(store.ensure_vector_index(4, 2000).unwrap());
        assert!(store.ensure_vector_index(8, 2000).is_err());
    }

    #[test]
    fn test_reset_embeddings_global() {
        let store = MemoryStore::open_in_memory().unwrap();
        let doc = new_id();

        store
            .replace_document_chunks(doc, &[test_chunk(doc, 0, "content")])
            .unwrap();
        store.reset_embeddings(None).unwrap();

        assert!(store.chunks_for_document(doc).unwrap().is_empty());
        assert!(store.vector_dimensions().is_none());
    }

    #[test]
    fn test_reset_embeddings_scoped_to_workspace() {
        let store = MemoryStore::open_in_memory().unwrap();
        let ws = new_id();
        let doc_in = new_id();
        let doc_out = new_id();

        let mut chunk_in = test_chunk(doc_in, 0, "workspace content");
        chunk_in.workspace_id = Some(ws);
        store.replace_document_chunks(doc_in, &[chunk_in]).unwrap();
        store
            .replace_document_chunks(doc_out, &[test_chunk(doc_out, 0, "other content")])
            .unwrap();

        store.reset_embeddings(Some(ws)).unwrap();

        assert!(store.chunks_for_document(doc_in).unwrap().is_empty());
        assert_eq!(store.chunks_for_document(doc_out).unwrap().len(), 1);
    }
}
