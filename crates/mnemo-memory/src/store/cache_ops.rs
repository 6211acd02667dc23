//! Embedding cache persistence.
//!
//! Keys are `sha256("{provider}:{model}:{text}")`, so a provider or model
//! switch naturally misses the old entries instead of serving vectors from
//! the wrong embedding space.

use rusqlite::params;
use sha2::{Digest, Sha256};
use tracing::debug;

use mnemo_types::{now, Id};

use crate::error::Result;

use super::{embedding_from_bytes, embedding_to_bytes, MemoryStore};

/// Cache key for an embedding request.
pub(crate) fn embedding_cache_key(provider: &str, model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update(b":");
    hasher.update(model.as_bytes());
    hasher.update(b":");
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl MemoryStore {
    /// Look up a cached embedding.
    pub fn cache_get(&self, provider: &str, model: &str, text: &str) -> Result<Option<Vec<f32>>> {
        let key = embedding_cache_key(provider, model, text);
        let conn = self.conn.lock().unwrap();

        let mut stmt =
            conn.prepare("SELECT embedding FROM embedding_cache WHERE cache_key = ?1")?;
        let mut rows = stmt.query(params![key])?;

        match rows.next()? {
            Some(row) => {
                let blob: Vec<u8> = row.get(0)?;
                Ok(Some(embedding_from_bytes(&blob)?))
            }
            None => Ok(None),
        }
    }

    /// Store an embedding, replacing any previous entry for the same input.
    pub fn cache_put(
        &self,
        provider: &str,
        model: &str,
        text: &str,
        workspace_id: Option<Id>,
        embedding: &[f32],
    ) -> Result<()> {
        let key = embedding_cache_key(provider, model, text);
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT OR REPLACE INTO embedding_cache
                (cache_key, provider, model, workspace_id, embedding, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                key,
                provider,
                model,
                workspace_id.map(|id| id.to_string()),
                embedding_to_bytes(embedding),
                now().to_rfc3339()
            ],
        )?;

        Ok(())
    }

    /// Purge cache entries, optionally scoped to one workspace.
    ///
    /// Returns the number of entries removed.
    pub fn purge_cache(&self, workspace_id: Option<Id>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();

        let purged = match workspace_id {
            Some(ws) => conn.execute(
                "DELETE FROM embedding_cache WHERE workspace_id = ?1",
                params![ws.to_string()],
            )?,
            None => conn.execute("DELETE FROM embedding_cache", [])?,
        };

        debug!(purged, "Embedding cache purged");
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_types::new_id;

    #[test]
    fn test_cache_miss_then_hit() {
        let store = MemoryStore::open_in_memory().unwrap();

        assert!(store.cache_get("mock", "m1", "hello").unwrap().is_none());

        store
            .cache_put("mock", "m1", "hello", None, &[0.1, 0.2, 0.3])
            .unwrap();

        let hit = store.cache_get("mock", "m1", "hello").unwrap().unwrap();
        assert_eq!(hit, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_cache_key_varies_by_provider_and_model() {
        let store = MemoryStore::open_in_memory().unwrap();

        store
            .cache_put("mock", "m1", "hello", None, &[1.0])
            .unwrap();

        assert!(store.cache_get("other", "m1", "hello").unwrap().is_none());
        assert!(store.cache_get("mock", "m2", "hello").unwrap().is_none());
        assert!(store.cache_get("mock", "m1", "hello ").unwrap().is_none());
    }

    #[test]
    fn test_cache_put_replaces() {
        let store = MemoryStore::open_in_memory().unwrap();

        store.cache_put("mock", "m1", "text", None, &[1.0]).unwrap();
        store.cache_put("mock", "m1", "text", None, &[2.0]).unwrap();

        let hit = store.cache_get("mock", "m1", "text").unwrap().unwrap();
        assert_eq!(hit, vec![2.0]);
        assert_eq!(store.stats().unwrap().cache_entry_count, 1);
    }

    #[test]
    fn test_purge_scoped_to_workspace() {
        let store = MemoryStore::open_in_memory().unwrap();
        let ws = new_id();

        store
            .cache_put("mock", "m1", "scoped", Some(ws), &[1.0])
            .unwrap();
        store
            .cache_put("mock", "m1", "global", None, &[2.0])
            .unwrap();

        assert_eq!(store.purge_cache(Some(ws)).unwrap(), 1);
        assert!(store.cache_get("mock", "m1", "scoped").unwrap().is_none());
        assert!(store.cache_get("mock", "m1", "global").unwrap().is_some());

        assert_eq!(store.purge_cache(None).unwrap(), 1);
        assert_eq!(store.stats().unwrap().cache_entry_count, 0);
    }

    #[test]
    fn test_key_is_stable_hex() {
        let key = embedding_cache_key("openai", "text-embedding-3-small", "hello");
        assert_eq!(key.len(), 64);
        assert_eq!(key, embedding_cache_key("openai", "text-embedding-3-small", "hello"));
    }
}
