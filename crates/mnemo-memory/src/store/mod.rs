//! Persistent storage for chunks, embedding cache, and conversation summaries.
//!
//! A single SQLite file (WAL mode) owns every row this subsystem writes:
//!
//! - `chunks`: retrievable units of document text, embeddings inline
//! - `embedding_cache`: memoized provider results keyed by content hash
//! - `conversation_summaries`: one rolling summary per (channel, agent)
//! - `settings`: admin key/value overrides
//!
//! Vector search uses a sqlite-vec `vec0` virtual table created lazily once
//! embedding dimensionality is known; keyword search uses an FTS5 table.
//! Either capability may be absent, and search degrades to whichever sources
//! remain (see `search_ops`).

mod cache_ops;
mod chunk_ops;
mod search_ops;
mod summary_ops;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use mnemo_types::{Id, Timestamp};

use crate::error::{MemoryError, Result};

pub use search_ops::{RankedChunk, SearchFilter};

// ─────────────────────────────────────────────────────────────────────────────
// Schema version
// ─────────────────────────────────────────────────────────────────────────────

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

/// Settings key prefix for context-window overrides.
pub const CONTEXT_WINDOW_OVERRIDE_PREFIX: &str = "context_window.";

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Free-form metadata carried by a chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Title of the owning document at index time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Timestamp of the source content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<Timestamp>,
}

/// A retrievable unit of document text.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: Id,
    pub document_id: Id,
    pub workspace_id: Option<Id>,
    /// Owning agent for private-memory scoping; `None` for shared chunks.
    pub agent_id: Option<Id>,
    /// Namespace tag, e.g. "general", "memory", "identity".
    pub collection: String,
    /// Position of this chunk within the document.
    pub seq: usize,
    pub content: String,
    /// Hex sha256 of the chunk text.
    pub content_hash: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
    pub created_at: Timestamp,
}

/// Rolling summary of a (channel, agent) pair's older history.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub channel_id: Id,
    pub agent_id: Id,
    /// Cumulative summary text.
    pub summary: String,
    /// Estimated message tokens before the most recent compaction.
    pub tokens_before: usize,
    /// Estimated summary tokens after the most recent compaction.
    pub tokens_after: usize,
    /// Number of compactions performed so far.
    pub compaction_count: usize,
    /// Flushes performed in the current cycle; resets each compaction.
    pub flush_count: usize,
    /// Total messages folded into the summary so far.
    pub messages_summarized: usize,
    /// Id of the last message folded in (the compaction watermark).
    pub last_message_id: Option<Id>,
    pub updated_at: Timestamp,
}

/// Database statistics.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub cache_entry_count: usize,
    pub summary_count: usize,
    pub schema_version: i32,
    /// Dimensions of the vector index, if one exists.
    pub vector_dimensions: Option<usize>,
    pub fts_available: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory store
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed store for everything the memory subsystem persists.
///
/// Uses WAL mode for better concurrent read performance. Cross-call
/// coordination happens entirely through the database; the only in-process
/// state is the connection and cached capability flags.
pub struct MemoryStore {
    pub(crate) conn: Mutex<Connection>,
    /// Dimensions of the vec0 index, `Some` once it has been created.
    pub(crate) vector_dims: Mutex<Option<usize>>,
    /// Whether FTS5 is compiled into the underlying SQLite.
    pub(crate) fts_available: bool,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("vector_dims", &self.vector_dims)
            .field("fts_available", &self.fts_available)
            .finish_non_exhaustive()
    }
}

/// Initialize the sqlite-vec extension for all future connections.
///
/// Must be called before opening a store that will use vector search.
/// `sqlite3_auto_extension` applies globally to the process.
pub fn init_vector_extension() {
    use rusqlite::ffi::sqlite3_auto_extension;
    use sqlite_vec::sqlite3_vec_init;

    unsafe {
        #[allow(clippy::missing_transmute_annotations)]
        sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())));
    }
}

impl MemoryStore {
    /// Open or create a memory store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|_| {
                    MemoryError::Database(rusqlite::Error::InvalidPath(path.to_path_buf()))
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;

        let store = Self::from_connection(conn)?;
        info!("Memory store opened at {:?}", path);
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self::from_connection(conn)?;
        debug!("In-memory store created");
        Ok(store)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let mut store = Self {
            conn: Mutex::new(conn),
            vector_dims: Mutex::new(None),
            fts_available: false,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Initialize pragmas, schema, and capability probes.
    fn initialize(&mut self) -> Result<()> {
        let fts_available;
        {
            let conn = self.conn.lock().unwrap();

            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;

            create_schema(&conn)?;
            fts_available = init_fts(&conn);

            // Restore vector index state from a previous run.
            if let Some(dims) = existing_vector_dims(&conn) {
                *self.vector_dims.lock().unwrap() = Some(dims);
            }
        }
        self.fts_available = fts_available;
        Ok(())
    }

    /// Whether a vector index exists, and its dimensions.
    pub fn vector_dimensions(&self) -> Option<usize> {
        *self.vector_dims.lock().unwrap()
    }

    /// Whether full-text search is available.
    pub fn has_fts(&self) -> bool {
        self.fts_available
    }
}

/// Create the database schema.
fn create_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0);

    if current_version >= SCHEMA_VERSION {
        debug!("Schema up to date (version {})", current_version);
        return Ok(());
    }

    info!(
        "Migrating schema from version {} to {}",
        current_version, SCHEMA_VERSION
    );

    conn.execute_batch(
        r#"
        -- Chunks: retrievable units of document text
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            workspace_id TEXT,
            agent_id TEXT,
            collection TEXT NOT NULL DEFAULT 'general',
            seq INTEGER NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_document
            ON chunks(document_id);
        CREATE INDEX IF NOT EXISTS idx_chunks_collection
            ON chunks(collection);
        CREATE INDEX IF NOT EXISTS idx_chunks_workspace
            ON chunks(workspace_id);

        -- Embedding cache: one row per (provider, model, content hash)
        CREATE TABLE IF NOT EXISTS embedding_cache (
            cache_key TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            workspace_id TEXT,
            embedding BLOB NOT NULL,
            created_at TEXT NOT NULL
        );

        -- Conversation summaries: at most one row per (channel, agent)
        CREATE TABLE IF NOT EXISTS conversation_summaries (
            channel_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            tokens_before INTEGER NOT NULL DEFAULT 0,
            tokens_after INTEGER NOT NULL DEFAULT 0,
            compaction_count INTEGER NOT NULL DEFAULT 0,
            flush_count INTEGER NOT NULL DEFAULT 0,
            messages_summarized INTEGER NOT NULL DEFAULT 0,
            last_message_id TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (channel_id, agent_id)
        );

        -- Admin settings
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

    info!("Schema created (version {})", SCHEMA_VERSION);
    Ok(())
}

/// Create the FTS5 table, returning whether full-text search is available.
///
/// FTS5 may not be compiled into the linked SQLite; its absence narrows
/// search to vector-only rather than failing.
fn init_fts(conn: &Connection) -> bool {
    let result = conn.execute_batch(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts
            USING fts5(content, chunk_id UNINDEXED);
        "#,
    );

    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("FTS5 unavailable, keyword search disabled: {}", e);
            false
        }
    }
}

/// Probe for a vec0 table left by a previous run and read its dimensions.
fn existing_vector_dims(conn: &Connection) -> Option<usize> {
    let sql: String = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE name = 'chunk_embeddings'",
            [],
            |row| row.get(0),
        )
        .ok()?;

    // Column is declared as float[<dims>]
    let start = sql.find("float[")? + "float[".len();
    let end = sql[start..].find(']')? + start;
    sql[start..end].trim().parse().ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Get an admin setting.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;

        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    /// Set an admin setting.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;

        Ok(())
    }

    /// Context-window overrides stored under `context_window.<model>` keys.
    pub fn context_window_overrides(&self) -> Result<HashMap<String, usize>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare("SELECT key, value FROM settings WHERE key LIKE ?1")?;
        let pattern = format!("{CONTEXT_WINDOW_OVERRIDE_PREFIX}%");
        let mut rows = stmt.query(params![pattern])?;

        let mut overrides = HashMap::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            let model = key
                .strip_prefix(CONTEXT_WINDOW_OVERRIDE_PREFIX)
                .unwrap_or(&key);
            match value.parse::<usize>() {
                Ok(window) => {
                    overrides.insert(model.to_string(), window);
                }
                Err(_) => {
                    warn!(key, value, "Ignoring malformed context-window override");
                }
            }
        }

        Ok(overrides)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Get database statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock().unwrap();

        let chunk_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        let cache_entry_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM embedding_cache", [], |row| row.get(0))?;
        let summary_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM conversation_summaries",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            chunk_count: chunk_count as usize,
            cache_entry_count: cache_entry_count as usize,
            summary_count: summary_count as usize,
            schema_version: SCHEMA_VERSION,
            vector_dimensions: *self.vector_dims.lock().unwrap(),
            fts_available: self.fts_available,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn parse_id(value: &str) -> Result<Id> {
    value
        .parse()
        .map_err(|_| MemoryError::InvalidData(format!("invalid id: {value}")))
}

pub(crate) fn parse_timestamp(value: &str) -> Result<Timestamp> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| MemoryError::InvalidData(format!("invalid timestamp: {value}")))
}

/// Encode an f32 slice as little-endian bytes for BLOB storage.
pub(crate) fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    use zerocopy::IntoBytes;
    embedding.as_bytes().to_vec()
}

/// Decode a BLOB back into an f32 vector.
pub(crate) fn embedding_from_bytes(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(MemoryError::InvalidData(
            "embedding blob length not a multiple of 4".to_string(),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
