//! Conversation summary persistence.
//!
//! One row per (channel, agent). The `last_message_id` column is the
//! compaction watermark: writes advance it with a compare-and-swap so two
//! concurrent compactions of the same conversation cannot both land.

use rusqlite::{params, Row};
use tracing::debug;

use mnemo_types::{now, Id};

use crate::error::{MemoryError, Result};

use super::{parse_id, parse_timestamp, ConversationSummary, MemoryStore};

impl MemoryStore {
    /// Fetch the summary row for a (channel, agent) pair.
    pub fn get_summary(
        &self,
        channel_id: Id,
        agent_id: Id,
    ) -> Result<Option<ConversationSummary>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            r#"
            SELECT channel_id, agent_id, summary, tokens_before, tokens_after,
                   compaction_count, flush_count, messages_summarized,
                   last_message_id, updated_at
            FROM conversation_summaries
            WHERE channel_id = ?1 AND agent_id = ?2
            "#,
        )?;

        let mut rows = stmt.query(params![channel_id.to_string(), agent_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_summary(row)?)),
            None => Ok(None),
        }
    }

    /// Record a pre-compaction flush, creating the row if needed.
    ///
    /// Returns the flush count for the current cycle after the increment.
    pub fn record_flush(&self, channel_id: Id, agent_id: Id) -> Result<usize> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO conversation_summaries (channel_id, agent_id, flush_count, updated_at)
            VALUES (?1, ?2, 1, ?3)
            ON CONFLICT (channel_id, agent_id) DO UPDATE SET
                flush_count = flush_count + 1,
                updated_at = ?3
            "#,
            params![
                channel_id.to_string(),
                agent_id.to_string(),
                now().to_rfc3339()
            ],
        )?;

        let count: i64 = conn.query_row(
            "SELECT flush_count FROM conversation_summaries
             WHERE channel_id = ?1 AND agent_id = ?2",
            params![channel_id.to_string(), agent_id.to_string()],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }

    /// Persist a compaction result, advancing the watermark atomically.
    ///
    /// `expected_last_message_id` must match the stored watermark or the call
    /// fails with [`MemoryError::Conflict`], which means another compaction
    /// landed first and this result should be discarded. A successful write
    /// resets the flush counter for the next cycle.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_compaction(
        &self,
        channel_id: Id,
        agent_id: Id,
        summary: &str,
        tokens_before: usize,
        tokens_after: usize,
        newly_summarized: usize,
        expected_last_message_id: Option<Id>,
        new_last_message_id: Id,
    ) -> Result<ConversationSummary> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let existing: Option<Option<String>> = {
            let mut stmt = tx.prepare(
                "SELECT last_message_id FROM conversation_summaries
                 WHERE channel_id = ?1 AND agent_id = ?2",
            )?;
            let mut rows = stmt.query(params![channel_id.to_string(), agent_id.to_string()])?;
            match rows.next()? {
                Some(row) => Some(row.get(0)?),
                None => None,
            }
        };

        let expected = expected_last_message_id.map(|id| id.to_string());
        let timestamp = now().to_rfc3339();

        match existing {
            None => {
                if expected.is_some() {
                    return Err(MemoryError::Conflict(
                        "summary row missing for expected watermark".to_string(),
                    ));
                }
                tx.execute(
                    r#"
                    INSERT INTO conversation_summaries
                        (channel_id, agent_id, summary, tokens_before, tokens_after,
                         compaction_count, flush_count, messages_summarized,
                         last_message_id, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, ?6, ?7, ?8)
                    "#,
                    params![
                        channel_id.to_string(),
                        agent_id.to_string(),
                        summary,
                        tokens_before as i64,
                        tokens_after as i64,
                        newly_summarized as i64,
                        new_last_message_id.to_string(),
                        timestamp
                    ],
                )?;
            }
            Some(stored) => {
                if stored != expected {
                    return Err(MemoryError::Conflict(format!(
                        "compaction watermark moved: expected {expected:?}, found {stored:?}"
                    )));
                }
                tx.execute(
                    r#"
                    UPDATE conversation_summaries SET
                        summary = ?3,
                        tokens_before = ?4,
                        tokens_after = ?5,
                        compaction_count = compaction_count + 1,
                        flush_count = 0,
                        messages_summarized = messages_summarized + ?6,
                        last_message_id = ?7,
                        updated_at = ?8
                    WHERE channel_id = ?1 AND agent_id = ?2
                    "#,
                    params![
                        channel_id.to_string(),
                        agent_id.to_string(),
                        summary,
                        tokens_before as i64,
                        tokens_after as i64,
                        newly_summarized as i64,
                        new_last_message_id.to_string(),
                        timestamp
                    ],
                )?;
            }
        }

        tx.commit()?;
        drop(conn);

        debug!(
            channel = %channel_id,
            agent = %agent_id,
            "Compaction recorded"
        );

        self.get_summary(channel_id, agent_id)?.ok_or_else(|| {
            MemoryError::NotFound("summary row vanished after compaction".to_string())
        })
    }

    /// Delete the summary for a (channel, agent) pair. Idempotent.
    pub fn delete_summary(&self, channel_id: Id, agent_id: Id) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let deleted = conn.execute(
            "DELETE FROM conversation_summaries WHERE channel_id = ?1 AND agent_id = ?2",
            params![channel_id.to_string(), agent_id.to_string()],
        )?;

        Ok(deleted > 0)
    }
}

fn row_to_summary(row: &Row<'_>) -> Result<ConversationSummary> {
    let channel_id: String = row.get(0)?;
    let agent_id: String = row.get(1)?;
    let tokens_before: i64 = row.get(3)?;
    let tokens_after: i64 = row.get(4)?;
    let compaction_count: i64 = row.get(5)?;
    let flush_count: i64 = row.get(6)?;
    let messages_summarized: i64 = row.get(7)?;
    let last_message_id: Option<String> = row.get(8)?;
    let updated_at: String = row.get(9)?;

    Ok(ConversationSummary {
        channel_id: parse_id(&channel_id)?,
        agent_id: parse_id(&agent_id)?,
        summary: row.get(2)?,
        tokens_before: tokens_before as usize,
        tokens_after: tokens_after as usize,
        compaction_count: compaction_count as usize,
        flush_count: flush_count as usize,
        messages_summarized: messages_summarized as usize,
        last_message_id: last_message_id.as_deref().map(parse_id).transpose()?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}
