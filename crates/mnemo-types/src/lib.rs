//! Shared types for the Mnemo memory subsystem.
//!
//! These are the read models the memory and retrieval services consume from
//! the rest of the application: documents to index, channel messages to
//! compact, and the agent profile that scopes private memory. The subsystem
//! treats them as read-only; it owns only its chunk, cache, and summary rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier used across the system (documents, chunks, channels, agents).
pub type Id = Uuid;

/// UTC timestamp used across the system.
pub type Timestamp = DateTime<Utc>;

/// Generate a new random identifier.
pub fn new_id() -> Id {
    Uuid::new_v4()
}

/// Current UTC time.
pub fn now() -> Timestamp {
    Utc::now()
}

// ─────────────────────────────────────────────────────────────────────────────
// Documents
// ─────────────────────────────────────────────────────────────────────────────

/// A document as seen by the indexing service.
///
/// Only the fields the indexer reads are modeled here; the owning CRUD layer
/// carries the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Id,
    /// Full document text. Empty or whitespace-only content de-indexes.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Workspace/tenant the document belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<Id>,
    pub created_at: Timestamp,
}

impl Document {
    /// Create a document with generated id and current timestamp.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            content: content.into(),
            title: None,
            workspace_id: None,
            created_at: now(),
        }
    }

    /// Set the document title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the owning workspace.
    pub fn with_workspace(mut self, workspace_id: Id) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Channels and messages
// ─────────────────────────────────────────────────────────────────────────────

/// The kind of channel a conversation lives in.
///
/// Memory scoping distinguishes 1:1 channels (direct, agent, external) from
/// shared ones (group, public).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// 1:1 between a user and an agent.
    Direct,
    /// 1:1 between two agents.
    Agent,
    /// 1:1 with an external participant (bridged messaging).
    External,
    /// Multi-member channel.
    Group,
    /// Open channel visible to the whole workspace.
    Public,
}

impl ChannelKind {
    /// Whether the channel is a private 1:1 conversation.
    pub fn is_private(self) -> bool {
        matches!(self, Self::Direct | Self::Agent | Self::External)
    }
}

/// A conversation message as seen by compaction and flushing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: Id,
    pub channel_id: Id,
    /// Display name of the author (user or agent).
    pub author: String,
    pub content: String,
    pub created_at: Timestamp,
}

impl ChannelMessage {
    /// Create a message in the given channel.
    pub fn new(channel_id: Id, author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            channel_id,
            author: author.into(),
            content: content.into(),
            created_at: now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agents
// ─────────────────────────────────────────────────────────────────────────────

/// The slice of an agent's configuration the memory subsystem needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: Id,
    pub name: String,
    /// Model name used to resolve the context window.
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<Id>,
}

impl AgentProfile {
    /// Create a profile for the given model.
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            model: model.into(),
            workspace_id: None,
        }
    }
}
