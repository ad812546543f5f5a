//! Core data models.
//!
//! These types flow through every stage of the pipeline:
//!
//! ```text
//! Document ──split──▶ Passage ──embed──▶ IndexRecord ──search──▶ ScoredPassage
//!                                                                   │
//! ChatSession { messages: [ChatMessage] } ◀──────── Answer ◀────────┘
//! ```

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Source label used when a passage carries no `source` metadata.
pub const UNKNOWN_SOURCE: &str = "Unknown";

/// Title used for sessions without a user message.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Maximum number of characters kept from the first user message when
/// deriving a session title.
pub const TITLE_MAX_CHARS: usize = 30;

/// Metadata attached to a [`Document`] and inherited by its passages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Source file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// 1-based page number for paged formats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// MIME type of the original file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Position of the passage within its parent document. Unset on documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
}

/// A raw ingested unit produced by the document loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata {
                source: Some(source.into()),
                ..Metadata::default()
            },
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.metadata.page = Some(page);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.metadata.content_type = Some(content_type.into());
        self
    }
}

/// A bounded-length fragment of a document; the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub content: String,
    pub metadata: Metadata,
}

impl Passage {
    /// The `source` metadata, or [`UNKNOWN_SOURCE`].
    pub fn source(&self) -> &str {
        self.metadata.source.as_deref().unwrap_or(UNKNOWN_SOURCE)
    }

    /// Deterministic record id derived from source, page, chunk index and
    /// content.
    ///
    /// Identical passages always map to the same id, which makes the id
    /// usable as an upsert key by a future incremental ingestion mode.
    pub fn content_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source().as_bytes());
        hasher.update([0]);
        hasher.update(self.metadata.page.unwrap_or(0).to_le_bytes());
        hasher.update((self.metadata.chunk_index.unwrap_or(0) as u64).to_le_bytes());
        hasher.update(self.content.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::from_bytes(bytes).to_string()
    }
}

/// A passage with its embedding, as stored in a vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub passage: Passage,
}

impl IndexRecord {
    pub fn new(passage: Passage, vector: Vec<f32>) -> Self {
        Self {
            id: passage.content_id(),
            vector,
            passage,
        }
    }
}

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPassage {
    pub passage: Passage,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

/// Handle to a fully built or reopened collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexHandle {
    pub collection: String,
    /// Vector dimension locked for the collection.
    pub dims: usize,
    /// Number of records in the collection.
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<BTreeSet<String>>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: None,
        }
    }

    pub fn assistant(content: impl Into<String>, sources: BTreeSet<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sources: Some(sources),
        }
    }
}

/// A persisted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    /// Owner of the session. `None` is the anonymous owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
}

/// Listing entry for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

impl From<&ChatSession> for SessionSummary {
    fn from(session: &ChatSession) -> Self {
        Self {
            id: session.id.clone(),
            title: session.title.clone(),
            updated_at: session.updated_at,
        }
    }
}

/// Result of one answering call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    /// Deduplicated `source` labels of the retrieved passages.
    pub sources: BTreeSet<String>,
    /// Retrieved passage contents in retrieval order.
    pub chunks: Vec<String>,
}

/// Derive a session title from the first user message.
///
/// Keeps the first [`TITLE_MAX_CHARS`] characters and appends `...` when
/// the message was longer. Falls back to [`DEFAULT_TITLE`].
pub fn derive_title(messages: &[ChatMessage]) -> String {
    let Some(first) = messages.iter().find(|m| m.role == Role::User) else {
        return DEFAULT_TITLE.to_string();
    };
    let content = first.content.as_str();
    if content.chars().count() > TITLE_MAX_CHARS {
        let head: String = content.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head)
    } else if content.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        content.to_string()
    }
}
