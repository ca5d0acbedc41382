//! Core data models: email threads as they arrive from the ingestion
//! boundary, and the retrievable [`Unit`]s produced from them.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ChunkingError;

/// Provider tag recorded on every unit. Only one email source is supported.
pub const SOURCE_TYPE: &str = "gmail";

/// Whether a message started the conversation, replied to it, or forwarded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Original,
    Reply,
    Forward,
}

/// Attachment metadata. Content is never fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
}

/// A single cleaned email message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: String,
    pub thread_id: String,
    pub sender: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Provider-assigned order, used to break timestamp ties.
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub subject: Option<String>,
    /// Cleaned body text (HTML, signatures, and quotes already stripped).
    pub body: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
}

/// A conversation: messages sharing one thread identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailThread {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub messages: Vec<EmailMessage>,
}

impl EmailThread {
    pub fn new(id: impl Into<String>, subject: Option<String>, messages: Vec<EmailMessage>) -> Self {
        Self {
            id: id.into(),
            subject,
            messages,
        }
    }

    /// Messages in chronological order, ties broken by provider sequence.
    pub fn ordered_messages(&self) -> Vec<&EmailMessage> {
        let mut msgs: Vec<&EmailMessage> = self.messages.iter().collect();
        msgs.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.sequence.cmp(&b.sequence))
        });
        msgs
    }

    /// Every sender and recipient, sorted and de-duplicated.
    pub fn participants(&self) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        for m in &self.messages {
            set.insert(m.sender.clone());
            for r in &m.recipients {
                set.insert(r.clone());
            }
        }
        set
    }

    /// Thread subject, falling back to the first message that has one.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref().or_else(|| {
            self.ordered_messages()
                .into_iter()
                .find_map(|m| m.subject.as_deref())
        })
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Retrieval tier of a unit. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitLevel {
    Summary,
    Detail,
}

impl UnitLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitLevel::Summary => "summary",
            UnitLevel::Detail => "detail",
        }
    }
}

/// Metadata attached to every unit, used for pre-filtering and for
/// orienting a caller who receives the unit out of context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitMetadata {
    pub project_id: String,
    pub source_type: String,
    pub thread_id: String,
    /// Sender of the first message contributing to the unit.
    pub sender: Option<String>,
    /// Timestamp of the first message contributing to the unit.
    pub date: Option<DateTime<Utc>>,
    pub subject: Option<String>,
    pub source_message_ids: Vec<String>,
    pub level: UnitLevel,
    pub position: Option<usize>,
    /// Thread-context marker injected at the top of the unit, if any.
    pub thread_context: Option<String>,
    /// Set when the unit exceeds the token budget because its content
    /// could not be split further.
    #[serde(default)]
    pub oversized: bool,
}

/// A retrievable span of thread text at summary or detail level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// `"{thread_id}:{position}"` for details, `"{thread_id}:summary"` for the summary.
    pub id: String,
    pub thread_id: String,
    pub level: UnitLevel,
    pub position: Option<usize>,
    pub text: String,
    pub token_count: usize,
    /// SHA-256 of `text`, for embedding staleness checks.
    pub hash: String,
    /// Byte offset in `text` where the unit's own content starts (after
    /// the context marker and the overlap seed).
    pub body_start: usize,
    /// Tokens carried over from the previous unit.
    pub overlap_tokens: usize,
    pub metadata: UnitMetadata,
}

impl Unit {
    /// Build a detail unit. `body_start` must lie on a char boundary of `text`.
    pub(crate) fn detail(
        thread_id: &str,
        position: usize,
        text: String,
        token_count: usize,
        body_start: usize,
        overlap_tokens: usize,
        metadata: UnitMetadata,
    ) -> Self {
        let hash = hash_text(&text);
        Self {
            id: format!("{}:{}", thread_id, position),
            thread_id: thread_id.to_string(),
            level: UnitLevel::Detail,
            position: Some(position),
            text,
            token_count,
            hash,
            body_start,
            overlap_tokens,
            metadata,
        }
    }

    pub(crate) fn summary(
        thread_id: &str,
        text: String,
        token_count: usize,
        metadata: UnitMetadata,
    ) -> Self {
        let hash = hash_text(&text);
        Self {
            id: format!("{}:summary", thread_id),
            thread_id: thread_id.to_string(),
            level: UnitLevel::Summary,
            position: None,
            text,
            token_count,
            hash,
            body_start: 0,
            overlap_tokens: 0,
            metadata,
        }
    }

    /// The unit's own content, without context marker or overlap seed.
    pub fn body(&self) -> &str {
        self.text.get(self.body_start..).unwrap_or("")
    }

    /// The oversize flag as a [`ChunkingError`], for audit trails.
    pub fn chunking_error(&self, limit: usize) -> Option<ChunkingError> {
        if !self.metadata.oversized {
            return None;
        }
        Some(ChunkingError::Oversized {
            thread_id: self.thread_id.clone(),
            position: self.position.unwrap_or(0),
            tokens: self.token_count,
            limit,
        })
    }
}

/// A unit paired with its embedding vector, ready for upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedUnit {
    pub unit: Unit,
    pub vector: Vec<f32>,
}

/// SHA-256 hex digest of a unit's text.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
