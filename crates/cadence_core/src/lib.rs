pub mod config;
pub mod error;

pub use config::CadenceConfig;
pub use error::CadenceError;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Stable identifier of a conversation (one chat thread).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last six characters, used to keep log lines short.
    pub fn short(&self) -> &str {
        let start = self
            .0
            .char_indices()
            .rev()
            .nth(5)
            .map(|(i, _)| i)
            .unwrap_or(0);
        &self.0[start..]
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConversationKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

impl MediaKind {
    pub fn is_media(self) -> bool {
        self != MediaKind::Text
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Text => "text",
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
            MediaKind::Sticker => "sticker",
        }
    }

    /// Parse a transport-level kind name. Unknown names are `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "text" | "chat" => Some(MediaKind::Text),
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            "audio" | "ptt" | "voice" => Some(MediaKind::Audio),
            "document" => Some(MediaKind::Document),
            "sticker" => Some(MediaKind::Sticker),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle to downloaded media. The engine never dereferences it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// One message as received from the chat transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Transport message id (handle back to the source message).
    pub message_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub kind: MediaKind,
    #[serde(default)]
    pub media: Option<MediaRef>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            text: body.into(),
            kind: MediaKind::Text,
            media: None,
            received_at: Utc::now(),
        }
    }

    pub fn media(kind: MediaKind, media: Option<MediaRef>, caption: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            text: caption.into(),
            kind,
            media,
            received_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }
}

/// A flushed batch. Immutable once built; consumed once by the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchTask {
    pub conversation: ConversationKey,
    pub external_address: String,
    pub messages: Arc<[InboundMessage]>,
    pub enqueued_at: Instant,
    pub cross_worker: bool,
    pub has_media: bool,
    pub has_audio: bool,
    /// Time between the first buffered message and the flush.
    pub wait: Duration,
}

impl DispatchTask {
    pub fn batch_size(&self) -> usize {
        self.messages.len()
    }

    /// Non-empty texts joined by newlines.
    pub fn combined_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }

    /// Media-bearing messages in arrival order.
    pub fn media(&self) -> impl Iterator<Item = &InboundMessage> {
        self.messages.iter().filter(|m| m.kind.is_media())
    }

    /// Kind of the first media item, or `Text` for text-only batches.
    pub fn primary_kind(&self) -> MediaKind {
        self.media().next().map(|m| m.kind).unwrap_or(MediaKind::Text)
    }

    pub fn last_message(&self) -> Option<&InboundMessage> {
        self.messages.last()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    #[default]
    Text,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioReply {
    /// Encoded audio payload as produced by the backend (usually base64).
    pub data: String,
    pub mimetype: String,
    pub filename: String,
}

/// What the response backend produced for one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyBatch {
    #[serde(default)]
    pub replies: Vec<String>,
    #[serde(default)]
    pub audio: Option<AudioReply>,
    #[serde(default)]
    pub kind: ReplyKind,
}

impl ReplyBatch {
    pub fn text<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: replies.into_iter().map(Into::into).collect(),
            audio: None,
            kind: ReplyKind::Text,
        }
    }

    pub fn first_reply(&self) -> &str {
        self.replies.first().map(String::as_str).unwrap_or("")
    }
}

/// Presence indicator capability of the chat transport. Every call is best-effort.
#[async_trait]
pub trait PresenceTransport: Send + Sync {
    async fn send_typing(&self, conversation: &ConversationKey) -> anyhow::Result<()>;
    async fn send_recording(&self, conversation: &ConversationKey) -> anyhow::Result<()>;
    async fn clear_presence(&self, conversation: &ConversationKey) -> anyhow::Result<()>;
}

/// Delivery side of the chat transport.
#[async_trait]
pub trait ChatTransport: PresenceTransport {
    async fn mark_seen(&self, conversation: &ConversationKey, message_id: &str)
        -> anyhow::Result<()>;

    async fn react(
        &self,
        conversation: &ConversationKey,
        message_id: &str,
        emoji: &str,
    ) -> anyhow::Result<()>;

    /// Send a text reply, optionally quoting the message with id `quote`.
    async fn send_text(
        &self,
        conversation: &ConversationKey,
        text: &str,
        quote: Option<&str>,
    ) -> anyhow::Result<()>;

    async fn send_audio(
        &self,
        conversation: &ConversationKey,
        audio: &AudioReply,
    ) -> anyhow::Result<()>;
}

/// The downstream response generator (processing callback).
#[async_trait]
pub trait ReplyBackend: Send + Sync {
    /// `Ok(None)` means the backend produced nothing to send.
    async fn process(&self, task: &DispatchTask) -> anyhow::Result<Option<ReplyBatch>>;
}
