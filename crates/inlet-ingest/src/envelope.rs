//! Normalized representation of one inbound platform event.
//!
//! Transports build a [`TransportEnvelope`] once at the boundary; nothing in
//! the pipeline looks at platform wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use inlet_core::types::{ConversationId, SenderId, UpdateId};

/// Content category of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Text,
    Photo,
    Voice,
    Video,
    Document,
    Contact,
    Poll,
    Command,
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EnvelopeKind::Text => "text",
            EnvelopeKind::Photo => "photo",
            EnvelopeKind::Voice => "voice",
            EnvelopeKind::Video => "video",
            EnvelopeKind::Document => "document",
            EnvelopeKind::Contact => "contact",
            EnvelopeKind::Poll => "poll",
            EnvelopeKind::Command => "command",
        };
        f.write_str(name)
    }
}

/// Reference to a file stored on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub file_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactData {
    pub phone_number: String,
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollData {
    pub question: String,
    pub options: Vec<String>,
}

/// Where a forwarded message originally came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardInfo {
    /// Display name of the original author or chat, when the platform exposes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

/// The message an envelope replies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTarget {
    pub message_id: i64,
    /// Text or caption of the replied-to message; may be filled in later by a
    /// [`ReplyLookup`](crate::ReplyLookup).
    pub text: Option<String>,
    pub kind: Option<EnvelopeKind>,
    /// True when the replied-to message was sent by the bot itself.
    pub from_bot: bool,
}

/// Kind-specific content of an envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<ContactData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll: Option<PollData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward: Option<ForwardInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_group_id: Option<String>,
}

/// One inbound unit. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportEnvelope {
    pub update_id: UpdateId,
    pub sender_id: SenderId,
    pub conversation_id: ConversationId,
    /// Platform message id inside the conversation.
    pub message_id: i64,
    pub kind: EnvelopeKind,
    pub payload: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl TransportEnvelope {
    /// A plain text envelope with no extra payload.
    pub fn text(
        update_id: impl Into<UpdateId>,
        sender_id: impl Into<SenderId>,
        conversation_id: impl Into<ConversationId>,
        text: impl Into<String>,
    ) -> Self {
        let update_id = update_id.into();
        let text = text.into();
        let kind = if text.starts_with('/') {
            EnvelopeKind::Command
        } else {
            EnvelopeKind::Text
        };
        Self {
            update_id,
            sender_id: sender_id.into(),
            conversation_id: conversation_id.into(),
            message_id: update_id.0,
            kind,
            payload: Payload {
                text: Some(text),
                ..Payload::default()
            },
            sent_at: None,
        }
    }

    /// Text body, falling back to the media caption.
    pub fn text_content(&self) -> Option<&str> {
        self.payload
            .text
            .as_deref()
            .or(self.payload.caption.as_deref())
            .filter(|t| !t.is_empty())
    }

    pub fn is_reply(&self) -> bool {
        self.payload.reply_to.is_some()
    }

    /// Normalized command name: lowercase, without the leading `/` and any
    /// `@botname` suffix. `None` for non-command envelopes.
    pub fn command_name(&self) -> Option<String> {
        if self.kind != EnvelopeKind::Command {
            return None;
        }
        let text = self.payload.text.as_deref()?;
        let token = text.split_whitespace().next()?;
        let name = token.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        if name.is_empty() {
            return None;
        }
        Some(name.to_ascii_lowercase())
    }
}

/// Normalize a configured command name the same way [`TransportEnvelope::command_name`] does.
pub fn normalize_command(name: &str) -> String {
    name.trim().trim_start_matches('/').to_ascii_lowercase()
}
