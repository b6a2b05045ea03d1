//! Maps a Telegram webhook update onto exactly one [`TransportEnvelope`].

use chrono::{DateTime, Utc};
use tracing::debug;

use inlet_core::types::{ConversationId, SenderId, UpdateId};
use inlet_ingest::envelope::{ContactData, FileRef, ForwardInfo, PollData};
use inlet_ingest::{EnvelopeKind, Payload, ReplyTarget, TransportEnvelope};

use crate::error::TelegramError;
use crate::update::{FileMeta, ForwardOrigin, Message, Update};

/// Result of normalizing a well-formed update.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Envelope(TransportEnvelope),
    /// Valid update with nothing the pipeline handles (callback query,
    /// sticker, service message, ...).
    Ignored {
        update_id: UpdateId,
        reason: &'static str,
    },
}

/// Decode a raw webhook body and normalize it.
pub fn normalize_body(body: &[u8]) -> Result<Normalized, TelegramError> {
    let update: Update =
        serde_json::from_slice(body).map_err(|e| TelegramError::Malformed(e.to_string()))?;
    Ok(normalize(update))
}

pub fn normalize(update: Update) -> Normalized {
    let update_id = UpdateId(update.update_id);
    let Some(message) = update.into_message() else {
        debug!(update_id = %update_id, "update carries no message");
        return Normalized::Ignored {
            update_id,
            reason: "no message",
        };
    };

    let Some(kind) = kind_of(&message) else {
        debug!(update_id = %update_id, "message has no supported content");
        return Normalized::Ignored {
            update_id,
            reason: "unsupported content",
        };
    };

    let sender_id = message
        .from
        .as_ref()
        .map(|u| u.id)
        .or_else(|| message.sender_chat.as_ref().map(|c| c.id))
        .unwrap_or(message.chat.id);

    let payload = Payload {
        text: message.text.clone(),
        caption: message.caption.clone(),
        file: file_of(&message),
        contact: message.contact.as_ref().map(|c| ContactData {
            phone_number: c.phone_number.clone(),
            first_name: c.first_name.clone(),
            last_name: c.last_name.clone(),
            user_id: c.user_id,
        }),
        poll: message.poll.as_ref().map(|p| PollData {
            question: p.question.clone(),
            options: p.options.iter().map(|o| o.text.clone()).collect(),
        }),
        forward: forward_of(&message),
        reply_to: message.reply_to_message.as_deref().map(|reply| ReplyTarget {
            message_id: reply.message_id,
            text: reply.text.clone().or_else(|| reply.caption.clone()),
            kind: kind_of(reply),
            from_bot: reply.from.as_ref().is_some_and(|u| u.is_bot),
        }),
        media_group_id: message.media_group_id.clone(),
    };

    Normalized::Envelope(TransportEnvelope {
        update_id,
        sender_id: SenderId(sender_id),
        conversation_id: ConversationId(message.chat.id),
        message_id: message.message_id,
        kind,
        payload,
        sent_at: timestamp(message.date),
    })
}

fn kind_of(message: &Message) -> Option<EnvelopeKind> {
    if message.photo.as_ref().is_some_and(|p| !p.is_empty()) {
        return Some(EnvelopeKind::Photo);
    }
    if message.video.is_some() || message.video_note.is_some() {
        return Some(EnvelopeKind::Video);
    }
    if message.voice.is_some() || message.audio.is_some() {
        return Some(EnvelopeKind::Voice);
    }
    if message.document.is_some() {
        return Some(EnvelopeKind::Document);
    }
    if message.contact.is_some() {
        return Some(EnvelopeKind::Contact);
    }
    if message.poll.is_some() {
        return Some(EnvelopeKind::Poll);
    }
    match message.text.as_deref() {
        Some(text) if text.starts_with('/') => Some(EnvelopeKind::Command),
        Some(text) if !text.trim().is_empty() => Some(EnvelopeKind::Text),
        _ => None,
    }
}

fn file_of(message: &Message) -> Option<FileRef> {
    if let Some(photos) = &message.photo {
        // Sizes are not guaranteed to be sorted; keep the largest.
        return photos
            .iter()
            .max_by_key(|p| (u64::from(p.width) * u64::from(p.height), p.file_size))
            .map(|p| FileRef {
                file_id: p.file_id.clone(),
                file_name: None,
                mime_type: Some("image/jpeg".to_string()),
            });
    }
    [
        &message.video,
        &message.video_note,
        &message.voice,
        &message.audio,
        &message.document,
    ]
    .into_iter()
    .find_map(|meta| meta.as_ref().map(file_ref))
}

fn file_ref(meta: &FileMeta) -> FileRef {
    FileRef {
        file_id: meta.file_id.clone(),
        file_name: meta.file_name.clone(),
        mime_type: meta.mime_type.clone(),
    }
}

fn forward_of(message: &Message) -> Option<ForwardInfo> {
    if let Some(origin) = &message.forward_origin {
        let (name, date) = match origin {
            ForwardOrigin::User { date, sender_user } => (Some(sender_user.display_name()), *date),
            ForwardOrigin::HiddenUser {
                date,
                sender_user_name,
            } => (Some(sender_user_name.clone()), *date),
            ForwardOrigin::Chat { date, sender_chat } => (sender_chat.display_name(), *date),
            ForwardOrigin::Channel { date, chat } => (chat.display_name(), *date),
            ForwardOrigin::Unknown => (None, 0),
        };
        return Some(ForwardInfo {
            origin: name,
            date: timestamp(date),
        });
    }

    let date = message.forward_date?;
    let origin = message
        .forward_from
        .as_ref()
        .map(|u| u.display_name())
        .or_else(|| message.forward_from_chat.as_ref().and_then(|c| c.display_name()))
        .or_else(|| message.forward_sender_name.clone());
    Some(ForwardInfo {
        origin,
        date: timestamp(date),
    })
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp(secs, 0)
}
