//! The unit handed to the dispatcher when a burst is flushed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use inlet_core::types::{ConversationId, SenderId, UpdateId};

use crate::envelope::{EnvelopeKind, ReplyTarget, TransportEnvelope};
use crate::pairing::{self, LinkCommentPair};

/// A flushed burst from one (conversation, sender) stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedMessage {
    /// Time-sortable id for log correlation.
    pub id: Uuid,
    pub conversation_id: ConversationId,
    pub sender_id: SenderId,
    /// Update ids of every envelope in the unit, in dispatch order.
    pub update_ids: Vec<UpdateId>,
    /// Text bodies and captions joined by newlines, in dispatch order.
    pub text: String,
    /// Name of the leading command, when the unit starts with one.
    pub command: Option<String>,
    pub envelopes: Vec<TransportEnvelope>,
    pub images: Vec<TransportEnvelope>,
    pub voice: Vec<TransportEnvelope>,
    pub videos: Vec<TransportEnvelope>,
    pub documents: Vec<TransportEnvelope>,
    pub contacts: Vec<TransportEnvelope>,
    pub polls: Vec<TransportEnvelope>,
    pub media_group_ids: Vec<String>,
    pub link_pair: Option<LinkCommentPair>,
    /// Copied from the first envelope that replies to something.
    pub reply: Option<ReplyTarget>,
    /// Messages dropped because the burst was already full.
    pub overflow_count: usize,
}

impl CombinedMessage {
    /// Build a unit from envelopes already in dispatch order.
    ///
    /// `envelopes` must be non-empty and share one conversation and sender.
    pub(crate) fn assemble(
        envelopes: Vec<TransportEnvelope>,
        media_group_ids: Vec<String>,
        overflow_count: usize,
    ) -> Self {
        let (conversation_id, sender_id) = envelopes
            .first()
            .map(|e| (e.conversation_id, e.sender_id))
            .unwrap_or((ConversationId(0), SenderId(0)));

        let mut images = Vec::new();
        let mut voice = Vec::new();
        let mut videos = Vec::new();
        let mut documents = Vec::new();
        let mut contacts = Vec::new();
        let mut polls = Vec::new();
        let mut texts: Vec<&str> = Vec::new();

        for envelope in &envelopes {
            match envelope.kind {
                EnvelopeKind::Photo => images.push(envelope.clone()),
                EnvelopeKind::Voice => voice.push(envelope.clone()),
                EnvelopeKind::Video => videos.push(envelope.clone()),
                EnvelopeKind::Document => documents.push(envelope.clone()),
                EnvelopeKind::Contact => contacts.push(envelope.clone()),
                EnvelopeKind::Poll => polls.push(envelope.clone()),
                EnvelopeKind::Text | EnvelopeKind::Command => {}
            }
            if let Some(text) = envelope.text_content() {
                texts.push(text);
            }
        }
        let text = texts.join("\n");

        let reply = envelopes.iter().find_map(|e| e.payload.reply_to.clone());
        let command = envelopes.first().and_then(|e| e.command_name());
        let link_pair = pairing::detect(&envelopes);
        let update_ids = envelopes.iter().map(|e| e.update_id).collect();

        Self {
            id: Uuid::now_v7(),
            conversation_id,
            sender_id,
            update_ids,
            text,
            command,
            envelopes,
            images,
            voice,
            videos,
            documents,
            contacts,
            polls,
            media_group_ids,
            link_pair,
            reply,
            overflow_count,
        }
    }

    /// A unit made of a single envelope, used for bypass commands.
    pub(crate) fn single(envelope: TransportEnvelope) -> Self {
        let groups = envelope.payload.media_group_id.clone().into_iter().collect();
        Self::assemble(vec![envelope], groups, 0)
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }
}
