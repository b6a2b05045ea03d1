//! Heuristic that recognizes a two-message burst of "link, then comment".
//!
//! People often paste a link and follow it with a remark about it. When a
//! flushed burst is exactly that shape, the pair is surfaced so downstream
//! handling can treat the comment as context for the link.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::envelope::{EnvelopeKind, TransportEnvelope};

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s]+").expect("URL pattern is valid"));

/// Above this share of URL characters, the first message counts as a link.
const LINK_DOMINANT_RATIO: f64 = 0.7;
/// Short first messages count as a link regardless of ratio.
const SHORT_LINK_MESSAGE_CHARS: usize = 100;
/// At or above this share of URL characters, the second message is itself a
/// link and cannot be the comment.
const COMMENT_MAX_URL_RATIO: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCommentPair {
    pub link_text: String,
    pub comment: String,
}

/// Detect a link+comment pairing in a flushed burst.
///
/// Only bursts of exactly two plain text envelopes qualify; replies and
/// commands never pair.
pub fn detect(envelopes: &[TransportEnvelope]) -> Option<LinkCommentPair> {
    let [first, second] = envelopes else {
        return None;
    };
    if !qualifies(first) || !qualifies(second) {
        return None;
    }
    pair_texts(first.payload.text.as_deref()?, second.payload.text.as_deref()?)
}

fn qualifies(envelope: &TransportEnvelope) -> bool {
    envelope.kind == EnvelopeKind::Text && !envelope.is_reply() && envelope.command_name().is_none()
}

/// Apply the pairing rules to two raw texts.
pub fn pair_texts(link_text: &str, comment: &str) -> Option<LinkCommentPair> {
    let link_trimmed = link_text.trim();
    let link_chars = url_chars(link_trimmed)?;
    let link_len = link_trimmed.chars().count();

    let dominant = link_len <= SHORT_LINK_MESSAGE_CHARS
        || link_chars as f64 / link_len as f64 > LINK_DOMINANT_RATIO;
    if !dominant {
        return None;
    }

    let comment_trimmed = comment.trim();
    let comment_len = comment_trimmed.chars().count();
    if comment_len == 0 {
        return None;
    }
    if let Some(comment_url_chars) = url_chars(comment_trimmed) {
        if comment_url_chars as f64 / comment_len as f64 >= COMMENT_MAX_URL_RATIO {
            return None;
        }
    }

    Some(LinkCommentPair {
        link_text: link_text.to_string(),
        comment: comment.to_string(),
    })
}

/// Total characters covered by URLs, or `None` when the text has no URL.
fn url_chars(text: &str) -> Option<usize> {
    let mut found = false;
    let total = URL_RE
        .find_iter(text)
        .map(|m| {
            found = true;
            m.as_str().chars().count()
        })
        .sum();
    found.then_some(total)
}
