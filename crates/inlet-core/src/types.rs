use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform-assigned identifier of one webhook delivery.
///
/// Unique per event, but the platform re-sends the same id when it retries
/// a delivery it considers failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateId(pub i64);

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UpdateId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identifier of the actor who sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderId(pub i64);

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SenderId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identifier of the chat a message was posted in.
///
/// Group chats use negative ids on Telegram, so this is signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ConversationId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_bare_integers() {
        let json = serde_json::to_string(&UpdateId(42)).unwrap();
        assert_eq!(json, "42");
        let conv: ConversationId = serde_json::from_str("-100123").unwrap();
        assert_eq!(conv, ConversationId(-100123));
    }

    #[test]
    fn display_matches_inner_value() {
        assert_eq!(SenderId(7).to_string(), "7");
        assert_eq!(ConversationId(-5).to_string(), "-5");
    }
}
