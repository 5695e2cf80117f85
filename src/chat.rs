use crate::entity::UserProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a two-party conversation: both participant uids, sorted,
/// joined with `_`. The same pair always yields the same key regardless of
/// argument order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub const SEPARATOR: char = '_';

    pub fn between(a: &str, b: &str) -> Self {
        let [lo, hi] = Self::participants(a, b);
        Self(format!("{}{}{}", lo, Self::SEPARATOR, hi))
    }

    /// The pair in key order.
    pub fn participants(a: &str, b: &str) -> [String; 2] {
        if a <= b {
            [a.to_string(), b.to_string()]
        } else {
            [b.to_string(), a.to_string()]
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message stored under `chats/{chatId}/messages/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: ConversationKey,
    pub sender_id: String,
    pub sender_display_name: Option<String>,
    #[serde(rename = "senderPhotoURL", default)]
    pub sender_photo_url: Option<String>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Client-side fields of a message. The id and timestamp are assigned by the
/// store on insert.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: String,
    pub sender_display_name: Option<String>,
    pub sender_photo_url: Option<String>,
    pub text: String,
}

impl NewMessage {
    /// Snapshots the sender's current name and avatar into the message.
    pub fn from_sender(sender: &UserProfile, text: impl Into<String>) -> Self {
        Self {
            sender_id: sender.uid.clone(),
            sender_display_name: sender.display_name.clone(),
            sender_photo_url: sender.photo_url.clone(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub text: String,
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
}

/// The parent record `chats/{chatId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: ConversationKey,
    pub users: Option<[String; 2]>,
    pub last_message: Option<LastMessage>,
}

/// Fields to merge into a [`ChatSummary`]. `None` leaves the stored value
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct ChatSummaryPatch {
    pub users: Option<[String; 2]>,
    pub last_message: Option<LastMessageDraft>,
}

/// A last-message preview whose timestamp the store assigns.
#[derive(Debug, Clone)]
pub struct LastMessageDraft {
    pub text: String,
    pub sender_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_examples() {
        assert_eq!(ConversationKey::between("u1", "u2").as_str(), "u1_u2");
        assert_eq!(ConversationKey::between("u2", "u1").as_str(), "u1_u2");
        assert_eq!(ConversationKey::between("u9", "u2").as_str(), "u2_u9");
    }

    #[test]
    fn test_key_is_symmetric() {
        let ids = ["alice", "bob", "Zed", "a", "a_b", "0x1", ""];
        for a in ids {
            for b in ids {
                assert_eq!(ConversationKey::between(a, b), ConversationKey::between(b, a));
            }
        }
    }

    #[test]
    fn test_participants_sorted() {
        assert_eq!(
            ConversationKey::participants("zoe", "amy"),
            ["amy".to_string(), "zoe".to_string()]
        );
    }

    #[test]
    fn test_message_json_field_names() {
        let msg = ChatMessage {
            id: "m1".to_string(),
            chat_id: ConversationKey::between("u1", "u2"),
            sender_id: "u1".to_string(),
            sender_display_name: Some("One".to_string()),
            sender_photo_url: None,
            text: "hi".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["chatId"], "u1_u2");
        assert_eq!(json["senderId"], "u1");
        assert!(json["senderPhotoURL"].is_null());
    }
}
