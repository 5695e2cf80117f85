use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use crate::backend::Backend;
use crate::chat::{ChatMessage, ConversationKey};
use crate::entity::UserProfile;
use crate::live::{LiveQuery, Snapshot};
use crate::views::{initials, relative_time};

const PLACEHOLDER_BUBBLES: usize = 3;

/// Presence is not tracked; every peer shows as active.
pub const PRESENCE_PLACEHOLDER: &str = "Active now";

/// The message history between the signed-in user and one peer.
pub struct ConversationView {
    key: ConversationKey,
    current: UserProfile,
    peer: UserProfile,
    messages: Vec<ChatMessage>,
    loading: bool,
    query: LiveQuery<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRender {
    pub chat_id: ConversationKey,
    pub header: PeerHeader,
    pub body: ConversationBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerHeader {
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    pub initials: String,
    pub presence: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ConversationBody {
    /// Skeleton bubbles, alternating incoming/outgoing.
    Loading { placeholders: Vec<bool> },
    Empty { title: &'static str, hint: String },
    #[serde(rename_all = "camelCase")]
    Messages {
        bubbles: Vec<Bubble>,
        /// Id of the newest message; the client scrolls it into view.
        scroll_to: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bubble {
    pub id: String,
    pub text: String,
    pub outgoing: bool,
    pub sender_display_name: Option<String>,
    #[serde(rename = "senderPhotoURL")]
    pub sender_photo_url: Option<String>,
    pub initials: String,
    pub sent: String,
}

impl ConversationView {
    pub fn mount(backend: &Backend, current: &UserProfile, peer: &UserProfile) -> Self {
        let key = ConversationKey::between(&current.uid, &peer.uid);
        Self {
            query: backend.watch_messages(&key),
            key,
            current: current.clone(),
            peer: peer.clone(),
            messages: Vec::new(),
            loading: true,
        }
    }

    /// Switch to another peer, resubscribing when the key changes.
    pub fn set_peer(&mut self, backend: &Backend, peer: &UserProfile) {
        let key = ConversationKey::between(&self.current.uid, &peer.uid);
        if key == self.key {
            self.peer = peer.clone();
            return;
        }
        *self = Self::mount(backend, &self.current, peer);
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Wait for the next push and apply it. Returns `false` once the
    /// subscription has ended.
    pub async fn next_snapshot(&mut self) -> bool {
        match self.query.next().await {
            Some(snapshot) => {
                self.apply(snapshot);
                true
            }
            None => false,
        }
    }

    fn apply(&mut self, snapshot: Snapshot<ChatMessage>) {
        match snapshot {
            Ok(messages) => self.messages = messages,
            Err(e) => error!(chat_id = %self.key, error = %e, "Error fetching messages"),
        }
        self.loading = false;
    }

    pub fn render(&self, now: DateTime<Utc>) -> ConversationRender {
        let header = PeerHeader {
            display_name: self.peer.display_name.clone(),
            photo_url: self.peer.photo_url.clone(),
            initials: initials(self.peer.display_name.as_deref()),
            presence: PRESENCE_PLACEHOLDER,
        };

        let body = if self.loading {
            ConversationBody::Loading {
                placeholders: (0..PLACEHOLDER_BUBBLES).map(|i| i % 2 == 1).collect(),
            }
        } else if let Some(newest) = self.messages.last() {
            ConversationBody::Messages {
                bubbles: self.messages.iter().map(|msg| self.bubble(msg, now)).collect(),
                scroll_to: newest.id.clone(),
            }
        } else {
            ConversationBody::Empty {
                title: "No messages yet.",
                hint: format!("Be the first to send a message to {}!", self.peer.name()),
            }
        };

        ConversationRender {
            chat_id: self.key.clone(),
            header,
            body,
        }
    }

    fn bubble(&self, msg: &ChatMessage, now: DateTime<Utc>) -> Bubble {
        let outgoing = msg.sender_id == self.current.uid;
        let sender = if outgoing { &self.current } else { &self.peer };
        Bubble {
            id: msg.id.clone(),
            text: msg.text.clone(),
            outgoing,
            sender_display_name: sender.display_name.clone(),
            sender_photo_url: sender.photo_url.clone(),
            initials: initials(sender.display_name.as_deref()),
            sent: relative_time(msg.timestamp, now),
        }
    }

    pub fn unmount(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::NewMessage;

    fn profile(uid: &str, name: &str) -> UserProfile {
        UserProfile::new(uid, None, Some(name.to_string()), None)
    }

    #[tokio::test]
    async fn test_empty_conversation() {
        let backend = Backend::in_memory().await;
        let me = profile("u1", "Ada");
        let peer = profile("u2", "Grace");

        let mut view = ConversationView::mount(&backend, &me, &peer);
        assert!(matches!(
            view.render(Utc::now()).body,
            ConversationBody::Loading { .. }
        ));

        view.next_snapshot().await;
        let render = view.render(Utc::now());
        assert_eq!(render.chat_id.as_str(), "u1_u2");
        assert_eq!(render.header.presence, "Active now");
        assert_eq!(
            render.body,
            ConversationBody::Empty {
                title: "No messages yet.",
                hint: "Be the first to send a message to Grace!".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_bubbles_are_attributed() {
        let backend = Backend::in_memory().await;
        let me = profile("u2", "Grace");
        let peer = profile("u1", "Ada");
        let key = ConversationKey::between(&me.uid, &peer.uid);

        let mut view = ConversationView::mount(&backend, &me, &peer);
        view.next_snapshot().await;

        backend
            .add_message(&key, &NewMessage::from_sender(&peer, "hello"))
            .await
            .unwrap();
        view.next_snapshot().await;
        backend
            .add_message(&key, &NewMessage::from_sender(&me, "hi!"))
            .await
            .unwrap();
        view.next_snapshot().await;

        match view.render(Utc::now()).body {
            ConversationBody::Messages { bubbles, scroll_to } => {
                assert_eq!(bubbles.len(), 2);
                assert!(!bubbles[0].outgoing);
                assert_eq!(bubbles[0].initials, "AD");
                assert!(bubbles[1].outgoing);
                assert_eq!(bubbles[1].text, "hi!");
                assert_eq!(scroll_to, bubbles[1].id);
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_peer_change_resubscribes() {
        let backend = Backend::in_memory().await;
        let me = profile("u1", "Ada");
        let grace = profile("u2", "Grace");
        let alan = profile("u3", "Alan");

        backend
            .add_message(
                &ConversationKey::between("u1", "u2"),
                &NewMessage::from_sender(&me, "for grace"),
            )
            .await
            .unwrap();

        let mut view = ConversationView::mount(&backend, &me, &grace);
        view.next_snapshot().await;
        assert_eq!(view.messages().len(), 1);

        view.set_peer(&backend, &alan);
        assert_eq!(view.key().as_str(), "u1_u3");
        view.next_snapshot().await;
        assert!(view.messages().is_empty());
    }
}
