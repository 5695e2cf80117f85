use crate::chat::{ChatMessage, ConversationKey};
use crate::entity::UserProfile;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Change notifications fanned out to live queries and notification streams.
#[derive(Debug, Clone)]
pub enum Event {
    /// A profile record was created or modified
    ProfileChanged(UserProfile),

    /// A message was appended to a conversation
    MessageAdded(ChatMessage),

    /// A conversation summary was upserted. Nothing in the daemon listens
    /// for it yet; it is there for a conversation list with previews.
    ChatSummaryChanged(ConversationKey),

    /// A transient notification for one user (or everyone if `target` is None)
    SystemNotification {
        notification: Notification,
        target: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Error,
}

/// A toast: short title plus a one-line description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub description: String,
}

impl Notification {
    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            title: title.into(),
            description: description.into(),
        }
    }
}

pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn publish(&self, event: Event) {
        // We ignore the error if there are no receivers
        let _ = self.tx.send(event);
    }
}
