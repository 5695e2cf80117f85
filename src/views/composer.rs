use tracing::error;

use crate::backend::Backend;
use crate::bus::Notification;
use crate::chat::{ChatMessage, ChatSummaryPatch, ConversationKey, LastMessageDraft, NewMessage};
use crate::entity::UserProfile;

/// The message input box. The draft survives a failed send so the user can
/// retry; it is cleared only after both writes succeed.
#[derive(Debug, Default)]
pub struct Composer {
    draft: String,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Send the trimmed draft. Whitespace-only drafts are ignored and yield
    /// `Ok(None)`. On failure the error toast is also delivered to the
    /// sender's notification stream.
    pub async fn submit(
        &mut self,
        backend: &Backend,
        chat_id: &ConversationKey,
        sender: &UserProfile,
        receiver: &UserProfile,
    ) -> Result<Option<ChatMessage>, Notification> {
        let text = self.draft.trim();
        if text.is_empty() {
            return Ok(None);
        }

        match send(backend, chat_id, sender, receiver, text).await {
            Ok(message) => {
                self.draft.clear();
                Ok(Some(message))
            }
            Err(e) => {
                error!(chat_id = %chat_id, error = %e, "Error sending message");
                let notification =
                    Notification::error("Error", "Failed to send message. Please try again.");
                backend.notify(&sender.uid, notification.clone());
                Err(notification)
            }
        }
    }
}

// The message insert and the summary upsert are separate writes.
async fn send(
    backend: &Backend,
    chat_id: &ConversationKey,
    sender: &UserProfile,
    receiver: &UserProfile,
    text: &str,
) -> anyhow::Result<ChatMessage> {
    let message = backend
        .add_message(chat_id, &NewMessage::from_sender(sender, text))
        .await?;

    backend
        .merge_chat_summary(
            chat_id,
            &ChatSummaryPatch {
                users: Some(ConversationKey::participants(&sender.uid, &receiver.uid)),
                last_message: Some(LastMessageDraft {
                    text: text.to_string(),
                    sender_id: sender.uid.clone(),
                }),
            },
        )
        .await?;

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Event, NotificationLevel};
    use crate::config::{BackendConfig, ServerConfig};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn profile(uid: &str, name: &str) -> UserProfile {
        UserProfile::new(uid, None, Some(name.to_string()), Some(format!("https://img/{}", uid)))
    }

    #[tokio::test]
    async fn test_whitespace_is_a_no_op() {
        let backend = Backend::in_memory().await;
        let (me, peer) = (profile("u1", "Ada"), profile("u2", "Grace"));
        let key = ConversationKey::between(&me.uid, &peer.uid);

        let mut composer = Composer::new();
        composer.set_draft("   \n\t ");
        assert_eq!(composer.submit(&backend, &key, &me, &peer).await, Ok(None));

        assert!(backend.chat_summary(&key).await.unwrap().is_none());
        let mut live = backend.watch_messages(&key);
        assert!(live.next().await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_trims_and_clears_draft() {
        let backend = Backend::in_memory().await;
        let (me, peer) = (profile("u9", "Ada"), profile("u2", "Grace"));
        let key = ConversationKey::between(&me.uid, &peer.uid);

        let mut composer = Composer::new();
        composer.set_draft("  hello there  ");
        let message = composer
            .submit(&backend, &key, &me, &peer)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(message.text, "hello there");
        assert_eq!(message.chat_id.as_str(), "u2_u9");
        assert_eq!(message.sender_display_name.as_deref(), Some("Ada"));
        assert_eq!(message.sender_photo_url.as_deref(), Some("https://img/u9"));
        assert_eq!(composer.draft(), "");

        let summary = backend.chat_summary(&key).await.unwrap().unwrap();
        assert_eq!(summary.users, Some(["u2".to_string(), "u9".to_string()]));
        let last = summary.last_message.unwrap();
        assert_eq!(last.text, "hello there");
        assert_eq!(last.sender_id, "u9");
    }

    #[tokio::test]
    async fn test_messages_follow_previous_last() {
        let backend = Backend::in_memory().await;
        let (me, peer) = (profile("u1", "Ada"), profile("u2", "Grace"));
        let key = ConversationKey::between(&me.uid, &peer.uid);

        let mut mine = Composer::new();
        let mut theirs = Composer::new();
        let mut sent = Vec::new();
        for i in 0..5 {
            let (composer, from, to) = if i % 2 == 0 {
                (&mut mine, &me, &peer)
            } else {
                (&mut theirs, &peer, &me)
            };
            composer.set_draft(format!("message {}", i));
            sent.push(composer.submit(&backend, &key, from, to).await.unwrap().unwrap());
        }

        let mut live = backend.watch_messages(&key);
        let stored = live.next().await.unwrap().unwrap();
        assert_eq!(stored, sent);
        for pair in stored.windows(2) {
            assert!(pair[1].timestamp >= pair[0].timestamp);
        }
    }

    #[tokio::test]
    async fn test_failed_send_keeps_draft_and_notifies_sender() {
        let backend = Backend::in_memory().await;
        let (me, peer) = (profile("u1", "Ada"), profile("u2", "Grace"));
        let key = ConversationKey::between(&me.uid, &peer.uid);
        backend.store().drop_table("messages").await.unwrap();
        let mut events = backend.bus().subscribe();

        let mut composer = Composer::new();
        composer.set_draft("are you there?");
        let notification = composer
            .submit(&backend, &key, &me, &peer)
            .await
            .unwrap_err();

        assert_eq!(notification.level, NotificationLevel::Error);
        assert_eq!(notification.title, "Error");
        assert_eq!(notification.description, "Failed to send message. Please try again.");
        assert_eq!(composer.draft(), "are you there?");
        assert!(backend.chat_summary(&key).await.unwrap().is_none());

        match events.recv().await.unwrap() {
            Event::SystemNotification { notification: toast, target } => {
                assert_eq!(target.as_deref(), Some("u1"));
                assert_eq!(toast, notification);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_from_both_peers() {
        let dir = TempDir::new().unwrap();
        let server = ServerConfig {
            http_addr: ([127, 0, 0, 1], 0).into(),
            data_dir: dir.path().to_path_buf(),
            session_ttl: Duration::from_secs(60),
        };
        let backend = Arc::new(
            Backend::connect(BackendConfig::for_tests(), &server)
                .await
                .unwrap(),
        );
        let (ada, grace) = (profile("u1", "Ada"), profile("u2", "Grace"));
        let key = ConversationKey::between(&ada.uid, &grace.uid);

        let mut handles = Vec::new();
        for i in 0..40 {
            let backend = backend.clone();
            let key = key.clone();
            let (from, to) = if i % 2 == 0 {
                (ada.clone(), grace.clone())
            } else {
                (grace.clone(), ada.clone())
            };
            handles.push(tokio::spawn(async move {
                let mut composer = Composer::new();
                composer.set_draft(format!("message {}", i));
                composer.submit(&backend, &key, &from, &to).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_some());
        }

        let mut live = backend.watch_messages(&key);
        let stored = live.next().await.unwrap().unwrap();
        assert_eq!(stored.len(), 40);
        for pair in stored.windows(2) {
            assert!(pair[1].timestamp >= pair[0].timestamp);
        }
        assert!(backend.chat_summary(&key).await.unwrap().unwrap().last_message.is_some());
    }
}
