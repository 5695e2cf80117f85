use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::auth::AuthService;
use crate::bus::{Event, EventBus, Notification};
use crate::chat::{ChatMessage, ChatSummary, ChatSummaryPatch, ConversationKey, NewMessage};
use crate::config::{BackendConfig, ServerConfig};
use crate::entity::UserProfile;
use crate::live::LiveQuery;
use crate::store::Store;

/// The backend client handle: auth plus the document collections, with every
/// write announced on the event bus so live queries can refresh.
///
/// One instance is built at startup and shared as `Arc<Backend>`.
pub struct Backend {
    config: BackendConfig,
    store: Store,
    auth: AuthService,
    bus: Arc<EventBus>,
    session_sweeper: Option<JoinHandle<()>>,
}

impl Backend {
    /// Open (or create) the project database and wire up the services.
    pub async fn connect(config: BackendConfig, server: &ServerConfig) -> Result<Self> {
        let db_path = server.database_path(&config);
        info!("Initializing store at {}", db_path.display());

        let store = Store::new(&db_path).await?;
        store.init().await?;

        let mut backend = Self::new(config, store);
        backend.session_sweeper = Some(backend.auth.spawn_session_sweeper(server.session_ttl));
        Ok(backend)
    }

    pub fn new(config: BackendConfig, store: Store) -> Self {
        Self {
            config,
            auth: AuthService::new(store.clone()),
            store,
            bus: Arc::new(EventBus::new()),
            session_sweeper: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    #[cfg(test)]
    pub async fn in_memory() -> Arc<Self> {
        let store = Store::in_memory().await.unwrap();
        Arc::new(Self::new(BackendConfig::for_tests(), store))
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    // -- users ---------------------------------------------------------------

    pub async fn get_profile(&self, uid: &str) -> Result<Option<UserProfile>> {
        self.store.get_user(uid).await
    }

    pub async fn set_profile(&self, profile: &UserProfile) -> Result<()> {
        self.store.set_user(profile).await?;
        debug!(uid = %profile.uid, "Profile written");
        self.bus.publish(Event::ProfileChanged(profile.clone()));
        Ok(())
    }

    pub async fn update_display_name(&self, uid: &str, display_name: &str) -> Result<UserProfile> {
        let profile = self.store.update_display_name(uid, display_name).await?;
        self.bus.publish(Event::ProfileChanged(profile.clone()));
        Ok(profile)
    }

    /// Live query: every profile except `uid`.
    pub fn watch_users_except(&self, uid: &str) -> LiveQuery<UserProfile> {
        let store = self.store.clone();
        let uid = uid.to_string();
        LiveQuery::spawn(
            &self.bus,
            |event| matches!(event, Event::ProfileChanged(_)),
            move || {
                let store = store.clone();
                let uid = uid.clone();
                async move { store.list_users_except(&uid).await }
            },
        )
    }

    // -- chats ---------------------------------------------------------------

    pub async fn add_message(&self, chat_id: &ConversationKey, msg: &NewMessage) -> Result<ChatMessage> {
        let message = self.store.add_message(chat_id, msg).await?;
        debug!(chat_id = %chat_id, id = %message.id, "Message added");
        self.bus.publish(Event::MessageAdded(message.clone()));
        Ok(message)
    }

    /// Live query: the messages of one conversation, oldest first.
    pub fn watch_messages(&self, chat_id: &ConversationKey) -> LiveQuery<ChatMessage> {
        let store = self.store.clone();
        let key = chat_id.clone();
        let filter_key = chat_id.clone();
        LiveQuery::spawn(
            &self.bus,
            move |event| matches!(event, Event::MessageAdded(msg) if msg.chat_id == filter_key),
            move || {
                let store = store.clone();
                let key = key.clone();
                async move { store.messages(&key).await }
            },
        )
    }

    pub async fn merge_chat_summary(&self, chat_id: &ConversationKey, patch: &ChatSummaryPatch) -> Result<()> {
        self.store.merge_chat_summary(chat_id, patch).await?;
        self.bus.publish(Event::ChatSummaryChanged(chat_id.clone()));
        Ok(())
    }

    pub async fn chat_summary(&self, chat_id: &ConversationKey) -> Result<Option<ChatSummary>> {
        self.store.chat_summary(chat_id).await
    }

    // -- notifications -------------------------------------------------------

    /// Deliver a toast to one user's notification stream.
    pub fn notify(&self, uid: &str, notification: Notification) {
        self.bus.publish(Event::SystemNotification {
            notification,
            target: Some(uid.to_string()),
        });
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        if let Some(sweeper) = self.session_sweeper.take() {
            sweeper.abort();
        }
    }
}
