//! The session/identity provider.
//!
//! A [`SessionProvider`] follows the auth state of one session token and
//! keeps the matching profile record loaded. Views receive the provider (or
//! the profile it resolved) explicitly instead of reaching for global state.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::auth::{AuthError, AuthUser};
use crate::backend::Backend;
use crate::entity::{fallback_display_name, UserProfile};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub user: Option<UserProfile>,
    pub auth_user: Option<AuthUser>,
    pub loading: bool,
}

impl SessionState {
    fn pending() -> Self {
        Self {
            user: None,
            auth_user: None,
            loading: true,
        }
    }

    fn signed_out() -> Self {
        Self {
            user: None,
            auth_user: None,
            loading: false,
        }
    }
}

pub struct SessionProvider {
    backend: Arc<Backend>,
    token: Option<String>,
    state_tx: Arc<watch::Sender<SessionState>>,
    state_rx: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl SessionProvider {
    /// Start following the auth state of `token`. The provider begins in the
    /// loading state and settles after the first auth notification.
    pub async fn mount(backend: Arc<Backend>, token: Option<String>) -> Self {
        let mut auth_rx = backend.auth().on_auth_state_changed(token.as_deref()).await;
        let (state_tx, state_rx) = watch::channel(SessionState::pending());
        let state_tx = Arc::new(state_tx);

        let task = tokio::spawn({
            let backend = backend.clone();
            let state_tx = state_tx.clone();
            async move {
                loop {
                    let auth_user = auth_rx.borrow_and_update().clone();
                    let user = match &auth_user {
                        Some(auth_user) => match load_or_create_profile(&backend, auth_user).await {
                            Ok(profile) => Some(profile),
                            Err(e) => {
                                error!(uid = %auth_user.uid, error = %e, "Failed to load user profile");
                                None
                            }
                        },
                        None => None,
                    };

                    state_tx.send_replace(SessionState {
                        user,
                        auth_user,
                        loading: false,
                    });

                    if auth_rx.changed().await.is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            backend,
            token,
            state_tx,
            state_rx,
            task,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.state_rx.borrow().user.clone()
    }

    pub fn loading(&self) -> bool {
        self.state_rx.borrow().loading
    }

    /// Wait until the first auth notification has been processed.
    pub async fn ready(&self) -> SessionState {
        let mut rx = self.state_rx.clone();
        if let Ok(state) = rx.wait_for(|state| !state.loading).await {
            return state.clone();
        }
        let state = rx.borrow().clone();
        state
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Sign out at the backend, then clear local state.
    pub async fn logout(&self) -> Result<(), AuthError> {
        if let Some(token) = &self.token {
            self.backend.auth().sign_out(token).await?;
        }
        self.state_tx.send_replace(SessionState::signed_out());
        Ok(())
    }
}

impl Drop for SessionProvider {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Fetch `users/{uid}`, creating it from the auth fields when absent.
async fn load_or_create_profile(backend: &Backend, auth_user: &AuthUser) -> anyhow::Result<UserProfile> {
    if let Some(profile) = backend.get_profile(&auth_user.uid).await? {
        return Ok(profile);
    }

    let profile = UserProfile::new(
        auth_user.uid.clone(),
        auth_user.email.clone(),
        Some(fallback_display_name(
            auth_user.display_name.as_deref(),
            auth_user.email.as_deref(),
        )),
        auth_user.photo_url.clone(),
    );
    backend.set_profile(&profile).await?;
    info!(uid = %profile.uid, "Created missing user profile");
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_token_settles_signed_out() {
        let backend = Backend::in_memory().await;
        let session = SessionProvider::mount(backend, None).await;

        let state = session.ready().await;
        assert!(!state.loading);
        assert!(state.user.is_none());
        assert!(state.auth_user.is_none());
        assert!(!session.loading());
    }

    #[tokio::test]
    async fn test_missing_profile_is_created_from_email() {
        let backend = Backend::in_memory().await;
        let auth = backend
            .auth()
            .create_user_with_email_and_password("grace@example.com", "secret1")
            .await
            .unwrap();

        let session = SessionProvider::mount(backend.clone(), Some(auth.token)).await;
        let state = session.ready().await;
        let user = state.user.unwrap();
        assert_eq!(user.uid, auth.user.uid);
        assert_eq!(user.display_name.as_deref(), Some("grace"));
        assert_eq!(user.email.as_deref(), Some("grace@example.com"));

        let stored = backend.get_profile(&user.uid).await.unwrap();
        assert_eq!(stored, Some(user));
    }

    #[tokio::test]
    async fn test_existing_profile_is_loaded() {
        let backend = Backend::in_memory().await;
        let auth = backend
            .auth()
            .create_user_with_email_and_password("grace@example.com", "secret1")
            .await
            .unwrap();
        let profile = UserProfile::new(
            auth.user.uid.clone(),
            auth.user.email.clone(),
            Some("Grace Hopper".to_string()),
            None,
        );
        backend.set_profile(&profile).await.unwrap();

        let session = SessionProvider::mount(backend, Some(auth.token)).await;
        session.ready().await;
        assert_eq!(session.user(), Some(profile));
    }

    #[tokio::test]
    async fn test_logout_clears_state() {
        let backend = Backend::in_memory().await;
        let auth = backend
            .auth()
            .create_user_with_email_and_password("grace@example.com", "secret1")
            .await
            .unwrap();

        let session = SessionProvider::mount(backend.clone(), Some(auth.token.clone())).await;
        assert!(session.ready().await.user.is_some());

        session.logout().await.unwrap();
        let state = session.state();
        assert!(state.user.is_none());
        assert!(state.auth_user.is_none());
        assert!(!state.loading);
        assert!(backend.auth().current_user(&auth.token).await.is_none());
    }

    #[tokio::test]
    async fn test_backend_sign_out_reaches_provider() {
        let backend = Backend::in_memory().await;
        let auth = backend
            .auth()
            .create_user_with_email_and_password("grace@example.com", "secret1")
            .await
            .unwrap();

        let session = SessionProvider::mount(backend.clone(), Some(auth.token.clone())).await;
        session.ready().await;

        let mut rx = session.subscribe();
        backend.auth().sign_out(&auth.token).await.unwrap();
        let state = rx.wait_for(|state| state.user.is_none()).await.unwrap().clone();
        assert!(state.auth_user.is_none());
    }
}
