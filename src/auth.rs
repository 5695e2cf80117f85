//! Email/password authentication.
//!
//! Accounts live in the store with argon2id password hashes. Signed-in
//! sessions are held in memory as bearer tokens, each backed by a `watch`
//! channel that carries the session's current [`AuthUser`] (or `None` once
//! signed out). Sessions idle for longer than the configured TTL are swept.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::{AccountRecord, Store};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MIN_DISPLAY_NAME_LEN: usize = 2;

/// How often idle sessions are looked for.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email address.")]
    InvalidEmail,

    #[error("Password must be at least {} characters.", MIN_PASSWORD_LEN)]
    WeakPassword,

    #[error("Display name must be at least {} characters.", MIN_DISPLAY_NAME_LEN)]
    DisplayNameTooShort,

    #[error("An account with this email already exists.")]
    EmailAlreadyInUse,

    #[error("Invalid email or password.")]
    InvalidCredential,

    #[error("Not signed in.")]
    NotSignedIn,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// The identity as the auth service knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

impl From<AccountRecord> for AuthUser {
    fn from(account: AccountRecord) -> Self {
        Self {
            uid: account.uid,
            email: Some(account.email),
            display_name: account.display_name,
            photo_url: account.photo_url,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub token: String,
    pub user: AuthUser,
}

struct Session {
    tx: watch::Sender<Option<AuthUser>>,
    last_seen: Instant,
}

type Sessions = Arc<Mutex<HashMap<String, Session>>>;

pub struct AuthService {
    store: Store,
    sessions: Sessions,
}

impl AuthService {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Periodically end sessions that have not been used for `ttl`.
    pub fn spawn_session_sweeper(&self, ttl: Duration) -> JoinHandle<()> {
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL.min(ttl).max(Duration::from_secs(1)));
            loop {
                interval.tick().await;
                let (removed, remaining) = sweep(&sessions, Instant::now(), ttl).await;
                if removed > 0 {
                    info!(removed, remaining, "Expired idle sessions");
                }
            }
        })
    }

    /// End every session idle for longer than `ttl` as of `now`. Returns the
    /// number removed.
    pub async fn expire_idle_sessions(&self, now: Instant, ttl: Duration) -> usize {
        sweep(&self.sessions, now, ttl).await.0
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Create an account and sign it in.
    pub async fn create_user_with_email_and_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, AuthError> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }

        let account = AccountRecord {
            uid: Uuid::new_v4().simple().to_string(),
            email,
            password_hash: hash_password(password.to_string()).await?,
            display_name: None,
            photo_url: None,
        };

        if !self.store.insert_account(&account).await? {
            return Err(AuthError::EmailAlreadyInUse);
        }

        info!(uid = %account.uid, "Account created");
        Ok(self.start_session(account.into()).await)
    }

    pub async fn sign_in_with_email_and_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, AuthError> {
        let email = normalize_email(email)?;
        let account = self
            .store
            .account_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidCredential)?;

        if !verify_password(password.to_string(), account.password_hash.clone()).await? {
            return Err(AuthError::InvalidCredential);
        }

        info!(uid = %account.uid, "Signed in");
        Ok(self.start_session(account.into()).await)
    }

    /// Subscribe to the auth state of a session. An unknown or absent token
    /// yields a channel that holds `None` and never changes.
    /// Both lookups count as use of the session.
    pub async fn on_auth_state_changed(&self, token: Option<&str>) -> watch::Receiver<Option<AuthUser>> {
        let mut sessions = self.sessions.lock().await;
        match token.and_then(|token| sessions.get_mut(token)) {
            Some(session) => {
                session.last_seen = Instant::now();
                session.tx.subscribe()
            }
            None => watch::channel(None).1,
        }
    }

    pub async fn current_user(&self, token: &str) -> Option<AuthUser> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(token)?;
        session.last_seen = Instant::now();
        let user = session.tx.borrow().clone();
        user
    }

    /// End a session. Subscribers observe `None` before the channel closes.
    pub async fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        let session = self
            .sessions
            .lock()
            .await
            .remove(token)
            .ok_or(AuthError::NotSignedIn)?;

        if let Some(user) = session.tx.send_replace(None) {
            info!(uid = %user.uid, "Signed out");
        }
        Ok(())
    }

    async fn start_session(&self, user: AuthUser) -> AuthSession {
        let token = Uuid::new_v4().simple().to_string();
        let (tx, _rx) = watch::channel(Some(user.clone()));
        let session = Session {
            tx,
            last_seen: Instant::now(),
        };
        self.sessions.lock().await.insert(token.clone(), session);
        AuthSession { token, user }
    }
}

/// Returns `(removed, remaining)`.
async fn sweep(sessions: &Sessions, now: Instant, ttl: Duration) -> (usize, usize) {
    let mut sessions = sessions.lock().await;
    let before = sessions.len();
    sessions.retain(|_, session| {
        let alive = now.saturating_duration_since(session.last_seen) <= ttl;
        if !alive {
            if let Some(user) = session.tx.send_replace(None) {
                debug!(uid = %user.uid, "Session expired");
            }
        }
        alive
    });
    (before - sessions.len(), sessions.len())
}

/// Trim, lower-case and sanity-check an email address.
pub fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(email)
    } else {
        Err(AuthError::InvalidEmail)
    }
}

// Hashing and verification run on the blocking pool.

async fn hash_password(password: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        hasher()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| anyhow!("Failed to hash password: {}", e))
    })
    .await?
}

async fn verify_password(password: String, stored: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed =
            PasswordHash::new(&stored).map_err(|e| anyhow!("Corrupt password hash: {}", e))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await?
}

#[cfg(not(test))]
fn hasher() -> Argon2<'static> {
    Argon2::default()
}

// Minimum cost keeps the test suite fast; verification reads the parameters
// back from the PHC string either way.
#[cfg(test)]
fn hasher() -> Argon2<'static> {
    use argon2::{Algorithm, Params, Version};
    let params = Params::new(Params::MIN_M_COST, Params::MIN_T_COST, 1, None).unwrap_or_default();
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}
