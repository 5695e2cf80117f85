use crate::{
    chat::{ChatMessage, ChatSummary, ChatSummaryPatch, ConversationKey, LastMessage, NewMessage},
    entity::UserProfile,
};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow},
    ConnectOptions, Row, SqlitePool,
};
use std::{path::Path, str::FromStr, time::Duration};
use uuid::Uuid;

/// Stored credentials of an email/password account.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub uid: String,
    pub email: String,
    /// PHC string: algorithm, parameters, salt and digest.
    pub password_hash: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

/// How long a writer waits for another connection's lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// A private in-memory database with the schema applied.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        // Every connection to `:memory:` is a separate database, so pin the
        // pool to a single connection that never expires.
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Drop a table so the next write against it fails.
    #[cfg(test)]
    pub async fn drop_table(&self, table: &str) -> Result<()> {
        sqlx::query(&format!("DROP TABLE {}", table))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                uid TEXT PRIMARY KEY,
                email TEXT,
                display_name TEXT,
                photo_url TEXT
            );

            CREATE TABLE IF NOT EXISTS accounts (
                uid TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                display_name TEXT,
                photo_url TEXT,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                users TEXT,
                last_message_text TEXT,
                last_message_sender TEXT,
                last_message_timestamp_us INTEGER
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                chat_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                sender_display_name TEXT,
                sender_photo_url TEXT,
                text TEXT NOT NULL,
                timestamp_us INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_chat_timestamp ON messages(chat_id, timestamp_us, seq);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    // ---------------------------------------------------------------------
    // users/{uid}
    // ---------------------------------------------------------------------

    pub async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>> {
        let row = sqlx::query("SELECT uid, email, display_name, photo_url FROM users WHERE uid = ?")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user profile")?;

        row.as_ref().map(profile_from_row).transpose()
    }

    /// Write the whole profile record, replacing any existing one.
    pub async fn set_user(&self, profile: &UserProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (uid, email, display_name, photo_url)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(uid) DO UPDATE SET
                email = excluded.email,
                display_name = excluded.display_name,
                photo_url = excluded.photo_url
            "#,
        )
        .bind(&profile.uid)
        .bind(&profile.email)
        .bind(&profile.display_name)
        .bind(&profile.photo_url)
        .execute(&self.pool)
        .await
        .context("Failed to save user profile")?;

        Ok(())
    }

    /// Change only `displayName` of an existing profile.
    pub async fn update_display_name(&self, uid: &str, display_name: &str) -> Result<UserProfile> {
        let result = sqlx::query("UPDATE users SET display_name = ? WHERE uid = ?")
            .bind(display_name)
            .bind(uid)
            .execute(&self.pool)
            .await
            .context("Failed to update display name")?;

        if result.rows_affected() == 0 {
            bail!("No profile document for user {}", uid);
        }

        self.get_user(uid)
            .await?
            .with_context(|| format!("Profile for user {} vanished during update", uid))
    }

    /// All profiles except `uid`, in uid order.
    pub async fn list_users_except(&self, uid: &str) -> Result<Vec<UserProfile>> {
        let rows = sqlx::query(
            "SELECT uid, email, display_name, photo_url FROM users WHERE uid != ? ORDER BY uid",
        )
        .bind(uid)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list user profiles")?;

        rows.iter().map(profile_from_row).collect()
    }

    // ---------------------------------------------------------------------
    // chats/{chatId}/messages
    // ---------------------------------------------------------------------

    /// Append a message. The timestamp is taken from the server clock but
    /// never goes below the newest timestamp already in the conversation.
    ///
    /// Reading the newest timestamp and inserting happen in one statement, so
    /// the write lock is taken up front and concurrent senders queue on the
    /// busy timeout instead of failing a lock upgrade.
    pub async fn add_message(&self, chat_id: &ConversationKey, msg: &NewMessage) -> Result<ChatMessage> {
        let id = Uuid::new_v4().simple().to_string();
        let now = Utc::now().timestamp_micros();

        let timestamp_us: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (id, chat_id, sender_id, sender_display_name, sender_photo_url, text, timestamp_us)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, MAX(?7, COALESCE(MAX(timestamp_us), ?7))
            FROM messages
            WHERE chat_id = ?2
            RETURNING timestamp_us
            "#,
        )
        .bind(&id)
        .bind(chat_id.as_str())
        .bind(&msg.sender_id)
        .bind(&msg.sender_display_name)
        .bind(&msg.sender_photo_url)
        .bind(&msg.text)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("Failed to save message")?;

        Ok(ChatMessage {
            id,
            chat_id: chat_id.clone(),
            sender_id: msg.sender_id.clone(),
            sender_display_name: msg.sender_display_name.clone(),
            sender_photo_url: msg.sender_photo_url.clone(),
            text: msg.text.clone(),
            timestamp: from_micros(timestamp_us)?,
        })
    }

    /// Every message of a conversation, oldest first.
    pub async fn messages(&self, chat_id: &ConversationKey) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, chat_id, sender_id, sender_display_name, sender_photo_url, text, timestamp_us
            FROM messages
            WHERE chat_id = ?
            ORDER BY timestamp_us ASC, seq ASC
            "#,
        )
        .bind(chat_id.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch messages")?;

        rows.iter()
            .map(|row| -> Result<ChatMessage> {
                Ok(ChatMessage {
                    id: row.try_get("id")?,
                    chat_id: chat_id.clone(),
                    sender_id: row.try_get("sender_id")?,
                    sender_display_name: row.try_get("sender_display_name")?,
                    sender_photo_url: row.try_get("sender_photo_url")?,
                    text: row.try_get("text")?,
                    timestamp: from_micros(row.try_get("timestamp_us")?)?,
                })
            })
            .collect()
    }

    // ---------------------------------------------------------------------
    // chats/{chatId}
    // ---------------------------------------------------------------------

    /// Upsert the conversation summary, keeping stored fields the patch leaves
    /// unset. The last-message timestamp comes from the server clock.
    pub async fn merge_chat_summary(&self, chat_id: &ConversationKey, patch: &ChatSummaryPatch) -> Result<()> {
        let users = patch
            .users
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode chat participants")?;
        let last = patch.last_message.as_ref();
        let last_timestamp = last.map(|_| Utc::now().timestamp_micros());

        sqlx::query(
            r#"
            INSERT INTO chats (id, users, last_message_text, last_message_sender, last_message_timestamp_us)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                users = COALESCE(excluded.users, chats.users),
                last_message_text = COALESCE(excluded.last_message_text, chats.last_message_text),
                last_message_sender = COALESCE(excluded.last_message_sender, chats.last_message_sender),
                last_message_timestamp_us = COALESCE(excluded.last_message_timestamp_us, chats.last_message_timestamp_us)
            "#,
        )
        .bind(chat_id.as_str())
        .bind(users)
        .bind(last.map(|l| l.text.as_str()))
        .bind(last.map(|l| l.sender_id.as_str()))
        .bind(last_timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to save chat summary")?;

        Ok(())
    }

    pub async fn chat_summary(&self, chat_id: &ConversationKey) -> Result<Option<ChatSummary>> {
        let row = sqlx::query(
            r#"
            SELECT users, last_message_text, last_message_sender, last_message_timestamp_us
            FROM chats
            WHERE id = ?
            "#,
        )
        .bind(chat_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch chat summary")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let users: Option<String> = row.try_get("users")?;
        let users = users
            .map(|raw| serde_json::from_str::<[String; 2]>(&raw))
            .transpose()
            .context("Corrupt chat participants")?;

        let text: Option<String> = row.try_get("last_message_text")?;
        let sender: Option<String> = row.try_get("last_message_sender")?;
        let timestamp: Option<i64> = row.try_get("last_message_timestamp_us")?;
        let last_message = match (text, sender, timestamp) {
            (Some(text), Some(sender_id), Some(ts)) => Some(LastMessage {
                text,
                sender_id,
                timestamp: from_micros(ts)?,
            }),
            _ => None,
        };

        Ok(Some(ChatSummary {
            id: chat_id.clone(),
            users,
            last_message,
        }))
    }

    // ---------------------------------------------------------------------
    // accounts
    // ---------------------------------------------------------------------

    /// Insert a new account. Returns `false` when the email is already taken.
    pub async fn insert_account(&self, account: &AccountRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (uid, email, password_hash, display_name, photo_url)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(email) DO NOTHING
            "#,
        )
        .bind(&account.uid)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&account.display_name)
        .bind(&account.photo_url)
        .execute(&self.pool)
        .await
        .context("Failed to save account")?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn account_by_email(&self, email: &str) -> Result<Option<AccountRecord>> {
        let row = sqlx::query(
            r#"
            SELECT uid, email, password_hash, display_name, photo_url
            FROM accounts
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account")?;

        row.map(|row| -> Result<AccountRecord> {
            Ok(AccountRecord {
                uid: row.try_get("uid")?,
                email: row.try_get("email")?,
                password_hash: row.try_get("password_hash")?,
                display_name: row.try_get("display_name")?,
                photo_url: row.try_get("photo_url")?,
            })
        })
        .transpose()
    }
}

fn profile_from_row(row: &SqliteRow) -> Result<UserProfile> {
    Ok(UserProfile {
        uid: row.try_get("uid")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        photo_url: row.try_get("photo_url")?,
    })
}

fn from_micros(us: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(us).with_context(|| format!("Timestamp out of range: {}", us))
}
