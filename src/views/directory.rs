use serde::Serialize;
use tracing::error;

use crate::backend::Backend;
use crate::entity::UserProfile;
use crate::live::{LiveQuery, Snapshot};
use crate::views::initials;

const PLACEHOLDER_ROWS: usize = 5;

/// The list of everyone except the signed-in user.
pub struct DirectoryView {
    current_uid: String,
    users: Vec<UserProfile>,
    selected: Option<String>,
    loading: bool,
    query: LiveQuery<UserProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum DirectoryRender {
    Loading { placeholders: usize },
    Empty { message: &'static str },
    Contacts { contacts: Vec<ContactRow> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRow {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    pub initials: String,
    pub selected: bool,
}

impl DirectoryView {
    pub fn mount(backend: &Backend, current: &UserProfile) -> Self {
        Self {
            current_uid: current.uid.clone(),
            users: Vec::new(),
            selected: None,
            loading: true,
            query: backend.watch_users_except(&current.uid),
        }
    }

    /// Resubscribe if the signed-in identity changed.
    pub fn set_identity(&mut self, backend: &Backend, current: &UserProfile) {
        if current.uid != self.current_uid {
            *self = Self::mount(backend, current);
        }
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

    fn apply(&mut self, snapshot: Snapshot<UserProfile>) {
        match snapshot {
            Ok(users) => self.users = users,
            Err(e) => error!(uid = %self.current_uid, error = %e, "Error fetching users"),
        }
        self.loading = false;
    }

    /// Mark a contact as selected and hand back its profile.
    pub fn select(&mut self, uid: &str) -> Option<UserProfile> {
        let user = self.users.iter().find(|u| u.uid == uid).cloned()?;
        self.selected = Some(user.uid.clone());
        Some(user)
    }

    pub fn users(&self) -> &[UserProfile] {
        &self.users
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn render(&self) -> DirectoryRender {
        if self.loading {
            return DirectoryRender::Loading {
                placeholders: PLACEHOLDER_ROWS,
            };
        }
        if self.users.is_empty() {
            return DirectoryRender::Empty {
                message: "No other users found.",
            };
        }

        let contacts = self
            .users
            .iter()
            .map(|user| ContactRow {
                uid: user.uid.clone(),
                display_name: user.display_name.clone(),
                email: user.email.clone(),
                photo_url: user.photo_url.clone(),
                initials: initials(user.display_name.as_deref()),
                selected: self.selected.as_deref() == Some(user.uid.as_str()),
            })
            .collect();
        DirectoryRender::Contacts { contacts }
    }

    pub fn unmount(self) {}
}
