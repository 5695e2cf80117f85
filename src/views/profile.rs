use tracing::error;

use crate::backend::Backend;
use crate::bus::Notification;
use crate::entity::UserProfile;

/// Edits the signed-in user's display name. Only the profile record is
/// written; the auth account keeps whatever name it had.
#[derive(Debug, Clone)]
pub struct ProfileEditor {
    uid: String,
    display_name: String,
}

impl ProfileEditor {
    pub fn new(profile: &UserProfile) -> Self {
        Self {
            uid: profile.uid.clone(),
            display_name: profile.display_name.clone().unwrap_or_default(),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn set_display_name(&mut self, display_name: impl Into<String>) {
        self.display_name = display_name.into();
    }

    /// Write the edited name. Either way the resulting toast also goes to
    /// the user's notification stream.
    pub async fn save(&self, backend: &Backend) -> Result<UserProfile, Notification> {
        match backend.update_display_name(&self.uid, &self.display_name).await {
            Ok(profile) => {
                backend.notify(
                    &self.uid,
                    Notification::success(
                        "Profile Updated",
                        "Your profile information has been successfully updated.",
                    ),
                );
                Ok(profile)
            }
            Err(e) => {
                error!(uid = %self.uid, error = %e, "Error updating profile");
                let notification = Notification::error(
                    "Update Failed",
                    "Could not update your profile. Please try again.",
                );
                backend.notify(&self.uid, notification.clone());
                Err(notification)
            }
        }
    }
}
