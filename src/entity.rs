use serde::{Deserialize, Serialize};
use std::fmt;

/// Display name used when neither the account nor its email yields one.
pub const ANONYMOUS_DISPLAY_NAME: &str = "Anonymous User";

/// A profile record stored under `users/{uid}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL", default)]
    pub photo_url: Option<String>,
}

impl UserProfile {
    pub fn new(
        uid: impl Into<String>,
        email: Option<String>,
        display_name: Option<String>,
        photo_url: Option<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            email,
            display_name,
            photo_url,
        }
    }

    /// Name to show when addressing this user in prose.
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or("User")
    }
}

impl fmt::Display for UserProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.uid)
    }
}

/// Picks a display name for a freshly synthesized profile: the account's own
/// name, then the local part of the email, then [`ANONYMOUS_DISPLAY_NAME`].
pub fn fallback_display_name(display_name: Option<&str>, email: Option<&str>) -> String {
    display_name
        .filter(|name| !name.is_empty())
        .or_else(|| {
            email
                .and_then(|email| email.split('@').next())
                .filter(|local| !local.is_empty())
        })
        .unwrap_or(ANONYMOUS_DISPLAY_NAME)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_prefers_account_name() {
        assert_eq!(
            fallback_display_name(Some("Ada"), Some("ada@example.com")),
            "Ada"
        );
    }

    #[test]
    fn test_fallback_uses_email_local_part() {
        assert_eq!(fallback_display_name(None, Some("grace@example.com")), "grace");
        assert_eq!(fallback_display_name(Some(""), Some("grace@example.com")), "grace");
    }

    #[test]
    fn test_fallback_anonymous() {
        assert_eq!(fallback_display_name(None, None), ANONYMOUS_DISPLAY_NAME);
        assert_eq!(fallback_display_name(None, Some("@example.com")), ANONYMOUS_DISPLAY_NAME);
    }

    #[test]
    fn test_profile_json_field_names() {
        let profile = UserProfile::new(
            "u1",
            Some("a@b.co".to_string()),
            Some("A".to_string()),
            None,
        );
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["uid"], "u1");
        assert_eq!(json["displayName"], "A");
        assert!(json["photoURL"].is_null());
    }
}
