use serde::Deserialize;
use tracing::error;

use crate::auth::{normalize_email, AuthError, AuthSession, MIN_DISPLAY_NAME_LEN, MIN_PASSWORD_LEN};
use crate::backend::Backend;
use crate::entity::UserProfile;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpForm {
    pub display_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

fn validate_credentials(email: &str, password: &str) -> Result<(), AuthError> {
    normalize_email(email)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword);
    }
    Ok(())
}

impl SignUpForm {
    /// The display name as it is checked and stored.
    pub fn display_name(&self) -> &str {
        self.display_name.trim()
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if self.display_name().chars().count() < MIN_DISPLAY_NAME_LEN {
            return Err(AuthError::DisplayNameTooShort);
        }
        validate_credentials(&self.email, &self.password)
    }

    /// Create the account and its profile record with the chosen name. If the
    /// profile cannot be written the new session is ended again.
    pub async fn submit(&self, backend: &Backend) -> Result<AuthSession, AuthError> {
        self.validate()?;

        let session = backend
            .auth()
            .create_user_with_email_and_password(&self.email, &self.password)
            .await
            .map_err(|e| {
                error!(error = %e, "Sign up failed");
                e
            })?;

        let profile = UserProfile::new(
            session.user.uid.clone(),
            session.user.email.clone(),
            Some(self.display_name().to_string()),
            session.user.photo_url.clone(),
        );
        if let Err(e) = backend.set_profile(&profile).await {
            error!(uid = %profile.uid, error = %e, "Failed to create profile after sign up");
            backend.auth().sign_out(&session.token).await?;
            return Err(e.into());
        }

        Ok(session)
    }
}

impl LoginForm {
    pub fn validate(&self) -> Result<(), AuthError> {
        validate_credentials(&self.email, &self.password)
    }

    pub async fn submit(&self, backend: &Backend) -> Result<AuthSession, AuthError> {
        self.validate()?;

        backend
            .auth()
            .sign_in_with_email_and_password(&self.email, &self.password)
            .await
            .map_err(|e| {
                error!(error = %e, "Login failed");
                e
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_up(name: &str, email: &str, password: &str) -> SignUpForm {
        SignUpForm {
            display_name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn test_sign_up_validation() {
        assert!(sign_up("Ada", "ada@example.com", "secret1").validate().is_ok());
        assert!(matches!(
            sign_up("A", "ada@example.com", "secret1").validate(),
            Err(AuthError::DisplayNameTooShort)
        ));
        assert!(matches!(
            sign_up("Ada", "not-an-email", "secret1").validate(),
            Err(AuthError::InvalidEmail)
        ));
        assert!(matches!(
            sign_up("Ada", "ada@example.com", "short").validate(),
            Err(AuthError::WeakPassword)
        ));
    }

    #[tokio::test]
    async fn test_sign_up_creates_profile_with_chosen_name() {
        let backend = Backend::in_memory().await;
        let session = sign_up("Ada Lovelace", "Ada@Example.com", "secret1")
            .submit(&backend)
            .await
            .unwrap();

        let profile = backend.get_profile(&session.user.uid).await.unwrap().unwrap();
        assert_eq!(profile.uid, session.user.uid);
        assert_eq!(profile.display_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(profile.email.as_deref(), Some("ada@example.com"));
    }

    #[tokio::test]
    async fn test_sign_up_stores_trimmed_name() {
        let backend = Backend::in_memory().await;
        let form = sign_up("  Ada  ", "ada@example.com", "secret1");
        assert_eq!(form.display_name(), "Ada");

        let session = form.submit(&backend).await.unwrap();
        let profile = backend.get_profile(&session.user.uid).await.unwrap().unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Ada"));

        assert!(matches!(
            sign_up(" A  ", "grace@example.com", "secret1").validate(),
            Err(AuthError::DisplayNameTooShort)
        ));
    }

    #[tokio::test]
    async fn test_failed_profile_write_ends_session() {
        let backend = Backend::in_memory().await;
        backend.store().drop_table("users").await.unwrap();

        let err = sign_up("Ada", "ada@example.com", "secret1")
            .submit(&backend)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Backend(_)));
        assert_eq!(backend.auth().session_count().await, 0);
    }

    #[tokio::test]
    async fn test_login_after_sign_up() {
        let backend = Backend::in_memory().await;
        let created = sign_up("Ada", "ada@example.com", "secret1")
            .submit(&backend)
            .await
            .unwrap();

        let login = LoginForm {
            email: "ada@example.com".to_string(),
            password: "secret1".to_string(),
        };
        let session = login.submit(&backend).await.unwrap();
        assert_eq!(session.user.uid, created.user.uid);

        let bad = LoginForm {
            password: "wrong-pass".to_string(),
            ..login
        };
        assert!(matches!(
            bad.submit(&backend).await,
            Err(AuthError::InvalidCredential)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_sign_up_is_reported() {
        let backend = Backend::in_memory().await;
        sign_up("Ada", "ada@example.com", "secret1")
            .submit(&backend)
            .await
            .unwrap();
        let err = sign_up("Imposter", "ada@example.com", "secret2")
            .submit(&backend)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailAlreadyInUse));
    }
}
