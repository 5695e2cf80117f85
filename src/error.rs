use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::auth::AuthError;
use crate::bus::Notification;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not signed in")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A failed write that was already reported to the user as a toast.
    #[error("{}", .0.description)]
    Notified(Notification),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Auth(err) => match err {
                AuthError::InvalidEmail
                | AuthError::WeakPassword
                | AuthError::DisplayNameTooShort => StatusCode::UNPROCESSABLE_ENTITY,
                AuthError::EmailAlreadyInUse => StatusCode::CONFLICT,
                AuthError::InvalidCredential | AuthError::NotSignedIn => StatusCode::UNAUTHORIZED,
                AuthError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Notified(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            ApiError::Notified(notification) => serde_json::json!({
                "error": notification.description,
                "notification": notification,
            }),
            ApiError::Internal(_) | ApiError::Auth(AuthError::Backend(_)) => {
                error!(error = %self, "Request failed");
                serde_json::json!({ "error": "Internal server error" })
            }
            _ => serde_json::json!({ "error": self.to_string() }),
        };

        (status, axum::Json(body)).into_response()
    }
}
