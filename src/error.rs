use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// AccessError
///
/// The single failure taxonomy shared by the credential store, identity resolution, the guest
/// quota and the library service. Every variant is recoverable at the caller; the HTTP layer turns
/// each one into a user-visible message via `IntoResponse`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Registration conflict (identifier already taken or reserved).
    #[error("Identifier already exists")]
    AlreadyExists,

    #[error("Invalid credentials")]
    InvalidCredentials,

    /// A route that needs a logged-in identity was called by a guest.
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Not found")]
    NotFound,

    /// A guest has used up the daily download allowance for its key.
    #[error("Guest download quota exceeded")]
    QuotaExceeded,

    #[error("Invalid or expired reset code")]
    InvalidResetCode,

    #[error("Forbidden")]
    Forbidden,

    #[error("Validation error: {0}")]
    Validation(String),

    /// A collaborator (database, blob store) failed. Propagated, never masked.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl From<sqlx::Error> for AccessError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("database error: {:?}", e);
        AccessError::StorageUnavailable(e.to_string())
    }
}

/// Result alias used by every service and repository call.
pub type AccessResult<T> = Result<T, AccessError>;

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AccessError::AlreadyExists => (StatusCode::CONFLICT, "Identifier already exists"),
            AccessError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid or unverified credentials")
            }
            AccessError::NotAuthenticated => (StatusCode::UNAUTHORIZED, "Login required"),
            AccessError::NotFound => (StatusCode::NOT_FOUND, "Not found"),
            AccessError::QuotaExceeded => (
                StatusCode::TOO_MANY_REQUESTS,
                "Guests have reached today's download limit. Please log in for unlimited access.",
            ),
            AccessError::InvalidResetCode => (StatusCode::BAD_REQUEST, "Invalid or expired reset code"),
            AccessError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden"),
            AccessError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
            AccessError::StorageUnavailable(msg) => {
                tracing::error!("storage unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Storage unavailable")
            }
        };

        let body = json!({ "success": false, "reason": message });
        (status, Json(body)).into_response()
    }
}
