//! Unified error handling for the auth API.
//!
//! Handlers return [`ApiError`] and use `?` on the component errors below it.
//! Token and credential failures are flattened into generic messages here so
//! the client can never tell which check failed.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::auth::jwt::TokenError;
use crate::auth::oauth::OAuthError;
use crate::auth::password::AuthError;
use crate::repository::StoreError;

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Unified error type for API handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// User store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),

    /// Resource not found
    #[error("{0} not found")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Server misconfiguration, e.g. an unregistered OAuth provider
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication required but not provided or invalid
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// OAuth state missing, forged, mismatched or replayed
    #[error("Invalid state token")]
    InvalidState,

    /// OAuth provider request failed
    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl ApiError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        ApiError::NotFound(resource.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    /// The single rejection used for missing, invalid and expired sessions.
    pub fn unauthenticated() -> Self {
        ApiError::Unauthorized("Not authenticated".to_string())
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing => ApiError::Internal(anyhow::anyhow!("failed to sign token")),
            _ => ApiError::unauthenticated(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::BadCredential => ApiError::Unauthorized(err.to_string()),
            AuthError::Store(e) => ApiError::Store(e),
        }
    }
}

impl From<OAuthError> for ApiError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::UnknownProvider(_) => ApiError::Config(err.to_string()),
            OAuthError::InvalidState => ApiError::InvalidState,
            OAuthError::Upstream(msg) => ApiError::Upstream(msg),
            OAuthError::Token(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            ApiError::Store(StoreError::Unavailable(e)) => {
                tracing::error!("User store unavailable: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Database connection unavailable".to_string(),
                    None,
                )
            }
            ApiError::Store(e) => {
                tracing::error!("User store error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database operation failed".to_string(),
                    None,
                )
            }
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                format!("{} not found", resource),
                None,
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            ApiError::Config(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Server configuration error".to_string(),
                    None,
                )
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone(), None),
            ApiError::InvalidState => (
                StatusCode::BAD_REQUEST,
                "Invalid state token".to_string(),
                None,
            ),
            ApiError::Upstream(msg) => {
                tracing::error!("OAuth provider error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "Authentication provider unavailable".to_string(),
                    None,
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
