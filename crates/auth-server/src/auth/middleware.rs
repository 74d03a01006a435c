//! Session guard for protected routes.
//!
//! The token is taken from `Authorization: Bearer` first and from the session
//! cookie otherwise. Missing, invalid and expired tokens all get the same 401.

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::AppState;

use super::cookie;
use super::jwt::TokenError;
use super::types::{AuthConfig, Identity};

/// Why a request was rejected. Only logged, never sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardRejection {
    Missing,
    Invalid(TokenError),
}

/// Middleware function that requires authentication.
///
/// Use with `axum::middleware::from_fn_with_state`; on success the
/// [`Identity`] is stored in the request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match authenticate_headers(request.headers(), &state.auth) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(rejection) => {
            tracing::debug!("Rejected unauthenticated request: {:?}", rejection);
            ApiError::unauthenticated().into_response()
        }
    }
}

/// Pull a session token out of the request headers.
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    extract_token_from_header(headers).or_else(|| cookie::read(headers, cookie_name))
}

fn extract_token_from_header(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Extract and verify the session token from request headers.
pub fn authenticate_headers(
    headers: &HeaderMap,
    config: &AuthConfig,
) -> Result<Identity, GuardRejection> {
    let token = extract_token(headers, &config.session_cookie).ok_or(GuardRejection::Missing)?;
    let claims = config
        .codec
        .verify_session(&token)
        .map_err(GuardRejection::Invalid)?;

    Ok(Identity {
        subject_key: claims.sub,
    })
}

/// Handlers behind [`require_auth`] can take `Identity` directly. Used
/// without the middleware it verifies the request itself.
#[async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>() {
            return Ok(identity.clone());
        }

        authenticate_headers(&parts.headers, &state.auth).map_err(|rejection| {
            tracing::debug!("Rejected unauthenticated request: {:?}", rejection);
            ApiError::unauthenticated()
        })
    }
}
