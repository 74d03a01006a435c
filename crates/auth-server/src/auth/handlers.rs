//! Authentication HTTP handlers.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::Deserialize;
use shared_types::{
    LoginForm, MessageResponse, OAuthStartResponse, RegisterRequest, TokenResponse, UserResponse,
};

use crate::error::{ApiError, ApiResult};
use crate::repository::{NewUser, StoreError};
use crate::AppState;

use super::types::Identity;
use super::{cookie, password};

/// Mint a session token for `subject` and answer with the token body plus the
/// session cookie. Any extra cookies already in `headers` are kept.
fn session_response(state: &AppState, subject: &str, mut headers: HeaderMap) -> ApiResult<Response> {
    let config = &state.auth;
    let token = config.codec.issue_session(subject)?;

    config
        .cookies
        .attach(&mut headers, &config.session_cookie, &token, None)
        .map_err(|e| anyhow::anyhow!("Failed to build session cookie: {}", e))?;

    Ok((headers, Json(TokenResponse::bearer(token))).into_response())
}

/// Register a new user with email and password.
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<Response> {
    password::validate_new_password(&payload.password).map_err(ApiError::bad_request)?;

    if state.users.get_by_email(&payload.email).await?.is_some() {
        return Err(ApiError::bad_request("Email already registered"));
    }

    let password_hash = password::hash_password(&payload.password)?;
    let user = state
        .users
        .create(NewUser {
            email: payload.email,
            password_hash: Some(password_hash),
            full_name: payload.full_name,
            provider: None,
        })
        .await
        .map_err(|e| match e {
            StoreError::Duplicate => ApiError::bad_request("Email already registered"),
            other => other.into(),
        })?;

    tracing::info!("Registered user {}", user.id);
    session_response(&state, &user.email, HeaderMap::new())
}

/// Email/password login. The form's `username` field carries the email.
pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> ApiResult<Response> {
    let user = password::authenticate(state.users.as_ref(), &form.username, &form.password).await?;

    tracing::info!("Password login for user {}", user.id);
    session_response(&state, &user.email, HeaderMap::new())
}

/// Start an OAuth2 flow: return the provider authorize URL and set the state
/// cookie.
pub async fn oauth_start(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> ApiResult<Response> {
    let start = state.oauth.start(&provider)?;

    let config = &state.auth;
    let mut headers = HeaderMap::new();
    config
        .cookies
        .attach(
            &mut headers,
            &config.state_cookie,
            &start.state,
            Some(config.codec.state_ttl()),
        )
        .map_err(|e| anyhow::anyhow!("Failed to build state cookie: {}", e))?;

    Ok((
        headers,
        Json(OAuthStartResponse {
            auth_url: start.auth_url,
        }),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackParams {
    pub code: String,
    pub state: String,
}

/// Handle the provider redirect: verify state, exchange the code, log the
/// user in and drop the consumed state cookie.
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<OAuthCallbackParams>,
    request_headers: HeaderMap,
) -> ApiResult<Response> {
    let config = &state.auth;
    let cookie_state = cookie::read(&request_headers, &config.state_cookie);

    let profile = state
        .oauth
        .callback(&provider, &params.code, &params.state, cookie_state.as_deref())
        .await?;

    let user = state
        .users
        .get_or_create_oauth(&profile.email, &provider)
        .await?;

    let mut headers = HeaderMap::new();
    config
        .cookies
        .clear(&mut headers, &config.state_cookie)
        .map_err(|e| anyhow::anyhow!("Failed to build state cookie: {}", e))?;

    session_response(&state, &user.email, headers)
}

/// Logout - clear the session cookie.
pub async fn logout(State(state): State<AppState>) -> ApiResult<Response> {
    let config = &state.auth;
    let mut headers = HeaderMap::new();
    config
        .cookies
        .clear(&mut headers, &config.session_cookie)
        .map_err(|e| anyhow::anyhow!("Failed to build session cookie: {}", e))?;

    Ok((
        headers,
        Json(MessageResponse {
            message: "Successfully logged out".to_string(),
        }),
    )
        .into_response())
}

/// Get the current user's profile.
pub async fn me(State(state): State<AppState>, identity: Identity) -> ApiResult<Json<UserResponse>> {
    let user = state
        .users
        .get_by_email(&identity.subject_key)
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;

    Ok(Json(user.into()))
}
