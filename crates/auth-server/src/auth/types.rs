//! Auth-related types and configuration.

use serde::{Deserialize, Serialize};

use super::cookie::CookiePolicy;
use super::jwt::TokenCodec;

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "access_token";

/// Name of the cookie carrying the raw OAuth state token.
pub const STATE_COOKIE: &str = "oauth_state";

/// Claims of a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user email)
    pub sub: String,
}

/// Claims of an OAuth state (CSRF) token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateClaims {
    /// 16 random bytes, hex encoded
    pub nonce: String,
}

/// Every token the codec signs is exactly one of these kinds.
///
/// The `kind` tag is part of the signed payload, so a state token can never
/// be replayed as a session token or the other way round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Claims {
    Session(SessionClaims),
    State(StateClaims),
}

/// Authenticated principal derived from a verified session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject_key: String,
}

/// Process-wide auth configuration, built once at startup and shared by `Arc`.
#[derive(Clone)]
pub struct AuthConfig {
    pub codec: TokenCodec,
    pub cookies: CookiePolicy,
    pub session_cookie: String,
    pub state_cookie: String,
}

impl AuthConfig {
    pub fn new(codec: TokenCodec, cookies: CookiePolicy) -> Self {
        Self {
            codec,
            cookies,
            session_cookie: SESSION_COOKIE.to_string(),
            state_cookie: STATE_COOKIE.to_string(),
        }
    }
}
