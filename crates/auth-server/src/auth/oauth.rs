//! OAuth2 authorization-code flow.
//!
//! Providers are looked up by name in a [`ProviderRegistry`]; the flow itself
//! (state issuance, state verification, code exchange, profile fetch) does not
//! know which provider it is talking to.
//!
//! 1. [`OAuthFlow::start`] mints a state token and builds the provider's
//!    authorize URL. The caller stores the raw state in a short-lived cookie.
//! 2. [`OAuthFlow::callback`] resolves the provider, then requires the `state`
//!    query value to verify under the token codec *and* to equal the state
//!    cookie before any network call is made. It then exchanges the code and fetches the profile, in that
//!    order, without retries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use super::jwt::{TokenCodec, TokenError};

/// Deadline for each outbound provider request.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum OAuthError {
    /// Server misconfiguration, not a client error
    #[error("OAuth provider '{0}' is not registered")]
    UnknownProvider(String),

    #[error("Invalid state token")]
    InvalidState,

    #[error("OAuth provider request failed: {0}")]
    Upstream(String),

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Endpoints and client credentials of one OAuth2 provider.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub name: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl ProviderDescriptor {
    pub fn google(client_id: &str, client_secret: &str, redirect_uri: &str) -> Self {
        Self {
            name: "google".to_string(),
            authorize_url: "https://accounts.google.com/o/oauth2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_url: "https://www.googleapis.com/oauth2/v3/userinfo".to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: redirect_uri.to_string(),
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
        }
    }

    /// Authorize URL with the client id, redirect URI, scopes and `state`.
    pub fn authorize_url_with_state(&self, state: &str) -> String {
        let separator = if self.authorize_url.contains('?') {
            '&'
        } else {
            '?'
        };
        format!(
            "{}{}client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.authorize_url,
            separator,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&self.scopes.join(" ")),
            urlencoding::encode(state),
        )
    }
}

/// Profile fields the service needs from the provider's userinfo endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderProfile {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn name(&self) -> &str;

    fn authorize_url(&self, state: &str) -> String;

    /// Exchange an authorization code for a provider access token.
    async fn exchange_code(&self, code: &str) -> Result<String, OAuthError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, OAuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
}

/// Standard authorization-code provider spoken over HTTPS.
pub struct HttpOAuthProvider {
    descriptor: ProviderDescriptor,
    client: reqwest::Client,
}

impl HttpOAuthProvider {
    pub fn new(descriptor: ProviderDescriptor) -> reqwest::Result<Self> {
        Self::with_timeout(descriptor, PROVIDER_TIMEOUT)
    }

    /// Like [`HttpOAuthProvider::new`] with a custom per-request deadline.
    pub fn with_timeout(
        descriptor: ProviderDescriptor,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { descriptor, client })
    }
}

fn upstream(context: &str, err: reqwest::Error) -> OAuthError {
    if err.is_timeout() {
        OAuthError::Upstream(format!("{} timed out", context))
    } else {
        OAuthError::Upstream(format!("{}: {}", context, err))
    }
}

#[async_trait]
impl OAuthProvider for HttpOAuthProvider {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn authorize_url(&self, state: &str) -> String {
        self.descriptor.authorize_url_with_state(state)
    }

    async fn exchange_code(&self, code: &str) -> Result<String, OAuthError> {
        let d = &self.descriptor;
        let params = [
            ("code", code),
            ("client_id", d.client_id.as_str()),
            ("client_secret", d.client_secret.as_str()),
            ("redirect_uri", d.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let response = self
            .client
            .post(&d.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| upstream("Token exchange", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Token exchange failed: {} - {}", status, body);
            return Err(OAuthError::Upstream(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let tokens: TokenEndpointResponse = response
            .json()
            .await
            .map_err(|e| upstream("Invalid token response", e))?;

        Ok(tokens.access_token)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, OAuthError> {
        let response = self
            .client
            .get(&self.descriptor.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| upstream("User info request", e))?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::error!("User info request failed: {}", status);
            return Err(OAuthError::Upstream(format!(
                "userinfo endpoint returned {}",
                status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| upstream("Invalid user info response", e))
    }
}

/// Registered providers, keyed by the name used in `/auth/oauth/:provider`.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn OAuthProvider>>,
}

impl ProviderRegistry {
    pub fn register(&mut self, provider: Arc<dyn OAuthProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn OAuthProvider>, OAuthError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| OAuthError::UnknownProvider(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Nonces of state tokens that already completed a callback.
///
/// Entries are kept until the state token they belong to has expired, after
/// which the codec rejects the token anyway.
#[derive(Default)]
struct ConsumedStates {
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl ConsumedStates {
    /// Record `nonce`; returns false if it was already recorded.
    fn consume(&self, nonce: &str, retain_until: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.retain(|_, until| *until > now);
        if seen.contains_key(nonce) {
            return false;
        }
        seen.insert(nonce.to_string(), retain_until);
        true
    }
}

/// Result of starting a flow.
#[derive(Debug, Clone)]
pub struct OAuthStart {
    pub auth_url: String,
    /// Raw state token; goes into the state cookie.
    pub state: String,
}

pub struct OAuthFlow {
    codec: TokenCodec,
    registry: ProviderRegistry,
    consumed: ConsumedStates,
}

impl OAuthFlow {
    pub fn new(codec: TokenCodec, registry: ProviderRegistry) -> Self {
        Self {
            codec,
            registry,
            consumed: ConsumedStates::default(),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn start(&self, provider: &str) -> Result<OAuthStart, OAuthError> {
        let provider = self.registry.get(provider)?;
        let (state, _) = self.codec.issue_state()?;
        let auth_url = provider.authorize_url(&state);

        Ok(OAuthStart { auth_url, state })
    }

    /// Validate the callback and resolve the provider profile.
    ///
    /// `cookie_state` is the value of the state cookie, if the client sent one.
    pub async fn callback(
        &self,
        provider: &str,
        code: &str,
        state: &str,
        cookie_state: Option<&str>,
    ) -> Result<ProviderProfile, OAuthError> {
        let provider = self.registry.get(provider)?;

        let claims = match self.codec.verify_state(state) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!("OAuth callback with unverifiable state: {}", e);
                return Err(OAuthError::InvalidState);
            }
        };

        if cookie_state != Some(state) {
            tracing::warn!("OAuth callback state does not match state cookie");
            return Err(OAuthError::InvalidState);
        }

        let now = Utc::now();
        if !self
            .consumed
            .consume(&claims.nonce, now + self.codec.state_ttl(), now)
        {
            tracing::warn!("OAuth callback replayed an already used state");
            return Err(OAuthError::InvalidState);
        }

        let access_token = provider.exchange_code(code).await?;
        let profile = provider.fetch_profile(&access_token).await?;

        tracing::info!("OAuth login via {} for {}", provider.name(), profile.email);
        Ok(profile)
    }
}
