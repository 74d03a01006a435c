//! Process configuration.
//!
//! Settings come from command-line flags or the environment (a `.env` file is
//! loaded first by `main`). They are turned into an immutable [`AuthConfig`]
//! and [`ProviderRegistry`] once at startup.

use std::sync::Arc;

use chrono::Duration;
use clap::{builder::BoolishValueParser, ArgAction, Parser};
use thiserror::Error;

use crate::auth::cookie::CookiePolicy;
use crate::auth::jwt::{parse_algorithm, AlgorithmError, TokenCodec};
use crate::auth::oauth::{HttpOAuthProvider, ProviderDescriptor, ProviderRegistry};
use crate::auth::AuthConfig;

/// Longest accepted session lifetime (one year).
pub const MAX_EXPIRE_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("JWT_SECRET must not be empty")]
    EmptySecret,

    #[error(transparent)]
    Algorithm(#[from] AlgorithmError),

    #[error("failed to build OAuth HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Clone, Parser)]
#[command(name = "auth-server")]
#[command(about = "Password and OAuth2 login service issuing signed session cookies")]
pub struct Settings {
    /// Google OAuth client ID. Google login is disabled when empty.
    #[arg(long, env = "GOOGLE_CLIENT_ID", default_value = "")]
    pub google_client_id: String,

    /// Google OAuth client secret.
    #[arg(long, env = "GOOGLE_CLIENT_SECRET", default_value = "", hide_env_values = true)]
    pub google_client_secret: String,

    /// OAuth callback URI registered with the provider.
    #[arg(long, env = "REDIRECT_URI", default_value = "")]
    pub redirect_uri: String,

    /// Shared secret used to sign session and state tokens.
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// HMAC algorithm: HS256, HS384 or HS512.
    #[arg(long, env = "JWT_ALGORITHM", default_value = "HS256")]
    pub jwt_algorithm: String,

    /// Session token lifetime in minutes, at most one year.
    #[arg(
        long,
        env = "JWT_EXPIRE_MINUTES",
        default_value_t = 30,
        value_parser = clap::value_parser!(i64).range(1..=MAX_EXPIRE_MINUTES)
    )]
    pub jwt_expire_minutes: i64,

    /// Comma-separated list of origins allowed by CORS.
    #[arg(long, env = "ALLOWED_ORIGINS", default_value = "")]
    pub allowed_origins: String,

    /// Postgres connection string. Uses an in-memory user store when empty.
    #[arg(long, env = "DATABASE_URL", default_value = "", hide_env_values = true)]
    pub database_url: String,

    /// Cookie domain. Empty, localhost and loopback addresses mean host-only cookies.
    #[arg(long, env = "COOKIE_DOMAIN", default_value = "")]
    pub cookie_domain: String,

    /// Mark cookies `Secure` (ignored for local cookie domains).
    #[arg(
        long,
        env = "COOKIE_SECURE",
        action = ArgAction::Set,
        default_value = "false",
        value_parser = BoolishValueParser::new()
    )]
    pub cookie_secure: bool,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,
}

impl Settings {
    pub fn allowed_origins(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn database_url(&self) -> Option<&str> {
        let url = self.database_url.trim();
        (!url.is_empty()).then_some(url)
    }

    pub fn auth_config(&self) -> Result<AuthConfig, ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }

        let algorithm = parse_algorithm(&self.jwt_algorithm)?;
        let codec = TokenCodec::new(
            self.jwt_secret.as_bytes(),
            algorithm,
            Duration::minutes(self.jwt_expire_minutes),
        );
        let cookies = CookiePolicy::new(&self.cookie_domain, self.cookie_secure);

        Ok(AuthConfig::new(codec, cookies))
    }

    pub fn provider_registry(&self) -> Result<ProviderRegistry, ConfigError> {
        let mut registry = ProviderRegistry::default();

        if !self.google_client_id.is_empty() && !self.google_client_secret.is_empty() {
            let descriptor = ProviderDescriptor::google(
                &self.google_client_id,
                &self.google_client_secret,
                &self.redirect_uri,
            );
            registry.register(Arc::new(HttpOAuthProvider::new(descriptor)?));
        } else {
            tracing::warn!("GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET not set, Google login disabled");
        }

        Ok(registry)
    }
}
