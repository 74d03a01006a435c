//! Authentication service: password registration/login and OAuth2 login
//! behind one signed session token.

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
mod handlers;
pub mod models;
pub mod repository;
mod schema;

use auth::oauth::OAuthFlow;
use auth::AuthConfig;
use repository::UserRepository;

/// Shared, immutable application state.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthConfig>,
    pub users: Arc<dyn UserRepository>,
    pub oauth: Arc<OAuthFlow>,
}

impl AppState {
    pub fn new(
        auth: AuthConfig,
        users: Arc<dyn UserRepository>,
        registry: auth::oauth::ProviderRegistry,
    ) -> Self {
        let oauth = OAuthFlow::new(auth.codec.clone(), registry);
        Self {
            auth: Arc::new(auth),
            users,
            oauth: Arc::new(oauth),
        }
    }
}

/// Build the HTTP router.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let protected = Router::new()
        .route("/users/me", get(auth::me))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/oauth/:provider", get(auth::oauth_start))
        .route("/auth/oauth/:provider/callback", get(auth::oauth_callback))
        .merge(protected)
        .layer(build_cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build CORS layer from the configured origins.
///
/// Credentials (cookies) are allowed, so origins must be listed explicitly.
/// With no origins configured, cross-origin requests are not allowed.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    if origins.is_empty() {
        tracing::warn!("ALLOWED_ORIGINS not set, cross-origin requests will be rejected");
        return CorsLayer::new();
    }

    tracing::info!("CORS configured for origins: {:?}", origins);
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
