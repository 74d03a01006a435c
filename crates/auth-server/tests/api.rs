//! End-to-end tests for the HTTP API.
//!
//! The router runs in-process against the in-memory user store and a mock
//! OAuth provider that counts its network calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use auth_server::auth::cookie::CookiePolicy;
use auth_server::auth::jwt::TokenCodec;
use auth_server::auth::oauth::{OAuthError, OAuthProvider, ProviderProfile, ProviderRegistry};
use auth_server::auth::AuthConfig;
use auth_server::repository::MemoryUserRepository;
use auth_server::{router, AppState};
use axum::{
    body::{to_bytes, Body},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE},
        Request, Response, StatusCode,
    },
    Router,
};
use chrono::Duration;
use jsonwebtoken::Algorithm;
use serde_json::{json, Value};
use tower::ServiceExt;

#[derive(Default)]
struct MockProvider {
    exchanges: AtomicUsize,
    profiles: AtomicUsize,
}

#[async_trait]
impl OAuthProvider for MockProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn authorize_url(&self, state: &str) -> String {
        format!("https://accounts.example.test/authorize?state={}", state)
    }

    async fn exchange_code(&self, code: &str) -> Result<String, OAuthError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if code == "bad-code" {
            return Err(OAuthError::Upstream("token endpoint returned 400".into()));
        }
        Ok("provider-access-token".to_string())
    }

    async fn fetch_profile(&self, _access_token: &str) -> Result<ProviderProfile, OAuthError> {
        self.profiles.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderProfile {
            email: "oauth@example.com".to_string(),
            name: Some("OAuth User".to_string()),
        })
    }
}

struct TestApp {
    router: Router,
    users: Arc<MemoryUserRepository>,
    provider: Arc<MockProvider>,
}

fn app_with_ttl(session_ttl: Duration) -> TestApp {
    let codec = TokenCodec::new(b"integration-test-secret", Algorithm::HS256, session_ttl);
    let auth = AuthConfig::new(codec, CookiePolicy::new("localhost", true));

    let users = Arc::new(MemoryUserRepository::default());
    let provider = Arc::new(MockProvider::default());
    let mut registry = ProviderRegistry::default();
    registry.register(provider.clone());

    let state = AppState::new(auth, users.clone(), registry);
    TestApp {
        router: router(state, &[]),
        users,
        provider,
    }
}

fn app() -> TestApp {
    app_with_ttl(Duration::minutes(30))
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn register(&self, email: &str, password: &str) -> Response<Body> {
        let body = json!({ "email": email, "password": password, "full_name": "Test User" });
        self.send(
            Request::post("/auth/register")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn login(&self, email: &str, password: &str) -> Response<Body> {
        let form = format!(
            "username={}&password={}",
            urlencoding::encode(email),
            urlencoding::encode(password)
        );
        self.send(
            Request::post("/auth/login")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await
    }

    async fn me_with_cookie(&self, cookie: &str) -> Response<Body> {
        self.send(
            Request::get("/users/me")
                .header(COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// `name=value` part of the first `Set-Cookie` for `name`.
fn cookie_pair(response: &Response<Body>, name: &str) -> String {
    set_cookies(response)
        .into_iter()
        .find(|c| c.starts_with(&format!("{}=", name)))
        .and_then(|c| c.split(';').next().map(str::to_string))
        .unwrap_or_else(|| panic!("no {} cookie set", name))
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let response = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "healthy");
}

#[tokio::test]
async fn test_register_me_then_expire() {
    let app = app_with_ttl(Duration::seconds(3));

    let response = app.register("a@b.com", "longenough1").await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].contains("HttpOnly"));
    // localhost cookie domain: host-only, never Secure
    assert!(!cookies[0].contains("Domain"));
    assert!(!cookies[0].contains("Secure"));

    let cookie = cookie_pair(&response, "access_token");
    let body = json_body(response).await;
    assert_eq!(body["token_type"], "bearer");
    assert_eq!(
        cookie,
        format!("access_token={}", body["access_token"].as_str().unwrap())
    );

    let me = app.me_with_cookie(&cookie).await;
    assert_eq!(me.status(), StatusCode::OK);
    let me = json_body(me).await;
    assert_eq!(me["email"], "a@b.com");
    assert_eq!(me["full_name"], "Test User");
    assert!(me.get("password_hash").is_none());

    tokio::time::sleep(std::time::Duration::from_millis(4100)).await;

    let expired = app.me_with_cookie(&cookie).await;
    assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_rejects_duplicates_and_short_passwords() {
    let app = app();

    assert_eq!(
        app.register("a@b.com", "longenough1").await.status(),
        StatusCode::OK
    );

    let duplicate = app.register("a@b.com", "longenough2").await;
    assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(duplicate).await["error"], "Email already registered");

    let short = app.register("c@d.com", "short").await;
    assert_eq!(short.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_does_not_reveal_which_check_failed() {
    let app = app();
    app.register("a@b.com", "longenough1").await;

    let ok = app.login("a@b.com", "longenough1").await;
    assert_eq!(ok.status(), StatusCode::OK);
    assert!(cookie_pair(&ok, "access_token").len() > "access_token=".len());

    let wrong_password = app.login("a@b.com", "wrong-password").await;
    let unknown_email = app.login("nobody@b.com", "longenough1").await;

    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_email.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookies(&wrong_password).is_empty());

    let a = json_body(wrong_password).await;
    let b = json_body(unknown_email).await;
    assert_eq!(a, b);
    assert_eq!(a["error"], "Incorrect email or password");
}

#[tokio::test]
async fn test_me_requires_valid_session() {
    let app = app();

    let missing = app
        .send(Request::get("/users/me").body(Body::empty()).unwrap())
        .await;
    let garbage = app.me_with_cookie("access_token=not-a-token").await;

    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(missing).await, json_body(garbage).await);
}

#[tokio::test]
async fn test_me_tampered_session_looks_like_missing() {
    let app = app();
    let session = cookie_pair(&app.register("a@b.com", "longenough1").await, "access_token");

    let (head, signature) = session.rsplit_once('.').unwrap();
    let first = if signature.starts_with('A') { 'B' } else { 'A' };
    let tampered = format!("{}.{}{}", head, first, &signature[1..]);

    let missing = app
        .send(Request::get("/users/me").body(Body::empty()).unwrap())
        .await;
    let forged = app.me_with_cookie(&tampered).await;

    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(missing).await, json_body(forged).await);
}

#[tokio::test]
async fn test_me_accepts_bearer_and_404s_for_deleted_user() {
    let app = app();
    let response = app.register("a@b.com", "longenough1").await;
    let token = json_body(response).await["access_token"]
        .as_str()
        .unwrap()
        .to_string();

    let me = app
        .send(
            Request::get("/users/me")
                .header(AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(me.status(), StatusCode::OK);

    assert!(app.users.remove("a@b.com").await);

    let gone = app
        .send(
            Request::get("/users/me")
                .header(AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oauth_start() {
    let app = app();

    let unknown = app
        .send(Request::get("/auth/oauth/unknown").body(Body::empty()).unwrap())
        .await;
    assert_eq!(unknown.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = app
        .send(Request::get("/auth/oauth/google").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("oauth_state="));
    assert!(cookies[0].contains("HttpOnly"));
    assert!(cookies[0].contains("Expires="));

    let state_cookie = cookie_pair(&response, "oauth_state");
    let state = state_cookie.trim_start_matches("oauth_state=").to_string();
    let body = json_body(response).await;
    assert!(body["auth_url"].as_str().unwrap().ends_with(&state));
}

async fn start_flow(app: &TestApp) -> String {
    let response = app
        .send(Request::get("/auth/oauth/google").body(Body::empty()).unwrap())
        .await;
    cookie_pair(&response, "oauth_state")
        .trim_start_matches("oauth_state=")
        .to_string()
}

fn callback(code: &str, state: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(format!(
        "/auth/oauth/google/callback?code={}&state={}",
        code, state
    ));
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, format!("oauth_state={}", cookie));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_oauth_callback_rejects_bad_state_without_network() {
    let app = app();
    let state_a = start_flow(&app).await;
    let state_b = start_flow(&app).await;

    let invalid = app.send(callback("abc", "invalid", Some("invalid"))).await;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(invalid).await["error"], "Invalid state token");

    let no_cookie = app.send(callback("abc", &state_a, None)).await;
    assert_eq!(no_cookie.status(), StatusCode::BAD_REQUEST);

    let crossed = app.send(callback("abc", &state_a, Some(&state_b))).await;
    assert_eq!(crossed.status(), StatusCode::BAD_REQUEST);

    assert_eq!(app.provider.exchanges.load(Ordering::SeqCst), 0);
    assert_eq!(app.provider.profiles.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_oauth_callback_unknown_provider_is_server_error() {
    let app = app();

    let response = app
        .send(
            Request::get("/auth/oauth/github/callback?code=x&state=invalid")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["error"], "Server configuration error");
    assert_eq!(app.provider.exchanges.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_oauth_callback_logs_in() {
    let app = app();
    let state = start_flow(&app).await;

    let response = app.send(callback("good-code", &state, Some(&state))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 2);
    assert!(cookies
        .iter()
        .any(|c| c.starts_with("oauth_state=;") && c.contains("Max-Age=0")));

    let session = cookie_pair(&response, "access_token");
    let body = json_body(response).await;
    assert_eq!(body["token_type"], "bearer");

    let me = json_body(app.me_with_cookie(&session).await).await;
    assert_eq!(me["email"], "oauth@example.com");
    assert_eq!(me["provider"], "google");

    // The state has been consumed
    let replay = app.send(callback("good-code", &state, Some(&state))).await;
    assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.provider.exchanges.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_oauth_upstream_failure_is_bad_gateway() {
    let app = app();
    let state = start_flow(&app).await;

    let response = app.send(callback("bad-code", &state, Some(&state))).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(set_cookies(&response).is_empty());
    assert_eq!(app.provider.profiles.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_oauth_user_cannot_password_login() {
    let app = app();
    let state = start_flow(&app).await;
    app.send(callback("good-code", &state, Some(&state))).await;

    let response = app.login("oauth@example.com", "anything-at-all").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_clears_session_cookie() {
    let app = app();
    let response = app
        .send(Request::post("/auth/logout").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("access_token=;"));
    assert!(cookies[0].contains("Max-Age=0"));
    assert_eq!(
        json_body(response).await["message"],
        "Successfully logged out"
    );
}
