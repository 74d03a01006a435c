//! Cookie transport for session and state tokens.
//!
//! Every cookie is `HttpOnly`, `SameSite=Lax` and `Path=/`. `Domain` and
//! `Secure` are only emitted for a real (non-local) cookie domain, so local
//! development over plain HTTP keeps working.

use std::net::IpAddr;

use axum::http::{
    header::{self, InvalidHeaderValue},
    HeaderMap, HeaderValue,
};
use chrono::Duration;
use cookie::{Cookie, SameSite};
use time::OffsetDateTime;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookiePolicy {
    domain: Option<String>,
    secure: bool,
}

impl CookiePolicy {
    pub fn new(domain: &str, secure: bool) -> Self {
        let domain = domain.trim();
        if is_local_domain(domain) {
            return Self {
                domain: None,
                secure: false,
            };
        }

        Self {
            domain: Some(domain.to_string()),
            secure,
        }
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    /// Build a cookie under this policy. `Expires` is only set when a TTL is
    /// given; otherwise the browser drops the cookie at the end of the session.
    pub fn build(&self, name: &str, value: &str, ttl: Option<Duration>) -> Cookie<'static> {
        let mut builder = Cookie::build((name.to_string(), value.to_string()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure);

        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }

        if let Some(ttl) = ttl {
            let expires = OffsetDateTime::now_utc() + time::Duration::seconds(ttl.num_seconds());
            builder = builder.expires(expires);
        }

        builder.build()
    }

    /// Append a `Set-Cookie` header carrying `value`.
    pub fn attach(
        &self,
        headers: &mut HeaderMap,
        name: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), InvalidHeaderValue> {
        let cookie = self.build(name, value, ttl);
        headers.append(
            header::SET_COOKIE,
            HeaderValue::from_str(&cookie.to_string())?,
        );
        Ok(())
    }

    /// Append a `Set-Cookie` header that removes the cookie `name`.
    pub fn clear(&self, headers: &mut HeaderMap, name: &str) -> Result<(), InvalidHeaderValue> {
        let mut cookie = self.build(name, "", None);
        cookie.make_removal();
        headers.append(
            header::SET_COOKIE,
            HeaderValue::from_str(&cookie.to_string())?,
        );
        Ok(())
    }
}

/// Empty, `localhost` and loopback addresses never get `Domain` or `Secure`.
pub fn is_local_domain(domain: &str) -> bool {
    let domain = domain.trim();
    if domain.is_empty() || domain.eq_ignore_ascii_case("localhost") {
        return true;
    }

    let host = domain
        .strip_prefix('[')
        .and_then(|d| d.strip_suffix(']'))
        .unwrap_or(domain);
    host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

/// Read cookie `name` from the request's `Cookie` headers.
pub fn read(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie_header in headers.get_all(header::COOKIE) {
        let Ok(cookie_header) = cookie_header.to_str() else {
            continue;
        };

        for cookie_str in cookie_header.split(';') {
            if let Ok(cookie) = Cookie::parse(cookie_str.trim()) {
                if cookie.name() == name {
                    return Some(cookie.value().to_string());
                }
            }
        }
    }

    None
}
