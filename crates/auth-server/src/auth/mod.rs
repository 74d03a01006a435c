//! Authentication module: password login, OAuth2 login and signed sessions.
//!
//! This module provides:
//! - JWT session and OAuth state tokens (`jwt`)
//! - Cookie transport with environment-aware attributes (`cookie`)
//! - Argon2 password hashing and credential checks (`password`)
//! - The provider-agnostic OAuth2 authorization-code flow (`oauth`)
//! - `require_auth` middleware and the `Identity` extractor

pub mod cookie;
mod handlers;
pub mod jwt;
mod middleware;
pub mod oauth;
pub mod password;
pub mod types;

pub use handlers::{login, logout, me, oauth_callback, oauth_start, register};
pub use middleware::{authenticate_headers, extract_token, require_auth, GuardRejection};
pub use types::{AuthConfig, Identity};
