//! JWT token creation and validation.
//!
//! One codec signs both session tokens and OAuth state tokens with the same
//! secret and algorithm; the two differ only by claim kind and TTL.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{Claims, SessionClaims, StateClaims};

/// Lifetime of an OAuth state token (and of the cookie that carries it).
pub const STATE_TOKEN_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("failed to sign token")]
    Signing,
}

#[derive(Debug, Error)]
pub enum AlgorithmError {
    #[error("unknown JWT algorithm: {0}")]
    Unknown(String),
    #[error("JWT algorithm {0:?} is not a shared-secret (HMAC) algorithm")]
    NotHmac(Algorithm),
}

/// Parse a configured algorithm name. Only the HMAC family is accepted since
/// the codec signs with a shared secret.
pub fn parse_algorithm(name: &str) -> Result<Algorithm, AlgorithmError> {
    let algorithm =
        Algorithm::from_str(name.trim()).map_err(|_| AlgorithmError::Unknown(name.to_string()))?;
    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
        other => Err(AlgorithmError::NotHmac(other)),
    }
}

/// Signed payload: the typed claims plus issue and expiry timestamps.
///
/// `exp` is a fractional NumericDate with microsecond precision.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(flatten)]
    claims: Claims,
    iat: i64,
    exp: f64,
}

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Expiry instant in microseconds, rounded up so any positive TTL outlives
/// the instant it was issued at. `None` when the instant is out of range.
fn expiry_micros(now: DateTime<Utc>, ttl: Duration) -> Option<i64> {
    let nanos = now.checked_add_signed(ttl)?.timestamp_nanos_opt()?;
    Some(nanos.div_euclid(1_000) + i64::from(nanos.rem_euclid(1_000) != 0))
}

#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    session_ttl: Duration,
    state_ttl: Duration,
}

impl TokenCodec {
    pub fn new(secret: &[u8], algorithm: Algorithm, session_ttl: Duration) -> Self {
        let mut validation = Validation::new(algorithm);
        // Expiry is checked in `verify_at` with a strict comparison.
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            algorithm,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            session_ttl,
            state_ttl: Duration::minutes(STATE_TOKEN_MINUTES),
        }
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn state_ttl(&self) -> Duration {
        self.state_ttl
    }

    /// Sign `claims` with an absolute expiry of now + `ttl`.
    pub fn issue(&self, claims: Claims, ttl: Duration) -> Result<String, TokenError> {
        self.issue_at(claims, ttl, Utc::now())
    }

    pub fn issue_at(
        &self,
        claims: Claims,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let exp = expiry_micros(now, ttl).ok_or_else(|| {
            tracing::error!("Token expiry out of range for TTL {}", ttl);
            TokenError::Signing
        })?;
        let envelope = Envelope {
            claims,
            iat: now.timestamp(),
            exp: exp as f64 / MICROS_PER_SECOND,
        };

        encode(&Header::new(self.algorithm), &envelope, &self.encoding).map_err(|e| {
            tracing::error!("Failed to sign token: {}", e);
            TokenError::Signing
        })
    }

    /// Check signature, then expiry. A token whose `exp` equals now is expired.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let data = decode::<Envelope>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            }
        })?;

        let exp = (data.claims.exp * MICROS_PER_SECOND).round() as i64;
        if exp <= now.timestamp_micros() {
            return Err(TokenError::Expired);
        }

        Ok(data.claims.claims)
    }

    /// Mint a session token for `subject` with the configured session TTL.
    pub fn issue_session(&self, subject: &str) -> Result<String, TokenError> {
        self.issue(
            Claims::Session(SessionClaims {
                sub: subject.to_string(),
            }),
            self.session_ttl,
        )
    }

    pub fn verify_session(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.verify_session_at(token, Utc::now())
    }

    pub fn verify_session_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionClaims, TokenError> {
        match self.verify_at(token, now)? {
            Claims::Session(claims) => Ok(claims),
            Claims::State(_) => Err(TokenError::Malformed),
        }
    }

    /// Mint a fresh state token carrying a random nonce.
    pub fn issue_state(&self) -> Result<(String, StateClaims), TokenError> {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let claims = StateClaims {
            nonce: hex::encode(nonce),
        };

        let token = self.issue(Claims::State(claims.clone()), self.state_ttl)?;
        Ok((token, claims))
    }

    pub fn verify_state(&self, token: &str) -> Result<StateClaims, TokenError> {
        match self.verify(token)? {
            Claims::State(claims) => Ok(claims),
            Claims::Session(_) => Err(TokenError::Malformed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_codec() -> TokenCodec {
        TokenCodec::new(
            b"test-secret-key-for-testing-only",
            Algorithm::HS256,
            Duration::minutes(30),
        )
    }

    fn session(sub: &str) -> Claims {
        Claims::Session(SessionClaims {
            sub: sub.to_string(),
        })
    }

    /// Replace the first character of the signature segment with a different
    /// base64url character so the token still decodes.
    fn flip_signature(token: &str) -> String {
        let (head, sig) = token.rsplit_once('.').expect("three segments");
        let mut chars: Vec<char> = sig.chars().collect();
        chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
        format!("{}.{}", head, chars.into_iter().collect::<String>())
    }

    #[test]
    fn test_issue_and_verify_round_trip() {
        let codec = test_codec();
        let token = codec
            .issue(session("a@b.com"), Duration::minutes(5))
            .expect("should sign");

        let claims = codec.verify(&token).expect("should verify");
        assert_eq!(claims, session("a@b.com"));
    }

    #[test]
    fn test_flipped_signature_rejected() {
        let codec = test_codec();
        let token = codec
            .issue(session("a@b.com"), Duration::minutes(5))
            .unwrap();

        assert_eq!(
            codec.verify(&flip_signature(&token)),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let codec = test_codec();
        let token = codec.issue_session("a@b.com").unwrap();

        let other = TokenCodec::new(b"wrong-secret", Algorithm::HS256, Duration::minutes(30));
        assert_eq!(other.verify(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_wrong_algorithm_rejected() {
        let token = test_codec().issue_session("a@b.com").unwrap();

        let other = TokenCodec::new(
            b"test-secret-key-for-testing-only",
            Algorithm::HS512,
            Duration::minutes(30),
        );
        assert_eq!(other.verify(&token), Err(TokenError::Malformed));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let codec = test_codec();
        assert_eq!(codec.verify("invalid-token"), Err(TokenError::Malformed));
        assert_eq!(codec.verify(""), Err(TokenError::Malformed));
    }

    #[test]
    fn test_expiry_boundary_is_strict() {
        let codec = test_codec();
        let issued = Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap();
        let ttl = Duration::seconds(60);
        let token = codec.issue_at(session("a@b.com"), ttl, issued).unwrap();

        assert!(codec
            .verify_at(&token, issued + Duration::seconds(59))
            .is_ok());
        assert_eq!(
            codec.verify_at(&token, issued + ttl),
            Err(TokenError::Expired)
        );
        assert_eq!(
            codec.verify_at(&token, issued + ttl + Duration::seconds(1)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_expiry_keeps_sub_second_precision() {
        let codec = test_codec();

        let issued = Utc.timestamp_opt(1000, 200_000_000).unwrap();
        let token = codec
            .issue_at(session("a@b.com"), Duration::milliseconds(500), issued)
            .unwrap();
        assert!(codec.verify_at(&token, issued).is_ok());
        assert!(codec
            .verify_at(&token, Utc.timestamp_opt(1000, 300_000_000).unwrap())
            .is_ok());
        assert_eq!(
            codec.verify_at(&token, Utc.timestamp_opt(1000, 700_000_000).unwrap()),
            Err(TokenError::Expired)
        );

        let issued = Utc.timestamp_opt(1000, 900_000_000).unwrap();
        let token = codec
            .issue_at(session("a@b.com"), Duration::seconds(60), issued)
            .unwrap();
        assert!(codec
            .verify_at(&token, Utc.timestamp_opt(1060, 500_000_000).unwrap())
            .is_ok());
        assert!(codec
            .verify_at(&token, Utc.timestamp_opt(1060, 899_999_000).unwrap())
            .is_ok());
        assert_eq!(
            codec.verify_at(&token, Utc.timestamp_opt(1060, 900_000_000).unwrap()),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_tiny_ttl_is_valid_when_issued() {
        let codec = test_codec();
        let issued = Utc.timestamp_opt(1000, 123_456_789).unwrap();
        let token = codec
            .issue_at(session("a@b.com"), Duration::nanoseconds(1), issued)
            .unwrap();

        assert!(codec.verify_at(&token, issued).is_ok());
        assert_eq!(
            codec.verify_at(&token, issued + Duration::microseconds(1)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_out_of_range_ttl_fails_to_sign() {
        let codec = TokenCodec::new(
            b"test-secret-key-for-testing-only",
            Algorithm::HS256,
            Duration::minutes(1_000_000_000_000),
        );
        assert_eq!(codec.issue_session("a@b.com"), Err(TokenError::Signing));
    }

    #[test]
    fn test_signature_checked_before_expiry() {
        let codec = test_codec();
        let issued = Utc::now() - Duration::hours(2);
        let token = codec
            .issue_at(session("a@b.com"), Duration::minutes(1), issued)
            .unwrap();

        assert_eq!(codec.verify(&token), Err(TokenError::Expired));
        assert_eq!(
            codec.verify(&flip_signature(&token)),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_state_token_is_not_a_session() {
        let codec = test_codec();
        let (state, claims) = codec.issue_state().unwrap();

        assert_eq!(claims.nonce.len(), 32);
        assert_eq!(codec.verify_state(&state).unwrap(), claims);
        assert_eq!(codec.verify_session(&state), Err(TokenError::Malformed));

        let session_token = codec.issue_session("a@b.com").unwrap();
        assert_eq!(
            codec.verify_state(&session_token),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_state_nonces_are_unique() {
        let codec = test_codec();
        let (a, _) = codec.issue_state().unwrap();
        let (b, _) = codec.issue_state().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!(parse_algorithm("HS256").unwrap(), Algorithm::HS256);
        assert_eq!(parse_algorithm("HS512").unwrap(), Algorithm::HS512);
        assert!(matches!(
            parse_algorithm("RS256"),
            Err(AlgorithmError::NotHmac(Algorithm::RS256))
        ));
        assert!(matches!(
            parse_algorithm("none"),
            Err(AlgorithmError::Unknown(_))
        ));
    }
}
