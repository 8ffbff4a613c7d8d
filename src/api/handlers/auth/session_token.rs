//! Signed session tokens (HS256 JWT) and the cookie that carries them.
//!
//! Sessions are stateless: the token is verified with the server secret and
//! never stored. Logout clears the cookie; a copied token stays valid until it
//! expires.

use anyhow::{Context, Result, anyhow};
use axum::http::{HeaderValue, header::InvalidHeaderValue};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
    errors::ErrorKind,
};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SESSION_COOKIE_NAME: &str = "__Host-session";
pub const MIN_SECRET_LEN: usize = 32;
pub const MAX_SESSION_LIFETIME_DAYS: i64 = 30;
const JTI_BYTES: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Identity id.
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl SessionClaims {
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[derive(Debug)]
pub struct IssuedSession {
    pub token: SecretString,
    pub claims: SessionClaims,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("malformed session token")]
    Malformed,
    #[error("unsupported session token header")]
    UnsupportedHeader,
    #[error("invalid session token signature")]
    BadSignature,
    #[error("session token expired")]
    Expired,
}

impl From<jsonwebtoken::errors::Error> for SessionError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => Self::BadSignature,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                Self::UnsupportedHeader
            }
            ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Malformed,
        }
    }
}

pub struct SessionIssuer {
    secret: SecretString,
    lifetime: Duration,
    validation: Validation,
}

impl SessionIssuer {
    /// # Errors
    /// Returns an error if the secret is shorter than 32 bytes or the lifetime
    /// is not between one second and 30 days.
    pub fn new(secret: SecretString, lifetime: Duration) -> Result<Self> {
        if secret.expose_secret().len() < MIN_SECRET_LEN {
            return Err(anyhow!(
                "session secret must be at least {MIN_SECRET_LEN} bytes"
            ));
        }
        if lifetime <= Duration::zero() {
            return Err(anyhow!("session lifetime must be positive"));
        }
        if lifetime > Duration::days(MAX_SESSION_LIFETIME_DAYS) {
            return Err(anyhow!(
                "session lifetime must be at most {MAX_SESSION_LIFETIME_DAYS} days"
            ));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;
        // Expiry is checked against the caller's clock in `verify`.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        Ok(Self {
            secret,
            lifetime,
            validation,
        })
    }

    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    fn key_bytes(&self) -> &[u8] {
        self.secret.expose_secret().as_bytes()
    }

    /// Sign a session for `identity_id`, valid from `now` for the lifetime.
    ///
    /// # Errors
    /// Returns an error if randomness, the expiry timestamp, or signing fails.
    pub fn issue(&self, identity_id: Uuid, now: DateTime<Utc>) -> Result<IssuedSession> {
        let mut jti = [0u8; JTI_BYTES];
        OsRng
            .try_fill_bytes(&mut jti)
            .context("failed to generate session id")?;
        let expires_at = now
            .checked_add_signed(self.lifetime)
            .context("session expiry out of range")?;
        let claims = SessionClaims {
            sub: identity_id,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: URL_SAFE_NO_PAD.encode(jti),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.key_bytes()),
        )
        .context("failed to sign session token")?;

        Ok(IssuedSession {
            token: SecretString::from(token),
            claims,
        })
    }

    /// Check header, signature, and expiry; `exp` is exclusive.
    ///
    /// # Errors
    /// Returns the first check that failed.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, SessionError> {
        // An unknown `alg` (including "none") fails header parsing.
        let header = decode_header(token).map_err(|err| match err.kind() {
            ErrorKind::Json(_) => SessionError::UnsupportedHeader,
            _ => SessionError::Malformed,
        })?;
        if header.alg != Algorithm::HS256 {
            return Err(SessionError::UnsupportedHeader);
        }

        let claims = decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.key_bytes()),
            &self.validation,
        )?
        .claims;

        if claims.exp <= claims.iat {
            return Err(SessionError::Malformed);
        }
        if now.timestamp() >= claims.exp {
            return Err(SessionError::Expired);
        }
        Ok(claims)
    }

    /// `__Host-` cookies must be `Secure`, use `Path=/`, and carry no `Domain`.
    ///
    /// # Errors
    /// Returns an error if the token is not a valid header value.
    pub fn cookie(&self, session: &IssuedSession) -> Result<HeaderValue, InvalidHeaderValue> {
        let max_age = self.lifetime.num_seconds();
        let token = session.token.expose_secret();
        HeaderValue::from_str(&format!(
            "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age={max_age}"
        ))
    }
}

/// Expire the session cookie in the browser.
#[must_use]
pub fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("__Host-session=; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age=0")
}
