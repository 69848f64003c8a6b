//! Verification of CRM-issued access tokens.
//!
//! The CRM backend signs HS256 JWTs with a secret shared with this service.
//! Clients present them as `Authorization: Bearer <token>`, or as a `token`
//! query parameter when they connect through `EventSource`, which cannot
//! set headers. This service only verifies tokens; it never issues them.

use axum::extract::Query;
use axum::http::{header::AUTHORIZATION, HeaderMap, Uri};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

/// User id reported for requests served in no-auth mode
pub const ANONYMOUS_USER_ID: &str = "anonymous";

/// The claims this service reads from a CRM token
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    /// CRM user id
    pub sub: String,
    /// Only needed when an email domain restriction is configured
    #[serde(default)]
    pub email: Option<String>,
}

impl Claims {
    /// Claims used when no `auth` section is configured
    pub fn anonymous() -> Self {
        Self {
            sub: ANONYMOUS_USER_ID.to_string(),
            email: None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.sub == ANONYMOUS_USER_ID
    }

    /// Whether the token's email belongs to `domain`; no email never matches
    pub fn email_in_domain(&self, domain: &str) -> bool {
        self.email
            .as_deref()
            .and_then(|email| email.rsplit_once('@'))
            .is_some_and(|(_, host)| host.eq_ignore_ascii_case(domain))
    }
}

/// Where a request carried its token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Header,
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("missing authentication token")]
    Missing,
    #[error("Authorization header must use the Bearer scheme")]
    BadScheme,
    #[error("token has expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Find the raw token on a request. The header wins over the query string.
pub fn locate_token(headers: &HeaderMap, uri: &Uri) -> Result<(String, TokenSource), TokenError> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        let token = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(TokenError::BadScheme)?;
        return Ok((token.to_string(), TokenSource::Header));
    }

    Query::<TokenQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty())
        .map(|t| (t, TokenSource::Query))
        .ok_or(TokenError::Missing)
}

/// Checks signature and expiry of CRM tokens against the shared secret
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier").finish_non_exhaustive()
    }
}
