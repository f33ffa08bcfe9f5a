//! Bearer credential resolution.
//!
//! Turns the inbound `Authorization` header (or the configured static key)
//! into the single token sent upstream as `Authorization: Bearer <token>`.

use axum::http::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};

use crate::config::ApiKey;
use crate::error::Error;

const BEARER_PREFIX: &str = "Bearer ";
const SK_PREFIX: &str = "sk-";

/// Where the resolved credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Taken from the inbound Authorization header.
    Header,
    /// Fell back to the configured static key.
    Static,
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::Header => write!(f, "header"),
            CredentialSource::Static => write!(f, "static"),
        }
    }
}

/// A normalized bearer token, valid for one request.
#[derive(Clone)]
pub struct ResolvedCredential {
    token: SecretString,
    source: CredentialSource,
}

impl ResolvedCredential {
    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn expose_secret(&self) -> &str {
        self.token.expose_secret()
    }

    /// Build the upstream `Authorization` header value, flagged sensitive.
    pub fn header_value(&self) -> Result<HeaderValue, Error> {
        let mut value =
            HeaderValue::from_str(&format!("Bearer {}", self.token.expose_secret()))
                .map_err(|_| Error::BadRequest("credential contains invalid characters".into()))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl std::fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCredential")
            .field("token", &"[REDACTED]")
            .field("source", &self.source)
            .finish()
    }
}

/// Normalize a raw Authorization header value into a bare token.
///
/// Strips a case-sensitive `Bearer ` prefix, then an `sk-` prefix. The `sk-`
/// strip applies whether or not `Bearer ` was present.
pub fn normalize_token(raw: &str) -> &str {
    let token = raw.strip_prefix(BEARER_PREFIX).unwrap_or(raw);
    token.strip_prefix(SK_PREFIX).unwrap_or(token)
}

/// Resolve the credential for one request.
///
/// A header that is absent, not visible ASCII, or empty after normalization
/// falls back to `static_key`, which is used verbatim.
pub fn resolve(
    authorization: Option<&HeaderValue>,
    static_key: Option<&ApiKey>,
) -> Result<ResolvedCredential, Error> {
    let from_header = authorization
        .and_then(|v| v.to_str().ok())
        .map(normalize_token)
        .filter(|t| !t.is_empty());

    if let Some(token) = from_header {
        return Ok(ResolvedCredential {
            token: SecretString::from(token.to_string()),
            source: CredentialSource::Header,
        });
    }

    match static_key {
        Some(key) if !key.expose_secret().is_empty() => Ok(ResolvedCredential {
            token: SecretString::from(key.expose_secret().to_string()),
            source: CredentialSource::Static,
        }),
        _ => Err(Error::NoCredential),
    }
}

/// Resolve the credential from a full inbound header map.
pub fn resolve_from_headers(
    headers: &HeaderMap,
    static_key: Option<&ApiKey>,
) -> Result<ResolvedCredential, Error> {
    resolve(headers.get(axum::http::header::AUTHORIZATION), static_key)
}
