//! Standalone JWT Verification with JWKS
//!
//! Verifies externally issued RS256 tokens against a JWKS endpoint. Fetched
//! key sets are cached process-wide per URI; a key id that is not in the
//! cached set triggers one refetch (key rotation), after which an unknown
//! id is an error.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// JWT verification failures, by category.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Token expiration has passed
    #[error("token expired")]
    Expired,

    /// Signature did not verify
    #[error("token signature invalid")]
    SignatureInvalid,

    /// Issuer claim did not match
    #[error("token issuer invalid")]
    IssuerInvalid,

    /// Audience claim did not match
    #[error("token audience invalid")]
    AudienceInvalid,

    /// JWKS retrieval or decoding failed
    #[error("jwks error: {0}")]
    Jwks(String),

    /// Any other validation failure
    #[error("token validation failed: {0}")]
    Validation(String),
}

/// Options for [`verify_jwt`].
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// JWKS document URL
    pub jwks_uri: String,
    /// Expected issuer, when enforced
    pub issuer: Option<String>,
    /// Expected audience, when enforced
    pub audience: Option<String>,
}

/// Claims surfaced from a verified token.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedClaims {
    pub sub: String,
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience; string or array on the wire
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

/// Decoded keys for one JWKS URI.
struct CachedKeys {
    by_kid: HashMap<String, DecodingKey>,
}

/// Process-wide JWKS cache keyed by URI. Entries are idempotent; the cache
/// only grows and is refreshed in place on unknown key ids.
fn jwks_cache() -> &'static DashMap<String, Arc<CachedKeys>> {
    static CACHE: OnceLock<DashMap<String, Arc<CachedKeys>>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

/// Verify a token against the JWKS the options point at.
pub async fn verify_jwt(token: &str, options: &VerifyOptions) -> Result<VerifiedClaims, VerifyError> {
    let header = decode_header(token).map_err(|e| VerifyError::Validation(e.to_string()))?;
    let kid = header
        .kid
        .ok_or_else(|| VerifyError::Validation("token header carries no kid".to_string()))?;

    let key = resolve_key(&options.jwks_uri, &kid).await?;

    let mut validation = Validation::new(Algorithm::RS256);
    match &options.audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }
    if let Some(issuer) = &options.issuer {
        validation.set_issuer(&[issuer]);
    }

    decode::<VerifiedClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => VerifyError::Expired,
                ErrorKind::InvalidSignature => VerifyError::SignatureInvalid,
                ErrorKind::InvalidIssuer => VerifyError::IssuerInvalid,
                ErrorKind::InvalidAudience => VerifyError::AudienceInvalid,
                _ => VerifyError::Validation(e.to_string()),
            }
        })
}

/// Resolve a decoding key by kid: cache hit, else (re)fetch the JWKS once.
async fn resolve_key(jwks_uri: &str, kid: &str) -> Result<DecodingKey, VerifyError> {
    if let Some(cached) = jwks_cache().get(jwks_uri) {
        if let Some(key) = cached.by_kid.get(kid) {
            return Ok(key.clone());
        }
    }

    let fetched = fetch_jwks(jwks_uri).await?;
    let key = fetched.by_kid.get(kid).cloned();
    jwks_cache().insert(jwks_uri.to_string(), Arc::new(fetched));

    key.ok_or_else(|| VerifyError::Jwks(format!("no key with kid {kid} in jwks")))
}

async fn fetch_jwks(jwks_uri: &str) -> Result<CachedKeys, VerifyError> {
    debug!(jwks_uri, "fetching jwks");
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| VerifyError::Jwks(e.to_string()))?;

    let response = client
        .get(jwks_uri)
        .send()
        .await
        .map_err(|e| VerifyError::Jwks(e.to_string()))?;
    if !response.status().is_success() {
        return Err(VerifyError::Jwks(format!(
            "jwks endpoint returned status {}",
            response.status()
        )));
    }

    let document: JwksDocument = response
        .json()
        .await
        .map_err(|e| VerifyError::Jwks(e.to_string()))?;

    let mut by_kid = HashMap::new();
    for jwk in document.keys {
        let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
            continue;
        };
        if jwk.kty != "RSA" {
            continue;
        }
        match DecodingKey::from_rsa_components(&n, &e) {
            Ok(key) => {
                by_kid.insert(kid, key);
            }
            Err(error) => {
                return Err(VerifyError::Jwks(format!("malformed jwk {kid}: {error}")));
            }
        }
    }
    Ok(CachedKeys { by_kid })
}
