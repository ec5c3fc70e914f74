//! JWT Issuance and Verification
//!
//! HS256 access and refresh token issuance for the in-process authorization
//! server. Access tokens carry `iss, sub, aud, scope, iat, exp`; refresh
//! tokens additionally carry `type: "refresh"` and a unique `jti`.
//! Verification checks signature, expiration and, when requested, audience.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// JWT failures, distinguishable without parsing message text.
#[derive(Debug, Error, PartialEq)]
pub enum JwtError {
    /// Token expiration has passed
    #[error("token expired")]
    Expired,

    /// Signature did not verify
    #[error("token signature invalid")]
    SignatureInvalid,

    /// Audience claim did not match
    #[error("token audience invalid")]
    AudienceInvalid,

    /// A refresh operation was attempted with a non-refresh token
    #[error("token is not a refresh token")]
    NotARefreshToken,

    /// Any other validation failure
    #[error("token validation failed: {0}")]
    Validation(String),
}

/// Claims on an issued access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessClaims {
    /// Issuer
    pub iss: String,
    /// Subject
    pub sub: String,
    /// Audience
    pub aud: String,
    /// Granted scope (space-delimited)
    pub scope: String,
    /// Issued-at (Unix seconds)
    pub iat: i64,
    /// Expiration (Unix seconds)
    pub exp: i64,
}

/// Claims on an issued refresh token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshClaims {
    /// Issuer
    pub iss: String,
    /// Subject
    pub sub: String,
    /// Always `"refresh"`
    #[serde(rename = "type")]
    pub token_type: String,
    /// Unique token id
    pub jti: String,
    /// Issued-at (Unix seconds)
    pub iat: i64,
    /// Expiration (Unix seconds)
    pub exp: i64,
}

/// Fields for an access token grant.
#[derive(Debug, Clone)]
pub struct AccessTokenRequest {
    /// Subject the token is issued for
    pub sub: String,
    /// Intended audience
    pub aud: String,
    /// Granted scope (space-delimited)
    pub scope: String,
}

/// HS256 token issuer bound to a symmetric secret and an issuer URL.
pub struct JwtIssuer {
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtIssuer {
    /// Create an issuer from a symmetric secret.
    pub fn new(issuer: impl Into<String>, secret: &[u8]) -> Self {
        Self {
            issuer: issuer.into(),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// The configured issuer URL.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Issue a signed access token with the given lifetime.
    pub fn issue_access_token(
        &self,
        request: &AccessTokenRequest,
        ttl: Duration,
    ) -> Result<String, JwtError> {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            iss: self.issuer.clone(),
            sub: request.sub.clone(),
            aud: request.aud.clone(),
            scope: request.scope.clone(),
            iat: now,
            exp: now + ttl.as_secs() as i64,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Validation(e.to_string()))
    }

    /// Issue a signed refresh token with a unique `jti`.
    pub fn issue_refresh_token(
        &self,
        subject: &str,
        ttl: Duration,
    ) -> Result<String, JwtError> {
        let now = Utc::now().timestamp();
        let claims = RefreshClaims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            token_type: "refresh".to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl.as_secs() as i64,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Validation(e.to_string()))
    }

    /// Verify an access token's signature and expiration, plus the audience
    /// when one is expected.
    pub fn verify_access_token(
        &self,
        token: &str,
        expected_audience: Option<&str>,
    ) -> Result<AccessClaims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        match expected_audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(map_jwt_error)
    }

    /// Verify a refresh token: signature, expiration and `type == refresh`.
    pub fn verify_refresh_token(&self, token: &str) -> Result<RefreshClaims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_aud = false;

        let claims = decode::<RefreshClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(map_jwt_error)?;

        if claims.token_type != "refresh" {
            return Err(JwtError::NotARefreshToken);
        }
        Ok(claims)
    }
}

impl std::fmt::Debug for JwtIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Keys stay out of debug output.
        f.debug_struct("JwtIssuer")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

fn map_jwt_error(error: jsonwebtoken::errors::Error) -> JwtError {
    use jsonwebtoken::errors::ErrorKind;
    match error.kind() {
        ErrorKind::ExpiredSignature => JwtError::Expired,
        ErrorKind::InvalidSignature => JwtError::SignatureInvalid,
        ErrorKind::InvalidAudience => JwtError::AudienceInvalid,
        _ => JwtError::Validation(error.to_string()),
    }
}
