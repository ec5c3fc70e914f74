//! OAuth Client Side
//!
//! The outbound OAuth client (authorization URL, callback handling, code
//! exchange, refresh), the per-resource token cache with deduplicated
//! refresh, and standalone JWKS-backed JWT verification.

pub mod oauth;
pub mod tokens;
pub mod verify;

pub use oauth::{
    AuthorizationSession, AuthorizationUrlOptions, CallbackParams, ExchangeCodeRequest,
    IntrospectionResponse, OAuthClient, OAuthClientConfig, OAuthClientError, RefreshOptions,
    TokenResponse,
};
pub use tokens::{StoredToken, TokenError, TokenManager, TokenManagerConfig};
pub use verify::{verify_jwt, VerifiedClaims, VerifyError, VerifyOptions};
