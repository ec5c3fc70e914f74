//! OAuth Authorization Server
//!
//! The in-memory authorization server: the single-use code / refresh-token
//! store, HS256 JWT issuance and the `/authorize` + `/token` endpoints.

pub mod endpoints;
pub mod jwt;
pub mod store;

pub use endpoints::{
    AuthorizationServer, AuthorizationServerConfig, OAuthErrorBody, RegisteredClient,
    TokenEndpointResponse,
};
pub use jwt::{AccessClaims, AccessTokenRequest, JwtError, JwtIssuer, RefreshClaims};
pub use store::{
    AuthorizationCode, OAuthStore, OAuthStoreConfig, OAuthStoreStats, RefreshTokenEntry,
};
