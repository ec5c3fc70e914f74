//! Authentication and Authorization
//!
//! The OAuth 2.1 subsystem: PKCE primitives, the in-memory authorization
//! server, the outbound OAuth client with its token manager, scope policy,
//! discovery metadata, the client-credentials (M2M) client and the bearer
//! middleware. Used both as the server's resource-protection front door and
//! as an outbound client.

pub mod client;
pub mod discovery;
pub mod m2m;
pub mod middleware;
pub mod pkce;
pub mod scope;
pub mod server;

pub use client::{OAuthClient, OAuthClientConfig, OAuthClientError, TokenManager};
pub use discovery::{
    build_oauth_server_metadata, build_protected_resource_metadata,
    build_www_authenticate_header, create_401_response,
};
pub use m2m::{M2MAuthError, M2MClient, M2MConfig};
pub use middleware::{authorize_message, bearer_auth, AuthContext, AuthMiddlewareConfig, BearerAuth};
pub use scope::{InsufficientScopeError, ScopeManager, ScopeManagerConfig};
pub use server::{AuthorizationServer, JwtIssuer, OAuthStore};
