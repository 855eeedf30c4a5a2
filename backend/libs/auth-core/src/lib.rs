//! Transport-neutral authentication and authorization core
//!
//! Shared by the gRPC and HTTP adapters of every internal service.
//!
//! ## Core Components
//!
//! - **AuthConfig**: issuer, audiences and the authorization kill switch
//! - **JwksTokenValidator**: RS256 bearer token validation against the
//!   identity provider's published key set
//! - **CallContext**: per-call claims and the memoized policy actor
//! - **AutoRefreshToken**: outbound service credential kept fresh by a
//!   background task
//! - **PolicyClient**: decision service client (`POST /v1/query`)
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use auth_core::{
//!     AutoRefreshConfig, AutoRefreshToken, ClientCredentialsConfig, ClientCredentialsSource,
//! };
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = ClientCredentialsSource::new(ClientCredentialsConfig::from_env()?);
//! let refresh = AutoRefreshConfig::from_env()?;
//!
//! let token = AutoRefreshToken::new(Arc::new(source), refresh.refresh_interval())?;
//! let (_shutdown_tx, shutdown_rx) = watch::channel(());
//! token.start(shutdown_rx).await?;
//!
//! // token.authorization_value() == "Bearer eyJhbGc..."
//! # Ok(())
//! # }
//! ```

pub mod claims;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod jwt;
pub mod policy;
pub mod refresh;

pub use claims::{Actor, CustomClaims};
pub use config::{AuthConfig, AutoRefreshConfig, ClientCredentialsConfig, PolicyServiceConfig};
pub use context::CallContext;
pub use credentials::{
    AccessToken, AuthorizationValuer, ClientCredentialsSource, CredentialSource, StaticCredential,
};
pub use error::{AuthError, CredentialError, PolicyError, Result};
pub use jwt::{JwksTokenValidator, TokenValidator, JWKS_REFRESH_PERIOD};
pub use policy::{PolicyChecker, PolicyClient, PolicyRule, QueryResult, QueryResults};
pub use refresh::AutoRefreshToken;

/// Prefix of the `authorization` header value carrying a bearer token
pub const BEARER_PREFIX: &str = "Bearer ";

/// Extract the token from an `authorization` header value.
///
/// ## Errors
///
/// `MalformedAuthorizationHeader` when the value is not `Bearer <token>`.
pub fn bearer_token(header_value: &str) -> Result<&str> {
    match header_value.strip_prefix(BEARER_PREFIX) {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(AuthError::MalformedAuthorizationHeader),
    }
}
