//! Outbound credentials
//!
//! A `CredentialSource` knows how to obtain an `AccessToken`; an
//! `AuthorizationValuer` knows how to render the current token as the value
//! of the `authorization` header. `AutoRefreshToken` ties the two together.

use crate::config::ClientCredentialsConfig;
use crate::error::CredentialError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

const TOKEN_PATH: &str = "oauth/token";
const CLIENT_CREDENTIALS_GRANT: &str = "client_credentials";
const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Token issued by the identity provider (or a static secret)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub scope: String,
    /// Lifetime in seconds as reported by the issuer
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

impl Default for AccessToken {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            scope: String::new(),
            expires_in: 0,
            token_type: default_token_type(),
        }
    }
}

impl AccessToken {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    /// `"<token_type> <access_token>"`
    pub fn authorization_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Anything that can produce an `authorization` header value
pub trait AuthorizationValuer: Send + Sync {
    fn authorization_value(&self) -> String;
}

impl AuthorizationValuer for AccessToken {
    fn authorization_value(&self) -> String {
        AccessToken::authorization_value(self)
    }
}

#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Check the source is usable before any fetch is attempted
    fn validate(&self) -> Result<(), CredentialError>;

    async fn fetch_token(&self) -> Result<AccessToken, CredentialError>;
}

/// Fixed shared secret, e.g. for services that sit behind a gateway
#[derive(Debug, Clone)]
pub struct StaticCredential {
    token: AccessToken,
}

impl StaticCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            token: AccessToken::bearer(secret),
        }
    }
}

#[async_trait]
impl CredentialSource for StaticCredential {
    fn validate(&self) -> Result<(), CredentialError> {
        if self.token.access_token.is_empty() {
            return Err(CredentialError::InvalidConfig(
                "static credential is empty".to_string(),
            ));
        }
        Ok(())
    }

    async fn fetch_token(&self) -> Result<AccessToken, CredentialError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    audience: &'a str,
    grant_type: &'a str,
}

/// OAuth2 client-credentials grant against `<issuer>/oauth/token`
#[derive(Debug, Clone)]
pub struct ClientCredentialsSource {
    config: ClientCredentialsConfig,
    http: reqwest::Client,
}

impl ClientCredentialsSource {
    pub fn new(config: ClientCredentialsConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: ClientCredentialsConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}",
            self.config.issuer_url.trim_end_matches('/'),
            TOKEN_PATH
        )
    }
}

#[async_trait]
impl CredentialSource for ClientCredentialsSource {
    fn validate(&self) -> Result<(), CredentialError> {
        self.config.validate()
    }

    async fn fetch_token(&self) -> Result<AccessToken, CredentialError> {
        let url = self.token_url();
        let body = TokenRequest {
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
            audience: &self.config.audience,
            grant_type: CLIENT_CREDENTIALS_GRANT,
        };

        let response = self.http.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(url = %url, status = status.as_u16(), "Token request rejected");
            return Err(CredentialError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let token = response
            .json::<AccessToken>()
            .await
            .map_err(|e| CredentialError::Decode(e.to_string()))?;

        debug!(
            audience = %self.config.audience,
            expires_in = token.expires_in,
            "Fetched client credentials token"
        );
        Ok(token)
    }
}
