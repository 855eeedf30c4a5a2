/// Auth configuration
///
/// Everything here is owned by the calling service and loaded from the
/// environment at startup. Variables are grouped by prefix:
///
/// - `AUTH_*`: inbound token validation (issuer, audience, kill switch)
/// - `M2M_*`: client-credentials identity for service-to-service calls
/// - `POLICY_SERVICE_*`: decision service location
use crate::error::{AuthError, CredentialError};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_CLOCK_SKEW_SECS: u64 = 60;
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 3600;

fn default_clock_skew_secs() -> u64 {
    DEFAULT_CLOCK_SKEW_SECS
}

fn default_refresh_interval_secs() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

/// Inbound authentication settings shared by the gRPC and HTTP adapters.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Identity provider issuer URL, e.g. `https://auth.example.com/`
    #[serde(default)]
    pub issuer_url: String,

    /// Accepted audiences, comma separated
    #[serde(default)]
    pub audience: String,

    /// Skip every check (local development only)
    #[serde(default)]
    pub authorization_disabled: bool,

    #[serde(default)]
    pub allow_multiple_audiences: bool,

    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,

    /// HTTP paths served without authentication
    #[serde(default)]
    pub http_allowed_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer_url: String::new(),
            audience: String::new(),
            authorization_disabled: false,
            allow_multiple_audiences: false,
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
            http_allowed_paths: Vec::new(),
        }
    }
}

impl AuthConfig {
    /// Load from `AUTH_*` environment variables (and `.env` if present)
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed("AUTH_").from_iter(vars)
    }

    /// Audience list with whitespace and empty entries removed
    pub fn audiences(&self) -> Vec<String> {
        self.audience
            .split(',')
            .map(str::trim)
            .filter(|aud| !aud.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn allowed_paths(&self) -> impl Iterator<Item = &str> {
        self.http_allowed_paths
            .iter()
            .map(|path| path.trim())
            .filter(|path| !path.is_empty())
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if self.authorization_disabled {
            return Ok(());
        }

        if self.issuer_url.is_empty() {
            return Err(AuthError::InvalidConfig(
                "issuer url cannot be empty if authorization is enabled".to_string(),
            ));
        }

        let audiences = self.audiences();
        if audiences.is_empty() {
            return Err(AuthError::InvalidConfig(
                "audience cannot be empty if authorization is enabled".to_string(),
            ));
        }

        if audiences.len() > 1 && !self.allow_multiple_audiences {
            return Err(AuthError::InvalidConfig(
                "use of multiple audiences is not allowed".to_string(),
            ));
        }

        Ok(())
    }
}

/// Client-credentials identity used to call other internal services
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientCredentialsConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub issuer_url: String,
}

impl ClientCredentialsConfig {
    /// Load from `M2M_*` environment variables
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed("M2M_").from_env()
    }

    pub fn validate(&self) -> Result<(), CredentialError> {
        let required = [
            ("client id", &self.client_id),
            ("client secret", &self.client_secret),
            ("audience", &self.audience),
            ("issuer url", &self.issuer_url),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(CredentialError::InvalidConfig(format!("{} is required", name)));
            }
        }

        Ok(())
    }
}

/// Decision service location
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyServiceConfig {
    pub base_url: String,
}

impl PolicyServiceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Load from `POLICY_SERVICE_BASE_URL`
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed("POLICY_SERVICE_").from_env()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoRefreshConfig {
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_token_interval_secs: u64,
}

impl Default for AutoRefreshConfig {
    fn default() -> Self {
        Self {
            refresh_token_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
        }
    }
}

impl AutoRefreshConfig {
    /// Load from `GRPC_REFRESH_TOKEN_INTERVAL_SECS`
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed("GRPC_").from_env()
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_token_interval_secs)
    }
}
