/// Bearer token validation against an identity provider's JWKS
///
/// Tokens are RS256-signed by the identity provider. Public keys are fetched
/// from `<issuer>/.well-known/jwks.json` and cached per issuer for a fixed
/// period, independent of any token's lifetime.
///
/// ## Security Design
///
/// - **RS256 ONLY**: the header algorithm must match, no HMAC fallback
/// - **kid required**: the signing key is looked up by key id, never guessed
/// - **Strict iss/aud**: issuer must equal the configured value, audience must
///   intersect the configured list
/// - **Bounded skew**: `exp`/`nbf` checked with the configured leeway only
use crate::claims::CustomClaims;
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Url;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// JWT algorithm accepted from the identity provider
const JWT_ALGORITHM: Algorithm = Algorithm::RS256;

/// How long a fetched key set is trusted before it is fetched again
pub const JWKS_REFRESH_PERIOD: Duration = Duration::from_secs(5 * 60);

const JWKS_PATH: &str = ".well-known/jwks.json";

/// Validates a raw bearer token and returns its claims
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<CustomClaims>;
}

#[derive(Clone)]
struct CachedJwks {
    jwks: Arc<JwkSet>,
    fetched_at: Instant,
}

pub struct JwksTokenValidator {
    issuer: String,
    jwks_url: Url,
    audiences: Vec<String>,
    leeway_secs: u64,
    client: reqwest::Client,
    cache: DashMap<String, CachedJwks>,
    refresh_period: Duration,
}

impl JwksTokenValidator {
    /// Build a validator for the configured issuer and audiences
    ///
    /// ## Errors
    ///
    /// Returns `AuthError::InvalidConfig` if the issuer URL cannot be parsed.
    pub fn new(config: &AuthConfig) -> Result<Self> {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: &AuthConfig, client: reqwest::Client) -> Result<Self> {
        let jwks_url = jwks_url(&config.issuer_url)?;

        Ok(Self {
            issuer: config.issuer_url.clone(),
            jwks_url,
            audiences: config.audiences(),
            leeway_secs: config.clock_skew_secs,
            client,
            cache: DashMap::new(),
            refresh_period: JWKS_REFRESH_PERIOD,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    async fn key_set(&self) -> Result<Arc<JwkSet>> {
        if let Some(entry) = self.cache.get(&self.issuer) {
            if entry.fetched_at.elapsed() < self.refresh_period {
                return Ok(entry.jwks.clone());
            }
        }

        let jwks = Arc::new(self.fetch_jwks().await?);
        self.cache.insert(
            self.issuer.clone(),
            CachedJwks {
                jwks: jwks.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(jwks)
    }

    async fn fetch_jwks(&self) -> Result<JwkSet> {
        debug!(url = %self.jwks_url, "Fetching JWKS");

        let response = self
            .client
            .get(self.jwks_url.clone())
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| {
                error!(url = %self.jwks_url, error = %e, "JWKS fetch failed");
                AuthError::Internal(format!("failed to fetch JWKS: {}", e))
            })?;

        response.json::<JwkSet>().await.map_err(|e| {
            error!(url = %self.jwks_url, error = %e, "JWKS decode failed");
            AuthError::Internal(format!("failed to decode JWKS: {}", e))
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.validate_exp = true;
        // iss/aud are only compared when present unless required here
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = self.leeway_secs;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&self.audiences);
        validation
    }
}

#[async_trait]
impl TokenValidator for JwksTokenValidator {
    async fn validate(&self, token: &str) -> Result<CustomClaims> {
        let header = decode_header(token)?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken("token header has no kid".to_string()))?;

        let jwks = self.key_set().await?;
        let jwk = jwks
            .find(&kid)
            .ok_or_else(|| AuthError::InvalidToken(format!("unknown signing key: {}", kid)))?;
        let decoding_key = DecodingKey::from_jwk(jwk)?;

        let token_data = decode::<CustomClaims>(token, &decoding_key, &self.validation())?;
        Ok(token_data.claims)
    }
}

fn jwks_url(issuer_url: &str) -> Result<Url> {
    let issuer = Url::parse(issuer_url)
        .map_err(|e| AuthError::InvalidConfig(format!("invalid issuer url {:?}: {}", issuer_url, e)))?;

    let base = format!("{}/", issuer.as_str().trim_end_matches('/'));
    Url::parse(&base)
        .and_then(|base| base.join(JWKS_PATH))
        .map_err(|e| AuthError::InvalidConfig(format!("invalid issuer url {:?}: {}", issuer_url, e)))
}
