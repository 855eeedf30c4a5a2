//! Client-side credential interceptors
//!
//! Two ways to authenticate an outgoing call to another internal service:
//!
//! - `AddCredentialsInterceptor`: the service's own identity, usually an
//!   `AutoRefreshToken`
//! - `CopyCredentials`: forward the caller's `authorization` header as-is
//!
//! Neither requires transport security; TLS is configured on the channel.

use auth_core::AuthorizationValuer;
use std::sync::Arc;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tracing::warn;

const AUTHORIZATION: &str = "authorization";

/// Injects `authorization: <valuer.authorization_value()>` on every call
///
/// ## Usage
///
/// ```rust,no_run
/// use auth_core::{AutoRefreshToken, StaticCredential};
/// use grpc_auth::AddCredentialsInterceptor;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let token = AutoRefreshToken::new(
///     Arc::new(StaticCredential::new("shared-secret")),
///     Duration::from_secs(3600),
/// )?;
/// let interceptor = AddCredentialsInterceptor::new(Arc::new(token));
///
/// // let client = AccountServiceClient::with_interceptor(channel, interceptor);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AddCredentialsInterceptor {
    valuer: Arc<dyn AuthorizationValuer>,
}

impl AddCredentialsInterceptor {
    pub fn new(valuer: Arc<dyn AuthorizationValuer>) -> Self {
        Self { valuer }
    }
}

impl Interceptor for AddCredentialsInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        // read per call so a refreshed token is picked up immediately
        let value = AsciiMetadataValue::try_from(self.valuer.authorization_value()).map_err(|e| {
            warn!(error = %e, "Outbound authorization value is not valid metadata");
            Status::internal("invalid outbound authorization value")
        })?;

        request.metadata_mut().insert(AUTHORIZATION, value);
        Ok(request)
    }
}

/// Forwards the inbound `authorization` header to an outgoing call
///
/// Build one per inbound call from that call's metadata.
#[derive(Clone, Debug, Default)]
pub struct CopyCredentials {
    authorization: Option<AsciiMetadataValue>,
}

impl CopyCredentials {
    /// ## Errors
    ///
    /// `Unauthenticated` if the header is absent and
    /// `require_incoming_credentials` is set.
    pub fn from_incoming(
        metadata: &MetadataMap,
        require_incoming_credentials: bool,
    ) -> Result<Self, Status> {
        let authorization = metadata.get(AUTHORIZATION).cloned();

        if authorization.is_none() && require_incoming_credentials {
            return Err(Status::unauthenticated(
                "Missing authorization header on incoming call",
            ));
        }

        Ok(Self { authorization })
    }

    pub fn authorization(&self) -> Option<&AsciiMetadataValue> {
        self.authorization.as_ref()
    }
}

impl Interceptor for CopyCredentials {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if let Some(value) = &self.authorization {
            request.metadata_mut().insert(AUTHORIZATION, value.clone());
        }
        Ok(request)
    }
}
