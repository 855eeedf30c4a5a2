//! Server-side auth layer
//!
//! A tonic interceptor only sees metadata: it has no method name and cannot
//! await the key set fetch. `GrpcAuthLayer` sits in front of the tonic
//! router instead and handles both problems at the HTTP level.
//!
//! For every call it:
//! 1. Reads the method from the request path
//! 2. Runs `MethodPermissions::check_auth`
//! 3. Stores a `CallContext` (with or without claims) in request extensions
//! 4. On failure answers with a trailers-only gRPC status
//!
//! Unary and streaming calls share one path here, so their checks cannot
//! drift apart.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use auth_core::{AuthConfig, JwksTokenValidator};
//! use grpc_auth::{GrpcAuthLayer, MethodAuthOptions, MethodPermissions, ServiceDescriptor};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::from_env()?;
//! config.validate()?;
//!
//! let validator = Arc::new(JwksTokenValidator::new(&config)?);
//! let services = vec![ServiceDescriptor::new("accounts.v1.AccountService")
//!     .method("GetAccount", MethodAuthOptions::scope("read:accounts"))];
//!
//! let permissions = MethodPermissions::new(services, &config, validator);
//! let layer = GrpcAuthLayer::new(Arc::new(permissions));
//!
//! // tonic::transport::Server::builder().layer(layer).add_service(...)
//! # Ok(())
//! # }
//! ```

use crate::permissions::MethodPermissions;
use auth_core::CallContext;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::body::BoxBody;
use tonic::codegen::http;
use tower::{Layer, Service};

#[derive(Clone)]
pub struct GrpcAuthLayer {
    permissions: Arc<MethodPermissions>,
}

impl GrpcAuthLayer {
    pub fn new(permissions: Arc<MethodPermissions>) -> Self {
        Self { permissions }
    }
}

impl<S> Layer<S> for GrpcAuthLayer {
    type Service = GrpcAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcAuthService {
            inner,
            permissions: self.permissions.clone(),
        }
    }
}

#[derive(Clone)]
pub struct GrpcAuthService<S> {
    inner: S,
    permissions: Arc<MethodPermissions>,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for GrpcAuthService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        // the clone that was polled ready is the one that serves this call
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let permissions = self.permissions.clone();

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();

            let ctx = match permissions.check_auth(parts.uri.path(), &parts.headers).await {
                Ok(Some(claims)) => CallContext::with_claims(claims),
                Ok(None) => CallContext::anonymous(),
                Err(status) => return Ok(status.into_http()),
            };

            parts.extensions.insert(ctx);
            inner.call(http::Request::from_parts(parts, body)).await
        })
    }
}
