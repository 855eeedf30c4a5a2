//! Request extension traits for handlers
//!
//! `GrpcAuthLayer` stores a `CallContext` in the request extensions; these
//! traits read it back inside tonic handlers.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use grpc_auth::{AuthContextExt, GrpcPolicyAuthorizer, PolicyAuthorizeExt};
//! use tonic::{Request, Response, Status};
//!
//! # struct GetAccountRequest;
//! async fn get_account(
//!     authorizer: &GrpcPolicyAuthorizer,
//!     request: Request<GetAccountRequest>,
//! ) -> Result<Response<()>, Status> {
//!     let claims = request.auth_claims()?;
//!     tracing::debug!(email = %claims.email, "GetAccount");
//!
//!     request.authorize_policy(authorizer).await?;
//!     Ok(Response::new(()))
//! }
//! ```

use crate::authorizer::GrpcPolicyAuthorizer;
use async_trait::async_trait;
use auth_core::{CallContext, CustomClaims};
use std::any::Any;
use tonic::{Request, Status};

pub trait AuthContextExt {
    /// The call's context, or a fresh anonymous one if the layer was not
    /// installed
    fn call_context(&self) -> CallContext;

    /// Claims of the authenticated caller
    ///
    /// ## Errors
    ///
    /// `Status::unauthenticated` for public calls, calls with authorization
    /// disabled, or when `GrpcAuthLayer` is not installed.
    fn auth_claims(&self) -> Result<&CustomClaims, Status>;
}

impl<T> AuthContextExt for Request<T> {
    fn call_context(&self) -> CallContext {
        self.extensions()
            .get::<CallContext>()
            .cloned()
            .unwrap_or_default()
    }

    fn auth_claims(&self) -> Result<&CustomClaims, Status> {
        self.extensions()
            .get::<CallContext>()
            .and_then(CallContext::claims)
            .ok_or_else(|| {
                Status::unauthenticated("No auth claims found. Ensure GrpcAuthLayer is installed.")
            })
    }
}

#[async_trait]
pub trait PolicyAuthorizeExt {
    /// Run the policy registered for this message type, if any
    async fn authorize_policy(&self, authorizer: &GrpcPolicyAuthorizer) -> Result<(), Status>;
}

#[async_trait]
impl<T: Any + Send + Sync> PolicyAuthorizeExt for Request<T> {
    async fn authorize_policy(&self, authorizer: &GrpcPolicyAuthorizer) -> Result<(), Status> {
        let ctx = self.call_context();
        authorizer.authorize(&ctx, self.get_ref()).await
    }
}
