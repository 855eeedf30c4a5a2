//! gRPC Authentication and Policy Authorization
//!
//! Enforces per-method permissions on inbound tonic calls and gives handlers
//! a policy authorizer for attribute-based checks on decoded messages.
//!
//! ## Core Components
//!
//! - **MethodPermissions**: immutable method → permission table plus the
//!   single `check_auth` routine
//! - **GrpcAuthLayer**: tower layer running `check_auth` for unary and
//!   streaming calls alike
//! - **GrpcPolicyAuthorizer**: request type → policy registry consulted from
//!   handlers
//! - **AddCredentialsInterceptor / CopyCredentials**: outbound credentials
//! - **AuthContextExt / PolicyAuthorizeExt**: request extension traits
//!
//! ## Security Guarantees
//!
//! - Unknown method = `Status::permission_denied`
//! - No token or invalid token = `Status::unauthenticated`
//! - Scope mismatch or policy denial = `Status::permission_denied`
//! - Infrastructure failure = `Status::internal`

mod authorizer;
mod client;
mod extensions;
mod permissions;
mod server;

pub use authorizer::{
    EnabledFn, GrpcPolicyAuthorizer, GrpcPolicyAuthorizerConfig, PolicyActorConfigurator,
    PolicyResourceSerializer, PolicyStreamResourceSerializer, RegistrationError,
};
pub use client::{AddCredentialsInterceptor, CopyCredentials};
pub use extensions::{AuthContextExt, PolicyAuthorizeExt};
pub use permissions::{
    AuthorizationRule, MethodAuthOptions, MethodDescriptor, MethodPermissions, Permission,
    ServiceDescriptor, HEALTH_CHECK_METHOD, HEALTH_WATCH_METHOD, REFLECTION_METHOD,
};
pub use server::{GrpcAuthLayer, GrpcAuthService};

// Re-export tonic Status for convenience
pub use tonic::Status;
