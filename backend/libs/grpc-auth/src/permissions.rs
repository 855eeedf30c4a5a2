//! Method Permission Table
//!
//! Built once at startup from the services a process exposes and shared
//! read-only afterwards. Each fully-qualified method (`/pkg.Service/Method`)
//! maps to one `Permission`:
//!
//! - **public**: no token required at all
//! - **unprotected**: a valid token is required, scopes are not checked
//! - **scoped**: a valid token whose scopes intersect `allowed_scopes`
//!
//! ## Design
//!
//! - **Explicit registration**: each service declares its methods with
//!   `ServiceDescriptor`, there is no runtime reflection over descriptors
//! - **Single check routine**: unary and streaming calls go through the same
//!   `check_auth`
//! - **Fail closed**: a method missing from the table is denied

use auth_core::{bearer_token, AuthConfig, AuthError, CustomClaims, TokenValidator};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tonic::codegen::http::header::AUTHORIZATION;
use tonic::codegen::http::HeaderMap;
use tonic::server::NamedService;
use tonic::Status;
use tracing::{debug, warn};

/// Infrastructure methods every server exposes without authentication
pub const HEALTH_CHECK_METHOD: &str = "/grpc.health.v1.Health/Check";
pub const HEALTH_WATCH_METHOD: &str = "/grpc.health.v1.Health/Watch";
pub const REFLECTION_METHOD: &str =
    "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo";

const BUILTIN_PUBLIC_METHODS: [&str; 3] =
    [HEALTH_CHECK_METHOD, HEALTH_WATCH_METHOD, REFLECTION_METHOD];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permission {
    pub unprotected: bool,
    pub public: bool,
    pub allowed_scopes: HashSet<String>,
}

impl Permission {
    pub fn public() -> Self {
        Self {
            public: true,
            ..Default::default()
        }
    }

    pub fn unprotected() -> Self {
        Self {
            unprotected: true,
            ..Default::default()
        }
    }

    pub fn scoped<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_scopes: scopes.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Required scope for a method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRule {
    pub scope: String,
}

/// Per-method auth annotations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodAuthOptions {
    pub public: bool,
    pub rule: Option<AuthorizationRule>,
}

impl MethodAuthOptions {
    pub fn public() -> Self {
        Self {
            public: true,
            rule: None,
        }
    }

    /// Token required, no scope check
    pub fn unprotected() -> Self {
        Self::default()
    }

    pub fn scope(scope: impl Into<String>) -> Self {
        Self {
            public: false,
            rule: Some(AuthorizationRule {
                scope: scope.into(),
            }),
        }
    }

    fn permission(&self) -> Permission {
        if self.public {
            return Permission::public();
        }
        match &self.rule {
            Some(rule) => Permission::scoped([rule.scope.clone()]),
            None => Permission::unprotected(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    pub options: MethodAuthOptions,
}

/// A gRPC service and the auth annotations of its methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    /// `name` is the fully-qualified service name, e.g. `pkg.v1.AccountService`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Descriptor named after a generated tonic server
    pub fn for_service<S: NamedService>() -> Self {
        Self::new(S::NAME)
    }

    pub fn method(mut self, name: impl Into<String>, options: MethodAuthOptions) -> Self {
        self.methods.push(MethodDescriptor {
            name: name.into(),
            options,
        });
        self
    }

    fn full_method_name(&self, method: &str) -> String {
        format!("/{}/{}", self.name, method)
    }
}

pub struct MethodPermissions {
    permissions: HashMap<String, Permission>,
    authorization_disabled: bool,
    validator: Arc<dyn TokenValidator>,
}

impl MethodPermissions {
    pub fn new<I>(descriptors: I, config: &AuthConfig, validator: Arc<dyn TokenValidator>) -> Self
    where
        I: IntoIterator<Item = ServiceDescriptor>,
    {
        let mut permissions = HashMap::new();

        for service in descriptors {
            for method in &service.methods {
                permissions.insert(
                    service.full_method_name(&method.name),
                    method.options.permission(),
                );
            }
        }

        for method in BUILTIN_PUBLIC_METHODS {
            permissions.insert(method.to_string(), Permission::public());
        }

        Self {
            permissions,
            authorization_disabled: config.authorization_disabled,
            validator,
        }
    }

    pub fn get(&self, full_method: &str) -> Option<&Permission> {
        self.permissions.get(full_method)
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    /// Authenticate and authorize one call.
    ///
    /// Returns the caller's claims, or `None` when no identity was required
    /// (public method or authorization disabled).
    ///
    /// ## Errors
    ///
    /// - `PermissionDenied`: unknown method, or scopes disjoint from the
    ///   method's allowed scopes
    /// - `Unauthenticated`: missing or malformed header, invalid token
    /// - `Internal`: the validator could not reach its key set
    pub async fn check_auth(
        &self,
        full_method: &str,
        headers: &HeaderMap,
    ) -> Result<Option<CustomClaims>, Status> {
        if self.authorization_disabled {
            return Ok(None);
        }

        let permission = self.permissions.get(full_method).ok_or_else(|| {
            warn!(method = %full_method, "Call to method without permission entry");
            AuthError::UnknownMethod(full_method.to_string()).to_status()
        })?;

        if permission.public {
            return Ok(None);
        }

        let token = extract_bearer(headers).map_err(|e| {
            warn!(method = %full_method, error = %e, "Rejected call without bearer token");
            e.to_status()
        })?;

        let claims = self.validator.validate(token).await.map_err(|e| {
            warn!(method = %full_method, error = %e, "Token validation failed");
            e.to_status()
        })?;

        if !permission.unprotected && !claims.has_any_scope(&permission.allowed_scopes) {
            warn!(method = %full_method, scope = %claims.scope, "Insufficient scope");
            return Err(AuthError::InsufficientScope.to_status());
        }

        debug!(method = %full_method, "Call authorized");
        Ok(Some(claims))
    }
}

fn extract_bearer(headers: &HeaderMap) -> auth_core::Result<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthorizationHeader)?;
    let value = value
        .to_str()
        .map_err(|_| AuthError::MalformedAuthorizationHeader)?;
    bearer_token(value)
}
