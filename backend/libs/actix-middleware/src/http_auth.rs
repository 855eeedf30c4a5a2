use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use auth_core::{bearer_token, AuthConfig, AuthError, TokenValidator};
use futures::future::{ready, Ready};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

/// Bearer token authentication for REST/gateway traffic
///
/// Only identity is enforced here: there is no method scope table on the
/// HTTP path. Any failure is a 401 whose body is the error text.
#[derive(Clone)]
pub struct HttpAuthMiddleware {
    validator: Arc<dyn TokenValidator>,
    disabled: bool,
    allowed_paths: Arc<HashSet<String>>,
}

impl HttpAuthMiddleware {
    pub fn new(validator: Arc<dyn TokenValidator>, config: &AuthConfig) -> Self {
        Self {
            validator,
            disabled: config.authorization_disabled,
            allowed_paths: Arc::new(config.allowed_paths().map(str::to_string).collect()),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for HttpAuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = HttpAuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(HttpAuthMiddlewareService {
            service: Rc::new(service),
            validator: self.validator.clone(),
            disabled: self.disabled,
            allowed_paths: self.allowed_paths.clone(),
        }))
    }
}

pub struct HttpAuthMiddlewareService<S> {
    service: Rc<S>,
    validator: Arc<dyn TokenValidator>,
    disabled: bool,
    allowed_paths: Arc<HashSet<String>>,
}

impl<S, B> Service<ServiceRequest> for HttpAuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        if self.disabled || self.allowed_paths.contains(req.path()) {
            return Box::pin(async move { service.call(req).await });
        }

        let validator = self.validator.clone();

        Box::pin(async move {
            let auth_header = req
                .headers()
                .get("Authorization")
                .ok_or(AuthError::MissingAuthorizationHeader)
                .and_then(|h| {
                    h.to_str()
                        .map(str::to_string)
                        .map_err(|_| AuthError::MalformedAuthorizationHeader)
                })
                .map_err(unauthorized)?;

            let token = bearer_token(&auth_header).map_err(unauthorized)?;

            validator.validate(token).await.map_err(|e| {
                tracing::warn!(path = %req.path(), error = %e, "HTTP token validation failed");
                unauthorized(e)
            })?;

            service.call(req).await
        })
    }
}

fn unauthorized(err: AuthError) -> Error {
    actix_web::error::ErrorUnauthorized(err.to_string())
}
