//! # Actix Middleware Library
//!
//! HTTP transport adapter for services that expose REST or gateway routes
//! next to their gRPC API.
//!
//! ## Modules
//! - `http_auth`: bearer token validation with a path allow-list
//!
//! ## Usage
//!
//! ```rust,no_run
//! use actix_middleware::HttpAuthMiddleware;
//! use actix_web::{web, App, HttpResponse, HttpServer};
//! use auth_core::{AuthConfig, JwksTokenValidator};
//! use std::sync::Arc;
//!
//! #[actix_web::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AuthConfig::from_env()?;
//!     config.validate()?;
//!     let validator = Arc::new(JwksTokenValidator::new(&config)?);
//!
//!     HttpServer::new(move || {
//!         App::new()
//!             .wrap(HttpAuthMiddleware::new(validator.clone(), &config))
//!             .route("/healthcheck", web::get().to(|| async { HttpResponse::Ok().finish() }))
//!     })
//!     .bind(("0.0.0.0", 8080))?
//!     .run()
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod http_auth;

pub use http_auth::{HttpAuthMiddleware, HttpAuthMiddlewareService};
