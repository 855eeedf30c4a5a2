use thiserror::Error;
use tonic::{Code, Status};

pub type Result<T> = std::result::Result<T, AuthError>;

/// Authentication/authorization failures surfaced to callers.
///
/// Every variant maps onto exactly one of three gRPC codes: `Unauthenticated`
/// for identity problems, `PermissionDenied` for authorization problems and
/// `Internal` for local infrastructure failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingAuthorizationHeader,

    #[error("Invalid authorization format (expected 'Bearer <token>')")]
    MalformedAuthorizationHeader,

    #[error("Token validation failed: {0}")]
    InvalidToken(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Insufficient scope")]
    InsufficientScope,

    #[error("Policy denied: {0}")]
    PolicyDenied(String),

    #[error("Invalid auth configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal auth error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn code(&self) -> Code {
        match self {
            AuthError::MissingAuthorizationHeader
            | AuthError::MalformedAuthorizationHeader
            | AuthError::InvalidToken(_) => Code::Unauthenticated,
            AuthError::UnknownMethod(_)
            | AuthError::InsufficientScope
            | AuthError::PolicyDenied(_) => Code::PermissionDenied,
            AuthError::InvalidConfig(_) | AuthError::Internal(_) => Code::Internal,
        }
    }

    /// Convert to gRPC Status for wire protocol
    pub fn to_status(&self) -> Status {
        Status::new(self.code(), self.to_string())
    }
}

impl From<AuthError> for Status {
    fn from(err: AuthError) -> Self {
        err.to_status()
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AuthError::InvalidToken(err.to_string())
    }
}

/// Errors returned by the decision-service client.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid policy query: no policy query specified")]
    InvalidQuery,

    #[error("invalid policy request: {0}")]
    InvalidRequest(#[source] serde_json::Error),

    #[error("policy server error: {0}")]
    Server(#[source] reqwest::Error),

    #[error("{code}: {message}")]
    Query { code: String, message: String },

    #[error("{0}")]
    Response(String),

    #[error("invalid policy response: {0}")]
    Decode(String),

    #[error("no actor found for policy check")]
    MissingActor,
}

/// Errors produced while obtaining service-to-service credentials.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("invalid credential configuration: {0}")]
    InvalidConfig(String),

    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("token endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid token response: {0}")]
    Decode(String),
}
