//! Decision service client
//!
//! Sends `{query, input}` to `POST <host>/v1/query` and returns the first
//! decision. The query future is bound to the caller: wrap it in
//! `tokio::time::timeout` to enforce a deadline, dropping it aborts the
//! request.

use crate::claims::Actor;
use crate::config::PolicyServiceConfig;
use crate::context::CallContext;
use crate::error::PolicyError;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, error};

const QUERY_PATH: &str = "v1/query";

/// Dotted policy path such as `example.dh.authz.caregiver.read`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyRule(String);

impl PolicyRule {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Query string bound to `result`
    pub fn query(&self) -> String {
        format!("result = data.{}", self.0)
    }
}

impl From<&str> for PolicyRule {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub result: Value,
}

/// Response body of a successful query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResults {
    #[serde(default, rename = "result")]
    pub results: Vec<QueryResult>,
}

impl QueryResults {
    /// First decision, if any
    pub fn decision(&self) -> Option<&Value> {
        self.results
            .first()
            .map(|r| &r.result)
            .filter(|value| !value.is_null())
    }
}

#[derive(Debug, Deserialize)]
struct QueryErrorBody {
    code: String,
    message: String,
}

#[derive(Serialize)]
struct QueryRequest<'a, I: ?Sized> {
    query: &'a str,
    input: &'a I,
}

#[derive(Serialize)]
struct PolicyInput<'a, R: ?Sized> {
    actor: &'a Actor,
    resource: &'a R,
}

/// Boolean decision seam used by the gRPC authorizer
#[async_trait]
pub trait PolicyChecker: Send + Sync {
    async fn allowed(
        &self,
        ctx: &CallContext,
        policy: &PolicyRule,
        resource: &Value,
    ) -> Result<bool, PolicyError>;
}

#[derive(Debug, Clone)]
pub struct PolicyClient {
    base_url: String,
    http: reqwest::Client,
}

impl PolicyClient {
    pub fn new(config: PolicyServiceConfig, http: Option<reqwest::Client>) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http: http.unwrap_or_default(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run a raw query against the decision service
    pub async fn query<I>(&self, query: &str, input: &I) -> Result<QueryResults, PolicyError>
    where
        I: Serialize + ?Sized,
    {
        if query.trim().is_empty() {
            return Err(PolicyError::InvalidQuery);
        }

        let body = serde_json::to_vec(&QueryRequest { query, input })
            .map_err(PolicyError::InvalidRequest)?;

        let url = format!("{}/{}", self.base_url, QUERY_PATH);
        let response = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                error!(url = %url, error = %e, "Policy request failed");
                PolicyError::Server(e)
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let raw = response.text().await.map_err(PolicyError::Server)?;
            debug!(status = status.as_u16(), query, "Policy query rejected");
            return Err(match serde_json::from_str::<QueryErrorBody>(&raw) {
                Ok(body) => PolicyError::Query {
                    code: body.code,
                    message: body.message,
                },
                Err(_) => PolicyError::Response(raw),
            });
        }

        response
            .json::<QueryResults>()
            .await
            .map_err(|e| PolicyError::Decode(e.to_string()))
    }

    /// Evaluate `policy` for the call's actor against `resource` and return
    /// the raw decision
    pub async fn check_policy<R>(
        &self,
        ctx: &CallContext,
        policy: &PolicyRule,
        resource: &R,
    ) -> Result<Option<Value>, PolicyError>
    where
        R: Serialize + ?Sized,
    {
        let actor = ctx.actor().ok_or(PolicyError::MissingActor)?;
        let input = PolicyInput {
            actor: &actor,
            resource,
        };

        let results = self.query(&policy.query(), &input).await?;
        Ok(results.decision().cloned())
    }

    /// Like `check_policy`, but only a literal `true` decision allows
    pub async fn allowed<R>(
        &self,
        ctx: &CallContext,
        policy: &PolicyRule,
        resource: &R,
    ) -> Result<bool, PolicyError>
    where
        R: Serialize + ?Sized,
    {
        let decision = self.check_policy(ctx, policy, resource).await?;
        Ok(as_bool(decision.as_ref()))
    }
}

#[async_trait]
impl PolicyChecker for PolicyClient {
    async fn allowed(
        &self,
        ctx: &CallContext,
        policy: &PolicyRule,
        resource: &Value,
    ) -> Result<bool, PolicyError> {
        PolicyClient::allowed(self, ctx, policy, resource).await
    }
}

fn as_bool(decision: Option<&Value>) -> bool {
    matches!(decision, Some(Value::Bool(true)))
}
