//! gRPC Policy Authorizer
//!
//! Maps request message types to a decision-service policy. Handlers call
//! `authorize` with the decoded message; the authorizer resolves the actor,
//! builds the resource payload and asks the decision service.
//!
//! ## Per-call steps
//!
//! 1. Disabled: allow
//! 2. Message type not registered: allow
//! 3. Actor configurator installed: replace the call's actor (failure is Internal)
//! 4. Serializer registered: build the resource (failure is Internal), else `null`
//! 5. Ask the decision service: error is Internal, `false` is PermissionDenied
//!
//! Registration takes `&mut self`, so every policy is in place before the
//! authorizer is shared with request handlers.

use async_trait::async_trait;
use auth_core::{
    Actor, CallContext, PolicyChecker, PolicyClient, PolicyRule, PolicyServiceConfig,
};
use serde_json::Value;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tonic::Status;
use tracing::{debug, error, warn};

/// Builds the policy `resource` input from a request message
pub trait PolicyResourceSerializer<T>: Send + Sync {
    fn serialize_resource(&self, ctx: &CallContext, request: &T) -> anyhow::Result<Value>;
}

impl<T, F> PolicyResourceSerializer<T> for F
where
    F: Fn(&CallContext, &T) -> anyhow::Result<Value> + Send + Sync,
{
    fn serialize_resource(&self, ctx: &CallContext, request: &T) -> anyhow::Result<Value> {
        self(ctx, request)
    }
}

/// Builds the policy `resource` input when a stream opens, before any
/// message has been received
pub trait PolicyStreamResourceSerializer: Send + Sync {
    fn serialize_stream_resource(&self, ctx: &CallContext) -> anyhow::Result<Value>;
}

impl<F> PolicyStreamResourceSerializer for F
where
    F: Fn(&CallContext) -> anyhow::Result<Value> + Send + Sync,
{
    fn serialize_stream_resource(&self, ctx: &CallContext) -> anyhow::Result<Value> {
        self(ctx)
    }
}

/// Resolves the actor for a call before any policy is checked, e.g. to
/// look up an internal account id from the identity provider subject
#[async_trait]
pub trait PolicyActorConfigurator: Send + Sync {
    async fn configure_actor(&self, ctx: &CallContext) -> anyhow::Result<Actor>;
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("policy rule cannot be empty")]
    EmptyPolicy,

    #[error("request type {0} is already registered")]
    AlreadyRegistered(&'static str),

    #[error("missing 'enabled' function in policy authorizer config")]
    MissingEnabled,
}

pub type EnabledFn = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Default)]
pub struct GrpcPolicyAuthorizerConfig {
    /// Checked on every call so the switch can flip at runtime
    pub enabled: Option<EnabledFn>,
    pub policy_service_base_url: String,
    pub http_client: Option<reqwest::Client>,
    /// Replaces the `PolicyClient` built from `policy_service_base_url`
    pub policy_checker: Option<Arc<dyn PolicyChecker>>,
    pub actor_configurator: Option<Arc<dyn PolicyActorConfigurator>>,
}

type ErasedSerializer =
    Box<dyn Fn(&CallContext, &dyn Any) -> anyhow::Result<Value> + Send + Sync>;

struct Registration {
    policy: PolicyRule,
    type_name: &'static str,
    serializer: Option<ErasedSerializer>,
    stream_serializer: Option<Arc<dyn PolicyStreamResourceSerializer>>,
}

pub struct GrpcPolicyAuthorizer {
    enabled: EnabledFn,
    checker: Arc<dyn PolicyChecker>,
    actor_configurator: Option<Arc<dyn PolicyActorConfigurator>>,
    registrations: HashMap<TypeId, Registration>,
}

impl GrpcPolicyAuthorizer {
    pub fn new(config: GrpcPolicyAuthorizerConfig) -> Result<Self, RegistrationError> {
        let enabled = config.enabled.ok_or(RegistrationError::MissingEnabled)?;

        let checker = match config.policy_checker {
            Some(checker) => checker,
            None => Arc::new(PolicyClient::new(
                PolicyServiceConfig::new(config.policy_service_base_url),
                config.http_client,
            )),
        };

        Ok(Self {
            enabled,
            checker,
            actor_configurator: config.actor_configurator,
            registrations: HashMap::new(),
        })
    }

    /// Enforce `policy` for every request of type `T`.
    ///
    /// Without a serializer the policy sees `resource: null`.
    pub fn register_request<T: Any>(
        &mut self,
        policy: impl Into<PolicyRule>,
        serializer: Option<Arc<dyn PolicyResourceSerializer<T>>>,
    ) -> Result<(), RegistrationError> {
        let serializer = serializer.map(|serializer| -> ErasedSerializer {
            Box::new(move |ctx: &CallContext, request: &dyn Any| {
                let request = request.downcast_ref::<T>().ok_or_else(|| {
                    anyhow::anyhow!("request is not a {}", type_name::<T>())
                })?;
                serializer.serialize_resource(ctx, request)
            })
        });

        self.insert::<T>(policy.into(), serializer, None)
    }

    /// Enforce `policy` when a stream of type `T` (e.g.
    /// `tonic::Streaming<M>`) opens; checked with `authorize_stream`.
    ///
    /// The serializer only sees the call context.
    pub fn register_stream<T: Any>(
        &mut self,
        policy: impl Into<PolicyRule>,
        serializer: Option<Arc<dyn PolicyStreamResourceSerializer>>,
    ) -> Result<(), RegistrationError> {
        self.insert::<T>(policy.into(), None, serializer)
    }

    fn insert<T: Any>(
        &mut self,
        policy: PolicyRule,
        serializer: Option<ErasedSerializer>,
        stream_serializer: Option<Arc<dyn PolicyStreamResourceSerializer>>,
    ) -> Result<(), RegistrationError> {
        if policy.is_empty() {
            return Err(RegistrationError::EmptyPolicy);
        }

        let type_id = TypeId::of::<T>();
        if self.registrations.contains_key(&type_id) {
            return Err(RegistrationError::AlreadyRegistered(type_name::<T>()));
        }

        debug!(request_type = type_name::<T>(), policy = %policy, "Registered request policy");
        self.registrations.insert(
            type_id,
            Registration {
                policy,
                type_name: type_name::<T>(),
                serializer,
                stream_serializer,
            },
        );
        Ok(())
    }

    pub fn is_registered<T: Any>(&self) -> bool {
        self.registrations.contains_key(&TypeId::of::<T>())
    }

    /// Check the policy registered for `T` against this call
    pub async fn authorize<T: Any + Sync>(
        &self,
        ctx: &CallContext,
        request: &T,
    ) -> Result<(), Status> {
        let Some(registration) = self.registration::<T>() else {
            return Ok(());
        };

        self.configure_actor(ctx).await?;

        let resource = match &registration.serializer {
            Some(serialize) => serialize(ctx, request).map_err(|e| {
                error!(
                    request_type = registration.type_name,
                    error = %e,
                    "Policy resource serialization failed"
                );
                Status::internal(format!("failed to serialize policy resource: {}", e))
            })?,
            None => Value::Null,
        };

        self.check(ctx, registration, &resource).await
    }

    /// Check the policy registered for stream type `T` when the stream opens.
    ///
    /// No message exists yet: a type registered with a per-message
    /// serializer through `register_request` is rejected as Internal.
    pub async fn authorize_stream<T: Any>(&self, ctx: &CallContext) -> Result<(), Status> {
        let Some(registration) = self.registration::<T>() else {
            return Ok(());
        };

        if registration.serializer.is_some() {
            error!(
                request_type = registration.type_name,
                "Stream checked against a per-message serializer"
            );
            return Err(Status::internal(
                "stream policies need a stream resource serializer",
            ));
        }

        self.configure_actor(ctx).await?;

        let resource = match &registration.stream_serializer {
            Some(serializer) => serializer.serialize_stream_resource(ctx).map_err(|e| {
                error!(
                    request_type = registration.type_name,
                    error = %e,
                    "Stream resource serialization failed"
                );
                Status::internal(format!("failed to serialize policy resource: {}", e))
            })?,
            None => Value::Null,
        };

        self.check(ctx, registration, &resource).await
    }

    fn registration<T: Any>(&self) -> Option<&Registration> {
        if !(self.enabled)() {
            return None;
        }
        self.registrations.get(&TypeId::of::<T>())
    }

    async fn configure_actor(&self, ctx: &CallContext) -> Result<(), Status> {
        let Some(configurator) = &self.actor_configurator else {
            return Ok(());
        };

        let actor = configurator.configure_actor(ctx).await.map_err(|e| {
            error!(error = %e, "Actor configuration failed");
            Status::internal(format!("failed to configure policy actor: {}", e))
        })?;
        ctx.set_actor(actor);
        Ok(())
    }

    async fn check(
        &self,
        ctx: &CallContext,
        registration: &Registration,
        resource: &Value,
    ) -> Result<(), Status> {
        let allowed = self
            .checker
            .allowed(ctx, &registration.policy, resource)
            .await
            .map_err(|e| {
                error!(policy = %registration.policy, error = %e, "Policy check failed");
                Status::internal(format!("policy check failed: {}", e))
            })?;

        if !allowed {
            warn!(
                policy = %registration.policy,
                request_type = registration.type_name,
                "Policy denied request"
            );
            return Err(Status::permission_denied(format!(
                "policy {} denied the request",
                registration.policy
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth_core::{CustomClaims, PolicyError};
    use parking_lot::Mutex;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tonic::Code;

    const TEST_POLICY: &str = "test.policy";

    struct Registered;
    struct WithSerializer;
    struct WithFailingSerializer;
    struct NotRegistered;

    #[derive(Default)]
    struct MockChecker {
        allowed: bool,
        fail: bool,
        calls: AtomicUsize,
        last: Mutex<Option<(String, Value, Option<Actor>)>>,
    }

    impl MockChecker {
        fn allowing(allowed: bool) -> Arc<Self> {
            Arc::new(Self {
                allowed,
                ..Default::default()
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                ..Default::default()
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PolicyChecker for MockChecker {
        async fn allowed(
            &self,
            ctx: &CallContext,
            policy: &PolicyRule,
            resource: &Value,
        ) -> Result<bool, PolicyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock() = Some((policy.to_string(), resource.clone(), ctx.actor()));
            if self.fail {
                return Err(PolicyError::Response("something bad".into()));
            }
            Ok(self.allowed)
        }
    }

    struct FixedActor;

    #[async_trait]
    impl PolicyActorConfigurator for FixedActor {
        async fn configure_actor(&self, _ctx: &CallContext) -> anyhow::Result<Actor> {
            let mut properties = Map::new();
            properties.insert("patient_id".into(), json!(7));
            Ok(Actor::new("patient", properties))
        }
    }

    struct BrokenActor;

    #[async_trait]
    impl PolicyActorConfigurator for BrokenActor {
        async fn configure_actor(&self, _ctx: &CallContext) -> anyhow::Result<Actor> {
            anyhow::bail!("account lookup failed")
        }
    }

    fn enabled(value: bool) -> Option<EnabledFn> {
        Some(Arc::new(move || value))
    }

    fn authorizer(checker: Arc<MockChecker>) -> GrpcPolicyAuthorizer {
        let mut authorizer = GrpcPolicyAuthorizer::new(GrpcPolicyAuthorizerConfig {
            enabled: enabled(true),
            policy_checker: Some(checker),
            ..Default::default()
        })
        .unwrap();
        register_all(&mut authorizer, Arc::new(AtomicUsize::new(0)));
        authorizer
    }

    fn register_all(authorizer: &mut GrpcPolicyAuthorizer, serializer_calls: Arc<AtomicUsize>) {
        authorizer
            .register_request::<Registered>(TEST_POLICY, None)
            .unwrap();
        authorizer
            .register_request::<WithSerializer>(
                TEST_POLICY,
                Some(Arc::new(
                    move |_: &CallContext, _: &WithSerializer| -> anyhow::Result<Value> {
                        serializer_calls.fetch_add(1, Ordering::SeqCst);
                        Ok(json!({"key": "value"}))
                    },
                )),
            )
            .unwrap();
        authorizer
            .register_request::<WithFailingSerializer>(
                TEST_POLICY,
                Some(Arc::new(
                    |_: &CallContext, _: &WithFailingSerializer| -> anyhow::Result<Value> {
                        anyhow::bail!("something bad")
                    },
                )),
            )
            .unwrap();
    }

    fn user_ctx() -> CallContext {
        CallContext::with_claims(CustomClaims {
            actor_type: "user".into(),
            ..Default::default()
        })
    }

    #[test]
    fn test_config_requires_enabled() {
        let result = GrpcPolicyAuthorizer::new(GrpcPolicyAuthorizerConfig::default());
        assert!(matches!(result, Err(RegistrationError::MissingEnabled)));

        let result = GrpcPolicyAuthorizer::new(GrpcPolicyAuthorizerConfig {
            enabled: enabled(true),
            ..Default::default()
        });
        assert!(result.is_ok());
    }

    #[test]
    fn test_registration_rejects_empty_policy_and_duplicates() {
        let mut authorizer = authorizer(MockChecker::allowing(true));
        assert!(authorizer.is_registered::<Registered>());
        assert!(!authorizer.is_registered::<NotRegistered>());

        assert!(matches!(
            authorizer.register_request::<NotRegistered>("", None),
            Err(RegistrationError::EmptyPolicy)
        ));
        assert!(matches!(
            authorizer.register_request::<Registered>(TEST_POLICY, None),
            Err(RegistrationError::AlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_allows_without_policy_call() {
        let checker = MockChecker::allowing(false);
        let mut authorizer = GrpcPolicyAuthorizer::new(GrpcPolicyAuthorizerConfig {
            enabled: enabled(false),
            policy_checker: Some(checker.clone()),
            ..Default::default()
        })
        .unwrap();
        authorizer
            .register_request::<Registered>(TEST_POLICY, None)
            .unwrap();

        assert!(authorizer.authorize(&user_ctx(), &Registered).await.is_ok());
        assert_eq!(checker.calls(), 0);
    }

    #[tokio::test]
    async fn test_enabled_switch_read_per_call() {
        let checker = MockChecker::allowing(false);
        let switch = Arc::new(AtomicBool::new(false));
        let flag = switch.clone();

        let mut authorizer = GrpcPolicyAuthorizer::new(GrpcPolicyAuthorizerConfig {
            enabled: Some(Arc::new(move || flag.load(Ordering::SeqCst))),
            policy_checker: Some(checker.clone()),
            ..Default::default()
        })
        .unwrap();
        authorizer
            .register_request::<Registered>(TEST_POLICY, None)
            .unwrap();

        assert!(authorizer.authorize(&user_ctx(), &Registered).await.is_ok());

        switch.store(true, Ordering::SeqCst);
        let status = authorizer.authorize(&user_ctx(), &Registered).await.unwrap_err();
        assert_eq!(status.code(), Code::PermissionDenied);
    }

    #[tokio::test]
    async fn test_unregistered_type_makes_no_policy_call() {
        let checker = MockChecker::allowing(false);
        let authorizer = authorizer(checker.clone());

        assert!(authorizer.authorize(&user_ctx(), &NotRegistered).await.is_ok());
        assert_eq!(checker.calls(), 0);
    }

    #[tokio::test]
    async fn test_serializer_failure_is_internal() {
        let checker = MockChecker::allowing(true);
        let authorizer = authorizer(checker.clone());

        let status = authorizer
            .authorize(&user_ctx(), &WithFailingSerializer)
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(checker.calls(), 0);
    }

    #[tokio::test]
    async fn test_policy_client_failure_is_internal() {
        let authorizer = authorizer(MockChecker::failing());

        let status = authorizer.authorize(&user_ctx(), &Registered).await.unwrap_err();
        assert_eq!(status.code(), Code::Internal);
    }

    #[tokio::test]
    async fn test_denied_is_permission_denied() {
        let checker = MockChecker::allowing(false);
        let authorizer = authorizer(checker.clone());

        let status = authorizer.authorize(&user_ctx(), &Registered).await.unwrap_err();
        assert_eq!(status.code(), Code::PermissionDenied);

        let (policy, resource, _) = checker.last.lock().clone().unwrap();
        assert_eq!(policy, TEST_POLICY);
        assert_eq!(resource, Value::Null);
    }

    #[tokio::test]
    async fn test_serializer_output_passed_unchanged_once() {
        let checker = MockChecker::allowing(true);
        let serializer_calls = Arc::new(AtomicUsize::new(0));

        let mut authorizer = GrpcPolicyAuthorizer::new(GrpcPolicyAuthorizerConfig {
            enabled: enabled(true),
            policy_checker: Some(checker.clone()),
            ..Default::default()
        })
        .unwrap();
        register_all(&mut authorizer, serializer_calls.clone());

        authorizer
            .authorize(&user_ctx(), &WithSerializer)
            .await
            .unwrap();

        assert_eq!(serializer_calls.load(Ordering::SeqCst), 1);
        assert_eq!(checker.calls(), 1);
        let (policy, resource, _) = checker.last.lock().clone().unwrap();
        assert_eq!(policy, TEST_POLICY);
        assert_eq!(resource, json!({"key": "value"}));
    }

    #[tokio::test]
    async fn test_actor_configurator_replaces_actor() {
        let checker = MockChecker::allowing(true);
        let mut authorizer = GrpcPolicyAuthorizer::new(GrpcPolicyAuthorizerConfig {
            enabled: enabled(true),
            policy_checker: Some(checker.clone()),
            actor_configurator: Some(Arc::new(FixedActor)),
            ..Default::default()
        })
        .unwrap();
        authorizer
            .register_request::<Registered>(TEST_POLICY, None)
            .unwrap();

        let ctx = user_ctx();
        authorizer.authorize(&ctx, &Registered).await.unwrap();

        let (_, _, actor) = checker.last.lock().clone().unwrap();
        assert_eq!(actor.unwrap().actor_type, "patient");
        assert_eq!(ctx.actor().unwrap().actor_type, "patient");
    }

    #[tokio::test]
    async fn test_actor_configurator_failure_is_internal() {
        let checker = MockChecker::allowing(true);
        let mut authorizer = GrpcPolicyAuthorizer::new(GrpcPolicyAuthorizerConfig {
            enabled: enabled(true),
            policy_checker: Some(checker.clone()),
            actor_configurator: Some(Arc::new(BrokenActor)),
            ..Default::default()
        })
        .unwrap();
        authorizer
            .register_request::<Registered>(TEST_POLICY, None)
            .unwrap();

        let status = authorizer.authorize(&user_ctx(), &Registered).await.unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(checker.calls(), 0);
    }

    #[tokio::test]
    async fn test_authorize_stream() {
        struct UploadStream;

        let checker = MockChecker::allowing(true);
        let mut authorizer = authorizer(checker.clone());
        authorizer
            .register_request::<UploadStream>(TEST_POLICY, None)
            .unwrap();

        authorizer
            .authorize_stream::<UploadStream>(&user_ctx())
            .await
            .unwrap();
        assert_eq!(checker.calls(), 1);

        let status = authorizer
            .authorize_stream::<WithSerializer>(&user_ctx())
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
    }

    #[tokio::test]
    async fn test_stream_serializer_sees_call_context() {
        struct DownloadStream;
        struct BrokenStream;

        let checker = MockChecker::allowing(true);
        let mut authorizer = authorizer(checker.clone());
        authorizer
            .register_stream::<DownloadStream>(
                TEST_POLICY,
                Some(Arc::new(|ctx: &CallContext| -> anyhow::Result<Value> {
                    let actor_type = ctx.actor().map(|actor| actor.actor_type);
                    Ok(json!({"opened_by": actor_type}))
                })),
            )
            .unwrap();
        authorizer
            .register_stream::<BrokenStream>(
                TEST_POLICY,
                Some(Arc::new(|_: &CallContext| -> anyhow::Result<Value> {
                    anyhow::bail!("no stream metadata")
                })),
            )
            .unwrap();

        authorizer
            .authorize_stream::<DownloadStream>(&user_ctx())
            .await
            .unwrap();
        let (policy, resource, _) = checker.last.lock().clone().unwrap();
        assert_eq!(policy, TEST_POLICY);
        assert_eq!(resource, json!({"opened_by": "user"}));

        let status = authorizer
            .authorize_stream::<BrokenStream>(&user_ctx())
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(checker.calls(), 1);
    }

    #[test]
    fn test_stream_registration_shares_type_checks() {
        struct UploadStream;

        let mut authorizer = authorizer(MockChecker::allowing(true));
        authorizer
            .register_stream::<UploadStream>(TEST_POLICY, None)
            .unwrap();

        assert!(matches!(
            authorizer.register_request::<UploadStream>(TEST_POLICY, None),
            Err(RegistrationError::AlreadyRegistered(_))
        ));
        assert!(matches!(
            authorizer.register_stream::<Registered>("", None),
            Err(RegistrationError::EmptyPolicy)
        ));
    }
}
