//! Per-call authentication state
//!
//! The transport adapters create one `CallContext` per inbound call and put
//! it in the request extensions. Cloning is cheap and every clone observes
//! the same state, so the handler, the policy authorizer and the policy
//! client all agree on who the caller is.

use crate::claims::{Actor, CustomClaims};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Default)]
struct CallState {
    claims: Option<CustomClaims>,
    actor: RwLock<Option<Actor>>,
}

#[derive(Debug, Clone, Default)]
pub struct CallContext {
    inner: Arc<CallState>,
}

impl CallContext {
    /// Context for an unauthenticated (public or auth-disabled) call
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_claims(claims: CustomClaims) -> Self {
        Self {
            inner: Arc::new(CallState {
                claims: Some(claims),
                actor: RwLock::new(None),
            }),
        }
    }

    /// Context carrying a pre-resolved actor and no claims
    pub fn with_actor(actor: Actor) -> Self {
        Self {
            inner: Arc::new(CallState {
                claims: None,
                actor: RwLock::new(Some(actor)),
            }),
        }
    }

    pub fn claims(&self) -> Option<&CustomClaims> {
        self.inner.claims.as_ref()
    }

    /// Resolve the actor for this call.
    ///
    /// The first resolution copies type and properties from the claims and
    /// memoizes the result; later calls return the cached actor.
    pub fn actor(&self) -> Option<Actor> {
        if let Some(actor) = self.inner.actor.read().as_ref() {
            return Some(actor.clone());
        }

        let claims = self.inner.claims.as_ref()?;
        let mut slot = self.inner.actor.write();
        let actor = slot.get_or_insert_with(|| Actor::from(claims));
        Some(actor.clone())
    }

    /// Replace the actor, e.g. after resolving an external account id
    pub fn set_actor(&self, actor: Actor) {
        *self.inner.actor.write() = Some(actor);
    }
}
