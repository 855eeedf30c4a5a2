//! Token Claims and Actor
//!
//! `CustomClaims` is what the token validator hands back for every
//! authenticated call. `Actor` is the normalized identity sent to the
//! decision service as `input.actor`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Claims decoded from a validated bearer token
///
/// ## Design Notes
///
/// - Fields are public for direct access (no getter boilerplate)
/// - Absent claims decode to empty values rather than failing
/// - Immutable once produced by the validator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomClaims {
    /// Email address of the caller, if the identity provider includes it
    pub email: String,

    /// Space separated scope tokens, e.g. `"read:version:all write:accounts"`
    pub scope: String,

    /// Actor type, e.g. `"user"`, `"patient"`, `"service"`
    #[serde(rename = "type")]
    pub actor_type: String,

    /// Free-form properties attached by the identity provider
    pub properties: Map<String, Value>,
}

impl CustomClaims {
    /// Individual scope tokens
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.split_whitespace()
    }

    /// True when at least one of the caller's scopes is in `allowed`
    pub fn has_any_scope(&self, allowed: &HashSet<String>) -> bool {
        self.scopes().any(|scope| allowed.contains(scope))
    }
}

/// Caller identity used as policy input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(rename = "type")]
    pub actor_type: String,

    pub properties: Map<String, Value>,
}

impl Actor {
    pub fn new(actor_type: impl Into<String>, properties: Map<String, Value>) -> Self {
        Self {
            actor_type: actor_type.into(),
            properties,
        }
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

impl From<&CustomClaims> for Actor {
    fn from(claims: &CustomClaims) -> Self {
        Self {
            actor_type: claims.actor_type.clone(),
            properties: claims.properties.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scopes_split_on_whitespace() {
        let claims = CustomClaims {
            scope: "good:perm  ignored:perm".to_string(),
            ..Default::default()
        };

        assert_eq!(claims.scopes().collect::<Vec<_>>(), vec!["good:perm", "ignored:perm"]);
    }

    #[test]
    fn test_has_any_scope() {
        let allowed: HashSet<String> = ["good:perm".to_string()].into_iter().collect();

        let matching = CustomClaims {
            scope: "other good:perm".to_string(),
            ..Default::default()
        };
        let disjoint = CustomClaims {
            scope: "wrong:perm".to_string(),
            ..Default::default()
        };
        let empty = CustomClaims::default();

        assert!(matching.has_any_scope(&allowed));
        assert!(!disjoint.has_any_scope(&allowed));
        assert!(!empty.has_any_scope(&allowed));
    }

    #[test]
    fn test_decode_partial_payload() {
        let claims: CustomClaims = serde_json::from_value(json!({
            "scope": "read:all",
            "type": "user",
            "sub": "auth0|123",
        }))
        .expect("partial claims should decode");

        assert_eq!(claims.scope, "read:all");
        assert_eq!(claims.actor_type, "user");
        assert!(claims.email.is_empty());
        assert!(claims.properties.is_empty());
    }

    #[test]
    fn test_actor_from_claims() {
        let mut properties = Map::new();
        properties.insert("user_id".to_string(), json!(13));

        let claims = CustomClaims {
            email: "test@email.com".to_string(),
            scope: "TestScope".to_string(),
            actor_type: "user".to_string(),
            properties,
        };

        let actor = Actor::from(&claims);
        assert_eq!(actor.actor_type, "user");
        assert_eq!(actor.property("user_id"), Some(&json!(13)));
        assert_eq!(
            serde_json::to_value(&actor).unwrap(),
            json!({"type": "user", "properties": {"user_id": 13}})
        );
    }
}
