//! A single scope (entity) instance.
//!
//! Scopes hold their identity and a JSON payload mirroring the remote store's
//! fields. They never hold references to other scopes: relationships are
//! expressed through parent-reference payload fields and resolved with a
//! container lookup, which avoids ownership cycles and dangling references
//! when the referent has not been loaded yet.

use std::fmt;
use std::sync::OnceLock;

use serde_json::{json, Map, Value};

use crate::error::{ScopeError, ScopeResult};
use crate::kind::ScopeKind;

/// Identity of a scope: two scopes are the same entity iff both kind and pk
/// match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey {
    pub kind: ScopeKind,
    pub pk: i64,
}

impl ScopeKey {
    pub const fn new(kind: ScopeKind, pk: i64) -> Self {
        Self { kind, pk }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.pk)
    }
}

#[derive(Debug)]
pub struct Scope {
    kind: ScopeKind,
    pk: i64,
    payload: Value,
    /// Resolved parent identity, memoized for the lifetime of this payload.
    parent_memo: OnceLock<ScopeKey>,
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.pk == other.pk
    }
}

impl Eq for Scope {}

impl std::hash::Hash for Scope {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.pk.hash(state);
    }
}

impl Scope {
    /// Build a scope from a remote-store payload. The payload must carry the
    /// store's `id` field.
    pub fn new(kind: ScopeKind, payload: Value) -> ScopeResult<Self> {
        let pk = payload
            .get("id")
            .and_then(Value::as_i64)
            .ok_or(ScopeError::UnknownAttribute {
                kind,
                attr: "id".to_string(),
            })?;
        Ok(Self {
            kind,
            pk,
            payload,
            parent_memo: OnceLock::new(),
        })
    }

    pub const fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub const fn pk(&self) -> i64 {
        self.pk
    }

    pub const fn key(&self) -> ScopeKey {
        ScopeKey::new(self.kind, self.pk)
    }

    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Replace the payload, keeping the identity. The parent memo is reset
    /// since a changed payload may name a different parent.
    pub fn replace_payload(&mut self, payload: Value) {
        self.payload = payload;
        self.parent_memo = OnceLock::new();
    }

    /// Patch a single payload field in place (used for denormalized user
    /// fields, which never affect tree structure).
    pub fn set_field(&mut self, name: &str, value: Value) {
        if let Value::Object(map) = &mut self.payload {
            map.insert(name.to_string(), value);
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    pub fn field_i64(&self, name: &str) -> Option<i64> {
        self.payload.get(name).and_then(Value::as_i64)
    }

    pub fn field_bool(&self, name: &str) -> Option<bool> {
        self.payload.get(name).and_then(Value::as_bool)
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }

    /// The first non-null parent-reference field, memoized. `None` for the
    /// root kind or when every candidate field is still null.
    pub fn parent_ref(&self) -> Option<ScopeKey> {
        if let Some(&key) = self.parent_memo.get() {
            return Some(key);
        }
        for &parent_kind in self.kind.parent_fields() {
            if let Some(pk) = self.field_i64(parent_kind.as_str()) {
                let key = ScopeKey::new(parent_kind, pk);
                let _ = self.parent_memo.set(key);
                return Some(key);
            }
        }
        None
    }

    /// Serialized form transmitted over pubsub and consumed by clients.
    pub fn pubsub_export(&self) -> Value {
        json!({
            "pk": self.pk,
            "data": self.payload,
            "resource_name": self.kind.as_str(),
        })
    }

    /// The payload as an object map, or an empty map for malformed payloads.
    pub fn payload_object(&self) -> Map<String, Value> {
        match &self.payload {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Scope {} pk: {}>", self.kind, self.pk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(world: Value, runuser: Value) -> Scope {
        Scope::new(
            ScopeKind::Scenario,
            json!({"id": 9, "world": world, "runuser": runuser}),
        )
        .unwrap()
    }

    #[test]
    fn equality_is_kind_and_pk() {
        let a = Scope::new(ScopeKind::Run, json!({"id": 1, "active": true})).unwrap();
        let b = Scope::new(ScopeKind::Run, json!({"id": 1, "active": false})).unwrap();
        let c = Scope::new(ScopeKind::World, json!({"id": 1})).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn parent_ref_tries_candidates_in_order() {
        let under_world = scenario(json!(4), Value::Null);
        assert_eq!(
            under_world.parent_ref(),
            Some(ScopeKey::new(ScopeKind::World, 4))
        );

        let under_runuser = scenario(Value::Null, json!(7));
        assert_eq!(
            under_runuser.parent_ref(),
            Some(ScopeKey::new(ScopeKind::RunUser, 7))
        );

        let orphan = scenario(Value::Null, Value::Null);
        assert_eq!(orphan.parent_ref(), None);
    }

    #[test]
    fn replace_payload_invalidates_parent_memo() {
        let mut s = scenario(json!(4), Value::Null);
        assert_eq!(s.parent_ref().unwrap().kind, ScopeKind::World);

        s.replace_payload(json!({"id": 9, "world": null, "runuser": 7}));
        assert_eq!(s.parent_ref(), Some(ScopeKey::new(ScopeKind::RunUser, 7)));
    }

    #[test]
    fn missing_id_is_a_schema_error() {
        let err = Scope::new(ScopeKind::Run, json!({"active": true})).unwrap_err();
        assert!(matches!(err, ScopeError::UnknownAttribute { .. }));
    }
}
