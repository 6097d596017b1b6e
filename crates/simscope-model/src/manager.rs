//! ScopeManager: a typed, insertion-ordered container with secondary indexes.
//!
//! One manager holds every loaded scope of a single kind, keyed by pk. For
//! each index attribute declared by the kind (see `ScopeKind::index_fields`)
//! it maintains a map from index value to the set of matching pks, so the
//! common single-attribute filters (`run=<pk>`, `world=<pk>`, …) resolve
//! without scanning. Managers are the single source of truth for what
//! currently exists; derived relationships are recomputed against them.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::error::{ScopeError, ScopeResult};
use crate::kind::ScopeKind;
use crate::scope::Scope;

/// Hashable projection of a JSON index value. Index attributes are pks,
/// slugs or nulls; anything else is indexed by its canonical string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<&Value> for IndexValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Str(n.to_string()),
            },
            Value::String(s) => Self::Str(s.clone()),
            other => Self::Str(other.to_string()),
        }
    }
}

fn criteria_string(criteria: &[(&str, Value)]) -> String {
    let parts: Vec<String> = criteria
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

#[derive(Debug)]
pub struct ScopeManager {
    kind: ScopeKind,
    /// Insertion order of pks.
    order: Vec<i64>,
    scopes: HashMap<i64, Scope>,
    /// index attribute -> index value -> pks.
    indexes: HashMap<&'static str, HashMap<IndexValue, BTreeSet<i64>>>,
}

impl ScopeManager {
    pub fn new(kind: ScopeKind) -> Self {
        let mut indexes = HashMap::new();
        for &attr in kind.index_fields() {
            indexes.insert(attr, HashMap::new());
        }
        Self {
            kind,
            order: Vec::new(),
            scopes: HashMap::new(),
            indexes,
        }
    }

    pub fn from_scopes(kind: ScopeKind, scopes: impl IntoIterator<Item = Scope>) -> Self {
        let mut manager = Self::new(kind);
        for scope in scopes {
            manager.add(scope);
        }
        manager
    }

    pub const fn kind(&self) -> ScopeKind {
        self.kind
    }

    fn index_value(scope: &Scope, attr: &str) -> IndexValue {
        scope.field(attr).map_or(IndexValue::Null, IndexValue::from)
    }

    /// Insert a scope, replacing any previous entry with the same pk and
    /// keeping every declared secondary index in sync.
    pub fn add(&mut self, scope: Scope) {
        debug_assert_eq!(scope.kind(), self.kind);
        let pk = scope.pk();
        if self.scopes.contains_key(&pk) {
            self.remove_pk(pk);
        }
        for (&attr, index) in &mut self.indexes {
            index
                .entry(Self::index_value(&scope, attr))
                .or_default()
                .insert(pk);
        }
        self.order.push(pk);
        self.scopes.insert(pk, scope);
    }

    /// Remove by pk, returning the scope when it was present.
    pub fn remove_pk(&mut self, pk: i64) -> Option<Scope> {
        let scope = self.scopes.remove(&pk)?;
        self.order.retain(|&p| p != pk);
        for (&attr, index) in &mut self.indexes {
            let value = Self::index_value(&scope, attr);
            if let Some(set) = index.get_mut(&value) {
                set.remove(&pk);
                if set.is_empty() {
                    index.remove(&value);
                }
            }
        }
        Some(scope)
    }

    pub fn remove(&mut self, scope: &Scope) -> Option<Scope> {
        self.remove_pk(scope.pk())
    }

    /// Drop every scope and index entry.
    pub fn reset(&mut self) {
        self.order.clear();
        self.scopes.clear();
        for index in self.indexes.values_mut() {
            index.clear();
        }
    }

    pub fn get_pk(&self, pk: i64) -> ScopeResult<&Scope> {
        self.scopes.get(&pk).ok_or(ScopeError::ScopeNotFound {
            kind: self.kind,
            pk,
        })
    }

    pub fn get_pk_mut(&mut self, pk: i64) -> ScopeResult<&mut Scope> {
        self.scopes.get_mut(&pk).ok_or(ScopeError::ScopeNotFound {
            kind: self.kind,
            pk,
        })
    }

    fn matches(scope: &Scope, criteria: &[(&str, Value)]) -> ScopeResult<bool> {
        for (attr, expected) in criteria {
            let actual = scope.field(attr).ok_or_else(|| ScopeError::UnknownAttribute {
                kind: scope.kind(),
                attr: (*attr).to_string(),
            })?;
            if actual != expected {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Scopes matching every criterion, in insertion order. A single
    /// criterion on a declared index attribute resolves through the index;
    /// anything else scans. A criterion naming an attribute absent from a
    /// payload is a schema mismatch and raises `UnknownAttribute`.
    pub fn filter(&self, criteria: &[(&str, Value)]) -> ScopeResult<Vec<&Scope>> {
        if let [(attr, value)] = criteria {
            if let Some(index) = self.indexes.get(attr) {
                let pks = index.get(&IndexValue::from(value));
                return Ok(self
                    .order
                    .iter()
                    .filter(|pk| pks.is_some_and(|set| set.contains(pk)))
                    .map(|pk| &self.scopes[pk])
                    .collect());
            }
        }

        let mut found = Vec::new();
        for pk in &self.order {
            let scope = &self.scopes[pk];
            if Self::matches(scope, criteria)? {
                found.push(scope);
            }
        }
        Ok(found)
    }

    /// `filter` constrained to exactly one result.
    pub fn get(&self, criteria: &[(&str, Value)]) -> ScopeResult<&Scope> {
        if let [(attr, value)] = criteria {
            if *attr == "id" {
                let pk = value.as_i64().unwrap_or(-1);
                return self.get_pk(pk);
            }
        }

        let found = self.filter(criteria)?;
        match found.len() {
            0 => Err(ScopeError::NoMatch {
                criteria: criteria_string(criteria),
            }),
            1 => Ok(found[0]),
            _ => Err(ScopeError::MultipleScopesFound {
                criteria: criteria_string(criteria),
            }),
        }
    }

    pub fn contains_pk(&self, pk: i64) -> bool {
        self.scopes.contains_key(&pk)
    }

    pub fn contains(&self, scope: &Scope) -> bool {
        self.contains_pk(scope.pk())
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Scope> {
        self.order.iter().map(|pk| &self.scopes[pk])
    }

    pub fn pks(&self) -> Vec<i64> {
        self.order.clone()
    }

    pub fn last(&self) -> ScopeResult<&Scope> {
        self.order
            .last()
            .map(|pk| &self.scopes[pk])
            .ok_or(ScopeError::NoMatch {
                criteria: "last()".to_string(),
            })
    }
}

/// Union: scopes from `rhs` are appended, overriding same-pk entries.
impl std::ops::Add for ScopeManager {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        debug_assert_eq!(self.kind, rhs.kind);
        let mut rhs = rhs;
        for pk in std::mem::take(&mut rhs.order) {
            if let Some(scope) = rhs.scopes.remove(&pk) {
                // Inside this impl `self.add(..)` would resolve to the
                // by-value trait method, so name the inherent one.
                ScopeManager::add(&mut self, scope);
            }
        }
        self
    }
}

/// Owned iteration in insertion order.
impl IntoIterator for ScopeManager {
    type Item = Scope;
    type IntoIter = std::vec::IntoIter<Scope>;

    fn into_iter(mut self) -> Self::IntoIter {
        let scopes: Vec<Scope> = std::mem::take(&mut self.order)
            .into_iter()
            .filter_map(|pk| self.scopes.remove(&pk))
            .collect();
        scopes.into_iter()
    }
}

/// Equality against a plain ordered pk sequence.
impl PartialEq<Vec<i64>> for ScopeManager {
    fn eq(&self, other: &Vec<i64>) -> bool {
        self.order == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn period(pk: i64, scenario: i64) -> Scope {
        Scope::new(ScopeKind::Period, json!({"id": pk, "scenario": scenario})).unwrap()
    }

    fn runuser(pk: i64, run: i64, world: Value) -> Scope {
        Scope::new(
            ScopeKind::RunUser,
            json!({"id": pk, "run": run, "world": world, "leader": false}),
        )
        .unwrap()
    }

    fn manager_of_periods(n: i64) -> ScopeManager {
        ScopeManager::from_scopes(ScopeKind::Period, (0..n).map(|i| period(i, 1)))
    }

    #[test]
    fn iterates_in_insertion_order() {
        let manager = manager_of_periods(5);
        assert_eq!(manager.pks(), vec![0, 1, 2, 3, 4]);
        assert_eq!(manager.last().unwrap().pk(), 4);
        assert_eq!(manager, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn filter_uses_declared_index() {
        let mut manager = ScopeManager::new(ScopeKind::RunUser);
        manager.add(runuser(1, 10, Value::Null));
        manager.add(runuser(2, 10, json!(7)));
        manager.add(runuser(3, 11, json!(7)));

        let by_run: Vec<i64> = manager
            .filter(&[("run", json!(10))])
            .unwrap()
            .iter()
            .map(|s| s.pk())
            .collect();
        assert_eq!(by_run, vec![1, 2]);

        let by_world: Vec<i64> = manager
            .filter(&[("world", json!(7))])
            .unwrap()
            .iter()
            .map(|s| s.pk())
            .collect();
        assert_eq!(by_world, vec![2, 3]);

        let unassigned = manager.filter(&[("world", Value::Null)]).unwrap();
        assert_eq!(unassigned.len(), 1);
        assert_eq!(unassigned[0].pk(), 1);
    }

    #[test]
    fn multi_criteria_scan() {
        let mut manager = ScopeManager::new(ScopeKind::RunUser);
        manager.add(runuser(1, 10, json!(7)));
        manager.add(runuser(2, 10, json!(8)));

        let found = manager
            .filter(&[("run", json!(10)), ("world", json!(8))])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pk(), 2);
    }

    #[test]
    fn unknown_attribute_is_an_error_not_empty() {
        let manager = manager_of_periods(2);
        let err = manager.filter(&[("nonexistent", json!(1))]).unwrap_err();
        assert!(matches!(err, ScopeError::UnknownAttribute { .. }));
    }

    #[test]
    fn get_enforces_uniqueness() {
        let mut manager = ScopeManager::new(ScopeKind::RunUser);
        manager.add(runuser(1, 10, Value::Null));
        manager.add(runuser(2, 10, Value::Null));

        assert!(matches!(
            manager.get(&[("run", json!(10))]),
            Err(ScopeError::MultipleScopesFound { .. })
        ));
        assert!(matches!(
            manager.get(&[("run", json!(99))]),
            Err(ScopeError::NoMatch { .. })
        ));
        assert_eq!(manager.get(&[("id", json!(2))]).unwrap().pk(), 2);
    }

    #[test]
    fn remove_maintains_indexes() {
        let mut manager = ScopeManager::new(ScopeKind::RunUser);
        let scope = runuser(1, 10, json!(7));
        manager.add(scope);
        let removed = manager.remove_pk(1).unwrap();
        assert_eq!(removed.pk(), 1);
        assert!(manager.filter(&[("world", json!(7))]).unwrap().is_empty());
        assert!(manager.is_empty());
    }

    #[test]
    fn reindex_by_remove_then_add() {
        let mut manager = ScopeManager::new(ScopeKind::RunUser);
        manager.add(runuser(5, 1, Value::Null));

        // The engine's changed-path: pull the scope, swap the payload, re-add.
        let mut scope = manager.remove_pk(5).unwrap();
        scope.replace_payload(json!({"id": 5, "run": 1, "world": 2, "leader": false}));
        manager.add(scope);

        assert!(manager.filter(&[("world", Value::Null)]).unwrap().is_empty());
        let found = manager.filter(&[("world", json!(2))]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pk(), 5);
    }

    #[test]
    fn union_appends_and_overrides() {
        let a = ScopeManager::from_scopes(ScopeKind::Period, (0..2).map(|i| period(i, 1)));
        let b = ScopeManager::from_scopes(ScopeKind::Period, (3..6).map(|i| period(i, 1)));
        let total = a + b;
        assert_eq!(total.len(), 5);
        assert_eq!(total, vec![0, 1, 3, 4, 5]);

        // Same-pk entries from the right side win and get re-indexed.
        let a = ScopeManager::from_scopes(ScopeKind::Period, [period(0, 1), period(1, 1)]);
        let b = ScopeManager::from_scopes(ScopeKind::Period, [period(1, 2)]);
        let total = a + b;
        assert_eq!(total.len(), 2);
        assert_eq!(total.get_pk(1).unwrap().field_i64("scenario"), Some(2));
        let hits = total.filter(&[("scenario", json!(2))]).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pk(), 1);
    }

    proptest! {
        /// After any add/remove sequence, every resident scope is reachable
        /// through each of its declared index attributes.
        #[test]
        fn indexes_stay_consistent(ops in proptest::collection::vec((0i64..20, 0i64..5, prop::bool::ANY), 1..60)) {
            let mut manager = ScopeManager::new(ScopeKind::RunUser);
            for (pk, run, insert) in ops {
                if insert {
                    manager.add(runuser(pk, run, Value::Null));
                } else {
                    manager.remove_pk(pk);
                }
            }
            for scope in manager.iter().collect::<Vec<_>>() {
                let run = scope.field("run").unwrap().clone();
                let hits = manager.filter(&[("run", run)]).unwrap();
                prop_assert!(hits.iter().any(|s| s.pk() == scope.pk()));
            }
        }
    }
}
