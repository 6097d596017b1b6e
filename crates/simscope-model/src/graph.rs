//! GameGraph: the root entity and its per-kind containers.
//!
//! One graph exists per installed game. It owns a `ScopeManager` for every
//! kind for its whole lifetime (the root kind's stays empty; the root lives
//! in `payload`) and is the lookup target for all parent resolution.
//! Mutation is expected to happen behind a single coarse lock owned by the
//! engine; nothing in here synchronizes on its own.

use std::collections::{BTreeSet, HashMap};

use serde_json::{json, Value};

use crate::error::{ScopeError, ScopeResult};
use crate::kind::{ScopeKind, RESTORE_ORDER};
use crate::manager::ScopeManager;
use crate::scope::{Scope, ScopeKey};
use crate::traverse::{Traverse, Viewer};

#[derive(Debug)]
pub struct GameGraph {
    slug: String,
    pk: i64,
    payload: Value,
    scopes: HashMap<ScopeKind, ScopeManager>,
    /// Runusers with a live client connection, for `online` flags.
    online_runusers: BTreeSet<i64>,
}

impl GameGraph {
    pub fn new(slug: impl Into<String>, payload: Value) -> ScopeResult<Self> {
        let pk = payload
            .get("id")
            .and_then(Value::as_i64)
            .ok_or(ScopeError::UnknownAttribute {
                kind: ScopeKind::Game,
                attr: "id".to_string(),
            })?;
        let mut scopes = HashMap::new();
        for kind in RESTORE_ORDER {
            scopes.insert(kind, ScopeManager::new(kind));
        }
        // The root kind gets a container too, so kind-keyed lookups stay
        // total; it holds nothing, the root payload lives on the graph.
        scopes.insert(ScopeKind::Game, ScopeManager::new(ScopeKind::Game));
        Ok(Self {
            slug: slug.into(),
            pk,
            payload,
            scopes,
            online_runusers: BTreeSet::new(),
        })
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub const fn pk(&self) -> i64 {
        self.pk
    }

    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: Value) {
        self.payload = payload;
    }

    pub fn manager(&self, kind: ScopeKind) -> &ScopeManager {
        &self.scopes[&kind]
    }

    pub fn manager_mut(&mut self, kind: ScopeKind) -> &mut ScopeManager {
        self.scopes
            .entry(kind)
            .or_insert_with(|| ScopeManager::new(kind))
    }

    /// Replace a whole container, used by bulk restore.
    pub fn set_manager(&mut self, manager: ScopeManager) {
        self.scopes.insert(manager.kind(), manager);
    }

    pub fn get_scope(&self, kind: ScopeKind, pk: i64) -> ScopeResult<&Scope> {
        self.manager(kind).get_pk(pk)
    }

    pub fn get_key(&self, key: ScopeKey) -> ScopeResult<&Scope> {
        self.get_scope(key.kind, key.pk)
    }

    pub fn contains(&self, kind: ScopeKind, pk: i64) -> bool {
        self.manager(kind).contains_pk(pk)
    }

    pub fn add_scope(&mut self, scope: Scope) {
        self.manager_mut(scope.kind()).add(scope);
    }

    pub fn remove_scope(&mut self, kind: ScopeKind, pk: i64) -> Option<Scope> {
        self.manager_mut(kind).remove_pk(pk)
    }

    /// Traversal view for a loaded scope.
    pub fn my<'a>(&'a self, scope: &'a Scope) -> Traverse<'a> {
        Traverse::new(self, scope)
    }

    pub fn phases(&self) -> &ScopeManager {
        self.manager(ScopeKind::Phase)
    }

    pub fn roles(&self) -> &ScopeManager {
        self.manager(ScopeKind::Role)
    }

    pub fn runs(&self) -> &ScopeManager {
        self.manager(ScopeKind::Run)
    }

    pub fn runusers(&self) -> &ScopeManager {
        self.manager(ScopeKind::RunUser)
    }

    /// The Phase currently referenced by a Run's `phase` field, if any.
    pub fn current_phase(&self, run: &Scope) -> Option<&Scope> {
        let phase_pk = run.field_i64("phase")?;
        self.phases().iter().find(|phase| phase.pk() == phase_pk)
    }

    pub fn phase_by_order(&self, order: i64) -> Option<&Scope> {
        self.phases()
            .iter()
            .find(|phase| phase.field_i64("order") == Some(order))
    }

    pub fn mark_online(&mut self, runuser_pk: i64) {
        self.online_runusers.insert(runuser_pk);
    }

    pub fn mark_offline(&mut self, runuser_pk: i64) {
        self.online_runusers.remove(&runuser_pk);
    }

    pub fn is_online(&self, runuser_pk: i64) -> bool {
        self.online_runusers.contains(&runuser_pk)
    }

    pub fn pubsub_export(&self) -> Value {
        json!({
            "pk": self.pk,
            "data": self.payload,
            "resource_name": ScopeKind::Game.as_str(),
        })
    }

    /// Every loaded scope as `kind -> {pk -> payload}`.
    pub fn list_scopes(&self) -> Value {
        let mut out = serde_json::Map::new();
        for kind in RESTORE_ORDER {
            let mut group = serde_json::Map::new();
            for scope in self.manager(kind).iter() {
                group.insert(scope.pk().to_string(), scope.payload().clone());
            }
            out.insert(kind.as_str().to_string(), Value::Object(group));
        }
        Value::Object(out)
    }

    /// Serialize a scope and its descendants, restricted to what `viewer` may
    /// see. Kinds in `exclude` keep their subtree out of the export.
    pub fn scope_tree(
        &self,
        scope: &Scope,
        exclude: &[ScopeKind],
        viewer: Option<&Viewer>,
    ) -> ScopeResult<Value> {
        let mut payload = scope.pubsub_export();
        let mut children = Vec::new();
        for &child_kind in scope.kind().child_kinds() {
            if exclude.contains(&child_kind) {
                tracing::debug!(kind = %child_kind, "scope_tree: excluding children");
                continue;
            }
            let group = self
                .manager(child_kind)
                .filter(&[(scope.kind().as_str(), json!(scope.pk()))])?;
            for child in group {
                if let Some(viewer) = viewer {
                    let visible = self.my(child).get_user_ids(viewer.leader)?;
                    if !visible.contains(&viewer.user_id) {
                        continue;
                    }
                }
                children.push(self.scope_tree(child, exclude, viewer)?);
            }
        }
        if let Value::Object(map) = &mut payload {
            map.insert("children".to_string(), Value::Array(children));
        }
        Ok(payload)
    }

    /// Serialize the game root and its subtree.
    pub fn game_tree(&self, exclude: &[ScopeKind], viewer: Option<&Viewer>) -> ScopeResult<Value> {
        let mut payload = self.pubsub_export();
        let mut children = Vec::new();
        for &child_kind in ScopeKind::Game.child_kinds() {
            if exclude.contains(&child_kind) {
                continue;
            }
            for child in self.manager(child_kind).iter() {
                if let Some(viewer) = viewer {
                    // Phases and roles are visible to everyone.
                    if !matches!(child_kind, ScopeKind::Phase | ScopeKind::Role) {
                        let visible = self.my(child).get_user_ids(viewer.leader)?;
                        if !visible.contains(&viewer.user_id) {
                            continue;
                        }
                    }
                }
                children.push(self.scope_tree(child, exclude, viewer)?);
            }
        }
        if let Value::Object(map) = &mut payload {
            map.insert("children".to_string(), Value::Array(children));
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> GameGraph {
        GameGraph::new("calc", json!({"id": 100, "slug": "calc"})).unwrap()
    }

    #[test]
    fn root_kind_lookups_answer_like_any_other_kind() {
        let graph = fresh();
        assert!(!graph.contains(ScopeKind::Game, 100));
        assert!(graph.manager(ScopeKind::Game).is_empty());

        let err = graph.get_scope(ScopeKind::Game, 100).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn every_kind_has_a_container_from_birth() {
        let mut graph = fresh();
        for kind in RESTORE_ORDER {
            assert!(graph.manager(kind).is_empty());
            assert_eq!(graph.manager_mut(kind).kind(), kind);
        }
        assert!(!graph.contains(ScopeKind::Run, 1));
        graph.add_scope(
            Scope::new(ScopeKind::Run, json!({"id": 1, "game": 100, "active": true})).unwrap(),
        );
        assert!(graph.contains(ScopeKind::Run, 1));
    }
}
