//! Operation registry: which handlers each kind exposes on the bus.
//!
//! Declarations are data; the transport layer asks `routes` for the
//! concrete (uri, declaration) pairs to bind. The registry is built at
//! process start and passed by reference; there is no global table.

use std::collections::BTreeMap;

use simscope_model::{GameGraph, ScopeKind, TopicRouter};

/// How the transport should expose an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    /// Bound as a callable procedure.
    Call,
    /// Bound as a subscription handler.
    Subscribe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpDecl {
    pub name: &'static str,
    pub mode: OpMode,
    /// Whether the caller identity is disclosed to the handler.
    pub disclose: bool,
}

/// A concrete binding the transport can act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub uri: String,
    pub kind: ScopeKind,
    pub pk: Option<i64>,
    pub decl: OpDecl,
}

#[derive(Debug, Default)]
pub struct OpRegistry {
    ops: BTreeMap<ScopeKind, Vec<OpDecl>>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an operation for a kind. Duplicate names for one kind are a
    /// construction bug.
    pub fn op(mut self, kind: ScopeKind, name: &'static str, mode: OpMode) -> Self {
        self.insert(kind, OpDecl {
            name,
            mode,
            disclose: true,
        });
        self
    }

    fn insert(&mut self, kind: ScopeKind, decl: OpDecl) {
        let ops = self.ops.entry(kind).or_default();
        debug_assert!(
            ops.iter().all(|op| op.name != decl.name),
            "operation `{}` declared twice for {kind}",
            decl.name
        );
        ops.push(decl);
    }

    pub fn ops_for(&self, kind: ScopeKind) -> &[OpDecl] {
        self.ops.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The operation set every graph serves, mirroring what each kind
    /// answers for.
    pub fn standard() -> Self {
        let mut registry = Self::new()
            .op(ScopeKind::Game, "get_phases", OpMode::Call)
            .op(ScopeKind::Game, "get_roles", OpMode::Call)
            .op(ScopeKind::Game, "list_scopes", OpMode::Call)
            .op(ScopeKind::Run, "advance_phase", OpMode::Call)
            .op(ScopeKind::Run, "rollback_phase", OpMode::Call);

        for kind in [
            ScopeKind::Run,
            ScopeKind::World,
            ScopeKind::RunUser,
            ScopeKind::Scenario,
            ScopeKind::Period,
            ScopeKind::Decision,
            ScopeKind::Result,
        ] {
            registry = registry
                .op(kind, "get_scope", OpMode::Call)
                .op(kind, "get_scope_tree", OpMode::Call)
                .op(kind, "get_active_runusers", OpMode::Call)
                .op(kind, "get_current_run_and_phase", OpMode::Call)
                .op(kind, "connected", OpMode::Subscribe)
                .op(kind, "disconnected", OpMode::Subscribe);
        }
        registry
    }

    /// Concrete bindings for everything currently loaded in `graph`.
    /// Game-level ops bind once without a pk; per-scope ops bind per
    /// loaded instance.
    pub fn routes(&self, router: &TopicRouter, graph: &GameGraph) -> Vec<Route> {
        let mut routes = Vec::new();

        for decl in self.ops_for(ScopeKind::Game) {
            routes.push(Route {
                uri: router.game_topic(decl.name),
                kind: ScopeKind::Game,
                pk: None,
                decl: decl.clone(),
            });
        }

        for (&kind, decls) in &self.ops {
            if kind.is_root() {
                continue;
            }
            for scope in graph.manager(kind).iter() {
                for decl in decls {
                    routes.push(Route {
                        uri: router.scope_topic(scope, decl.name),
                        kind,
                        pk: Some(scope.pk()),
                        decl: decl.clone(),
                    });
                }
            }
        }
        routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use simscope_model::Scope;

    fn graph() -> GameGraph {
        let mut g = GameGraph::new("calc", json!({"id": 100, "slug": "calc"})).unwrap();
        g.add_scope(
            Scope::new(ScopeKind::Run, json!({"id": 1, "game": 100, "active": true})).unwrap(),
        );
        g.add_scope(Scope::new(ScopeKind::World, json!({"id": 2, "run": 1})).unwrap());
        g
    }

    #[test]
    fn standard_table_covers_phase_stepping() {
        let registry = OpRegistry::standard();
        assert!(registry
            .ops_for(ScopeKind::Run)
            .iter()
            .any(|op| op.name == "advance_phase" && op.mode == OpMode::Call));
        assert!(registry.ops_for(ScopeKind::Phase).is_empty());
    }

    #[test]
    fn routes_bind_per_loaded_scope() {
        let registry = OpRegistry::standard();
        let router = TopicRouter::new("world.simscope");
        let routes = registry.routes(&router, &graph());

        assert!(routes
            .iter()
            .any(|r| r.uri == "world.simscope.model.game.get_phases" && r.pk.is_none()));
        assert!(routes
            .iter()
            .any(|r| r.uri == "world.simscope.model.run.1.advance_phase"));
        assert!(routes
            .iter()
            .any(|r| r.uri == "world.simscope.model.world.2.get_scope_tree"));
        // Nothing binds for kinds with no loaded scopes.
        assert!(!routes
            .iter()
            .any(|r| r.kind == ScopeKind::Scenario));
    }
}
