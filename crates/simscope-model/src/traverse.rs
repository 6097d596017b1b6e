//! Cross-entity traversal: parent, owning run, owning world, visibility.
//!
//! All derived relationships are recomputed against the live containers on
//! each call, except the parent reference which each scope memoizes for the
//! lifetime of its payload. The visibility rules:
//!
//! - a leader runuser sees its whole Run;
//! - a non-leader runuser sees its own World branch, or just its own
//!   Scenario branch when no World is assigned;
//! - phases and roles are visible to everyone and belong to no run.

use serde_json::json;

use crate::error::{ScopeError, ScopeResult};
use crate::graph::GameGraph;
use crate::kind::ScopeKind;
use crate::scope::{Scope, ScopeKey};

/// The caller on whose behalf a visibility query runs.
#[derive(Debug, Clone, Copy)]
pub struct Viewer {
    /// Remote-store user id (not a runuser pk).
    pub user_id: i64,
    pub leader: bool,
}

/// A scope's resolved parent: either the game root or another scope.
#[derive(Debug)]
pub enum Parent<'a> {
    Game(&'a GameGraph),
    Scope(&'a Scope),
}

/// Borrowed traversal view over one scope within its graph.
pub struct Traverse<'a> {
    graph: &'a GameGraph,
    scope: &'a Scope,
}

impl<'a> Traverse<'a> {
    pub fn new(graph: &'a GameGraph, scope: &'a Scope) -> Self {
        Self { graph, scope }
    }

    /// Resolve the parent through the scope's parent-reference field. Fails
    /// with `ParentScopeNotFound` while the parent's own creation has not
    /// reached the graph yet.
    pub fn parent(&self) -> ScopeResult<Parent<'a>> {
        let candidates = self.scope.kind().parent_fields();
        if candidates == [ScopeKind::Game] {
            return Ok(Parent::Game(self.graph));
        }

        let key = self
            .scope
            .parent_ref()
            .ok_or_else(|| self.parent_not_found(candidates[0], 0))?;
        match self.graph.get_key(key) {
            Ok(scope) => Ok(Parent::Scope(scope)),
            Err(_) => Err(self.parent_not_found(key.kind, key.pk)),
        }
    }

    fn parent_not_found(&self, parent_kind: ScopeKind, parent_pk: i64) -> ScopeError {
        ScopeError::ParentScopeNotFound {
            parent_kind,
            parent_pk,
            kind: self.scope.kind(),
            pk: self.scope.pk(),
        }
    }

    /// The Run this scope lives under, or `None` for game-global kinds.
    /// A Scenario parented by a RunUser reaches its Run through that
    /// runuser's own `run` field.
    pub fn run(&self) -> ScopeResult<Option<&'a Scope>> {
        match self.scope.kind() {
            ScopeKind::Game | ScopeKind::Phase | ScopeKind::Role => return Ok(None),
            ScopeKind::Run => return Ok(Some(self.scope)),
            _ => {}
        }

        let mut current = self.scope;
        loop {
            match Traverse::new(self.graph, current).parent()? {
                Parent::Game(_) => return Ok(None),
                Parent::Scope(parent) => {
                    if parent.kind() == ScopeKind::Run {
                        return Ok(Some(parent));
                    }
                    current = parent;
                }
            }
        }
    }

    /// The nearest World ancestor, or `None` when the branch never passes
    /// through one (runuser-parented scenarios and their descendants).
    pub fn world(&self) -> ScopeResult<Option<&'a Scope>> {
        match self.scope.kind() {
            ScopeKind::Game | ScopeKind::Run | ScopeKind::Phase | ScopeKind::Role => {
                return Ok(None)
            }
            ScopeKind::World => return Ok(Some(self.scope)),
            ScopeKind::RunUser | ScopeKind::Scenario => {
                return match self.scope.field_i64("world") {
                    Some(pk) => Ok(Some(self.graph.get_scope(ScopeKind::World, pk)?)),
                    None => Ok(None),
                };
            }
            _ => {}
        }

        let mut current = self.scope;
        loop {
            match Traverse::new(self.graph, current).parent()? {
                Parent::Game(_) => return Ok(None),
                Parent::Scope(parent) => match parent.kind() {
                    ScopeKind::World => return Ok(Some(parent)),
                    // Walked past the scenario level without meeting a World.
                    ScopeKind::Run => return Ok(None),
                    ScopeKind::Scenario => {
                        return Traverse::new(self.graph, parent).world();
                    }
                    _ => current = parent,
                },
            }
        }
    }

    /// The runusers that must be notified of changes to this scope (the
    /// "interested parties"). A World branch notifies the World's own
    /// runusers; a bare runuser-parented branch notifies just that runuser.
    pub fn runusers(&self) -> ScopeResult<Vec<&'a Scope>> {
        let runusers = self.graph.runusers();
        match self.scope.kind() {
            ScopeKind::Game => Ok(runusers.iter().collect()),
            ScopeKind::Run => runusers.filter(&[("run", json!(self.scope.pk()))]),
            ScopeKind::RunUser | ScopeKind::World => {
                let run = self.run()?.ok_or_else(|| {
                    self.parent_not_found(ScopeKind::Run, self.scope.field_i64("run").unwrap_or(0))
                })?;
                runusers.filter(&[("run", json!(run.pk()))])
            }
            ScopeKind::Scenario => self.branch_runusers(self.scope),
            ScopeKind::Period => match self.parent()? {
                Parent::Scope(scenario) => self.branch_runusers(scenario),
                Parent::Game(_) => Ok(Vec::new()),
            },
            ScopeKind::Decision | ScopeKind::Result => match self.parent()? {
                Parent::Scope(period) => {
                    match Traverse::new(self.graph, period).parent()? {
                        Parent::Scope(scenario) => self.branch_runusers(scenario),
                        Parent::Game(_) => Ok(Vec::new()),
                    }
                }
                Parent::Game(_) => Ok(Vec::new()),
            },
            ScopeKind::Phase | ScopeKind::Role => Ok(Vec::new()),
        }
    }

    /// Interested runusers for a scenario branch: the World's assigned
    /// runusers, or only the owning runuser when no World is set.
    fn branch_runusers(&self, scenario: &Scope) -> ScopeResult<Vec<&'a Scope>> {
        match scenario.field_i64("world") {
            Some(world_pk) => self
                .graph
                .runusers()
                .filter(&[("world", json!(world_pk))]),
            None => {
                let runuser_pk =
                    scenario
                        .field_i64("runuser")
                        .ok_or(ScopeError::UnknownAttribute {
                            kind: scenario.kind(),
                            attr: "runuser".to_string(),
                        })?;
                Ok(vec![self.graph.get_scope(ScopeKind::RunUser, runuser_pk)?])
            }
        }
    }

    /// Runusers with access to this scope. For a World, `leader` widens the
    /// set from the World's assigned runusers to all runusers of its Run.
    pub fn get_runusers(&self, leader: bool) -> ScopeResult<Vec<&'a Scope>> {
        let runusers = self.graph.runusers();
        match self.scope.kind() {
            ScopeKind::Game => Ok(runusers.iter().collect()),
            ScopeKind::Run => runusers.filter(&[("run", json!(self.scope.pk()))]),
            ScopeKind::RunUser => Ok(vec![self.scope]),
            ScopeKind::World => {
                if leader {
                    let run_pk =
                        self.scope
                            .field_i64("run")
                            .ok_or(ScopeError::UnknownAttribute {
                                kind: ScopeKind::World,
                                attr: "run".to_string(),
                            })?;
                    runusers.filter(&[("run", json!(run_pk))])
                } else {
                    runusers.filter(&[("world", json!(self.scope.pk()))])
                }
            }
            ScopeKind::Phase | ScopeKind::Role => Ok(Vec::new()),
            _ => {
                if let Some(world) = self.world()? {
                    Traverse::new(self.graph, world).get_runusers(leader)
                } else if let Some(run) = self.run()? {
                    Traverse::new(self.graph, run).get_runusers(leader)
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    /// Store-level user ids (not runuser pks) with access to this scope.
    pub fn get_user_ids(&self, leader: bool) -> ScopeResult<Vec<i64>> {
        let runusers = self.get_runusers(leader)?;
        Ok(runusers
            .iter()
            .filter_map(|ru| ru.field_i64("user"))
            .collect())
    }

    pub fn key(&self) -> ScopeKey {
        self.scope.key()
    }
}
