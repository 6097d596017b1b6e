//! Outbound notification contract and interested-party fan-out.
//!
//! The transport layer is excluded; the engine hands it fully-formed
//! (topic, message) pairs through the `Publisher` trait. Fan-out targets
//! are computed synchronously under the graph lock, and the actual
//! publishes happen after the guard is dropped.

use async_trait::async_trait;
use serde_json::Value;

use simscope_model::{GameGraph, Scope, ScopeKind, TopicRouter};

/// Child-entity notification verbs, named as clients see them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildAction {
    AddChild,
    RemoveChild,
    UpdateChild,
}

impl ChildAction {
    pub const fn event_name(self) -> &'static str {
        match self {
            ChildAction::AddChild => "add_child",
            ChildAction::RemoveChild => "remove_child",
            ChildAction::UpdateChild => "update_child",
        }
    }
}

/// One outbound message: which child changed, how, and its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishMessage {
    pub action: ChildAction,
    pub kind: ScopeKind,
    pub pk: i64,
    pub payload: Value,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, message: PublishMessage);
}

/// Computes the (topic, message) pairs announcing a change to `scope`.
///
/// Targets are the scope's owning World (if any) and every runuser with
/// visibility. Run updates additionally land on each of the Run's World
/// topics so world subscribers learn when their run closes. Unresolvable
/// parents are logged and skipped; a half-linked scope still notifies
/// whoever can be found.
pub fn child_notifications(
    graph: &GameGraph,
    scope: &Scope,
    action: ChildAction,
    router: &TopicRouter,
) -> Vec<(String, PublishMessage)> {
    let message = PublishMessage {
        action,
        kind: scope.kind(),
        pk: scope.pk(),
        payload: scope.payload().clone(),
    };
    let mut out = Vec::new();

    match graph.my(scope).world() {
        Ok(Some(world)) => {
            out.push((
                router.scope_topic(world, action.event_name()),
                message.clone(),
            ));
        }
        Ok(None) => {}
        Err(err) => {
            tracing::debug!(scope = %scope, %err, "world unresolved during fan-out");
        }
    }

    match graph.my(scope).runusers() {
        Ok(runusers) => {
            for runuser in runusers {
                out.push((
                    router.scope_topic(runuser, action.event_name()),
                    message.clone(),
                ));
            }
        }
        Err(err) => {
            tracing::debug!(scope = %scope, %err, "runusers unresolved during fan-out");
        }
    }

    if action == ChildAction::UpdateChild && scope.kind() == ScopeKind::Run {
        if let Ok(worlds) = graph
            .manager(ScopeKind::World)
            .filter(&[("run", Value::from(scope.pk()))])
        {
            for world in worlds {
                out.push((
                    router.scope_topic(world, action.event_name()),
                    message.clone(),
                ));
            }
        }
    }

    out
}

/// Test publisher that records everything it is handed.
#[derive(Default)]
pub struct RecordingPublisher {
    published: parking_lot::Mutex<Vec<(String, PublishMessage)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<(String, PublishMessage)> {
        std::mem::take(&mut self.published.lock())
    }

    pub fn topics(&self) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.published.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.lock().is_empty()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, message: PublishMessage) {
        self.published.lock().push((topic.to_string(), message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph() -> GameGraph {
        let mut g = GameGraph::new("calc", json!({"id": 100, "slug": "calc"})).unwrap();
        for (kind, payload) in [
            (ScopeKind::Run, json!({"id": 1, "game": 100, "active": true})),
            (ScopeKind::World, json!({"id": 2, "run": 1})),
            (
                ScopeKind::RunUser,
                json!({"id": 5, "run": 1, "world": 2, "user": 50, "leader": false}),
            ),
            (
                ScopeKind::Scenario,
                json!({"id": 20, "world": 2, "runuser": null}),
            ),
        ] {
            g.add_scope(Scope::new(kind, payload).unwrap());
        }
        g
    }

    #[test]
    fn scenario_update_lands_on_world_and_runusers() {
        let g = graph();
        let router = TopicRouter::new("world.simscope");
        let scenario = g.get_scope(ScopeKind::Scenario, 20).unwrap();

        let out = child_notifications(&g, scenario, ChildAction::UpdateChild, &router);
        let topics: Vec<&str> = out.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(
            topics,
            vec![
                "world.simscope.model.world.2.update_child",
                "world.simscope.model.runuser.5.update_child",
            ]
        );
        assert!(out.iter().all(|(_, m)| m.pk == 20));
    }

    #[test]
    fn run_update_propagates_to_its_worlds() {
        let g = graph();
        let router = TopicRouter::new("world.simscope");
        let run = g.get_scope(ScopeKind::Run, 1).unwrap();

        let out = child_notifications(&g, run, ChildAction::UpdateChild, &router);
        let topics: Vec<&str> = out.iter().map(|(t, _)| t.as_str()).collect();
        // Runuser 5 and world 2, with the run payload.
        assert!(topics.contains(&"world.simscope.model.runuser.5.update_child"));
        assert!(topics.contains(&"world.simscope.model.world.2.update_child"));
    }

    #[test]
    fn orphaned_scope_skips_unresolvable_targets() {
        let mut g = graph();
        g.add_scope(
            Scope::new(ScopeKind::Period, json!({"id": 40, "scenario": 999})).unwrap(),
        );
        let router = TopicRouter::new("world.simscope");
        let orphan = g.get_scope(ScopeKind::Period, 40).unwrap();

        let out = child_notifications(&g, orphan, ChildAction::RemoveChild, &router);
        assert!(out.is_empty());
    }
}
