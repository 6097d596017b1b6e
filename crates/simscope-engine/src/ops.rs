//! Bus-facing operations over one game's graph.
//!
//! These are the handlers the transport layer binds under the addresses
//! the registry declares. Reads take the graph's read guard; anything that
//! writes the store does so directly (never through the read cache) and
//! lets the resulting change event bring the graph up to date, except for
//! purely local state like the online set.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::RwLock;

use simscope_model::{
    GameGraph, Scope, ScopeError, ScopeKind, ScopeResult, TopicRouter, Viewer,
};
use simscope_store::StoreCache;

use crate::error::TaggedError;
use crate::publish::{child_notifications, ChildAction, PublishMessage, Publisher};

/// The authenticated caller an operation runs for.
#[derive(Debug, Clone)]
pub struct Caller {
    pub authid: String,
    pub user_id: i64,
    pub runuser_pk: i64,
    pub leader: bool,
}

impl Caller {
    pub fn viewer(&self) -> Viewer {
        Viewer {
            user_id: self.user_id,
            leader: self.leader,
        }
    }

    /// Attach this caller to a handler failure so the transport can route
    /// it onto their error channel.
    pub fn tag(&self, err: impl Into<anyhow::Error>) -> TaggedError {
        TaggedError::for_caller(self.authid.clone(), err.into())
    }
}

pub struct GameService {
    graph: Arc<RwLock<GameGraph>>,
    /// Store handle: cached reads through the front, writes via `store()`.
    cache: Arc<StoreCache>,
    publisher: Arc<dyn Publisher>,
    router: TopicRouter,
}

impl GameService {
    pub fn new(
        graph: Arc<RwLock<GameGraph>>,
        cache: Arc<StoreCache>,
        publisher: Arc<dyn Publisher>,
        router: TopicRouter,
    ) -> Self {
        Self {
            graph,
            cache,
            publisher,
            router,
        }
    }

    pub fn graph(&self) -> Arc<RwLock<GameGraph>> {
        self.graph.clone()
    }

    // ------------------------------------------------------------------
    // Read operations
    // ------------------------------------------------------------------

    pub async fn get_scope(&self, kind: ScopeKind, pk: i64) -> ScopeResult<Value> {
        let graph = self.graph.read().await;
        Ok(graph.get_scope(kind, pk)?.pubsub_export())
    }

    pub async fn get_scope_tree(
        &self,
        kind: ScopeKind,
        pk: i64,
        exclude: &[ScopeKind],
        caller: &Caller,
    ) -> ScopeResult<Value> {
        let graph = self.graph.read().await;
        if kind.is_root() {
            return graph.game_tree(exclude, Some(&caller.viewer()));
        }
        let scope = graph.get_scope(kind, pk)?;
        graph.scope_tree(scope, exclude, Some(&caller.viewer()))
    }

    /// Runusers visible from a scope, each flagged with whether a client
    /// connection is live.
    pub async fn get_active_runusers(
        &self,
        kind: ScopeKind,
        pk: i64,
        caller: &Caller,
    ) -> ScopeResult<Vec<Value>> {
        let graph = self.graph.read().await;
        let scope = graph.get_scope(kind, pk)?;
        let runusers = graph.my(scope).get_runusers(caller.leader)?;
        Ok(runusers
            .into_iter()
            .map(|ru| {
                let mut payload = ru.payload().clone();
                if let Value::Object(map) = &mut payload {
                    map.insert("online".to_string(), Value::from(graph.is_online(ru.pk())));
                }
                json!({
                    "pk": ru.pk(),
                    "data": payload,
                    "resource_name": ScopeKind::RunUser.as_str(),
                })
            })
            .collect())
    }

    pub async fn get_phases(&self) -> Vec<Value> {
        let graph = self.graph.read().await;
        graph.phases().iter().map(|p| p.payload().clone()).collect()
    }

    pub async fn get_roles(&self) -> Vec<Value> {
        let graph = self.graph.read().await;
        graph.roles().iter().map(|r| r.payload().clone()).collect()
    }

    pub async fn list_scopes(&self) -> Value {
        self.graph.read().await.list_scopes()
    }

    /// The Run a scope belongs to and that Run's current Phase.
    pub async fn get_current_run_and_phase(
        &self,
        kind: ScopeKind,
        pk: i64,
    ) -> ScopeResult<Value> {
        let graph = self.graph.read().await;
        let scope = graph.get_scope(kind, pk)?;
        let run = graph
            .my(scope)
            .run()?
            .ok_or(ScopeError::ScopeNotFound {
                kind: ScopeKind::Run,
                pk: 0,
            })?;
        let phase = graph
            .current_phase(run)
            .map(Scope::pubsub_export)
            .unwrap_or(Value::Null);
        Ok(json!({
            "run": run.pubsub_export(),
            "phase": phase,
        }))
    }

    /// The topics a connecting user should subscribe to: their runs when
    /// they lead one, otherwise their own runuser and world branches.
    pub async fn initial_scopes(&self, authid: &str) -> (Vec<String>, bool) {
        let graph = self.graph.read().await;
        let mut leader = false;
        let mut runs = Vec::new();
        let mut runusers = Vec::new();
        let mut worlds = Vec::new();

        for ru in graph.runusers().iter() {
            if ru.field_str("email") != Some(authid) {
                continue;
            }
            if ru.field_bool("leader") == Some(true) {
                leader = true;
            }
            if leader {
                if let Some(run) = ru.field_i64("run") {
                    runs.push(run);
                }
            } else {
                runusers.push(ru.pk());
                if let Some(world) = ru.field_i64("world") {
                    worlds.push(world);
                }
            }
        }

        let mut topics = Vec::new();
        if leader {
            topics.extend(runs.iter().map(|pk| format!("model:model.run.{pk}")));
        } else {
            topics.extend(
                runusers
                    .iter()
                    .map(|pk| format!("model:model.runuser.{pk}")),
            );
            topics.extend(worlds.iter().map(|pk| format!("model:model.world.{pk}")));
        }
        (topics, leader)
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    /// A client bound to `caller`'s runuser came online.
    pub async fn connected(&self, caller: &Caller) -> ScopeResult<()> {
        let outgoing = {
            let mut graph = self.graph.write().await;
            graph.mark_online(caller.runuser_pk);
            self.online_notifications(&graph, caller.runuser_pk, true)?
        };
        self.publish_all(outgoing).await;
        Ok(())
    }

    pub async fn disconnected(&self, caller: &Caller) -> ScopeResult<()> {
        let outgoing = {
            let mut graph = self.graph.write().await;
            graph.mark_offline(caller.runuser_pk);
            self.online_notifications(&graph, caller.runuser_pk, false)?
        };
        self.publish_all(outgoing).await;
        Ok(())
    }

    fn online_notifications(
        &self,
        graph: &GameGraph,
        runuser_pk: i64,
        online: bool,
    ) -> ScopeResult<Vec<(String, PublishMessage)>> {
        let runuser = graph.get_scope(ScopeKind::RunUser, runuser_pk)?;
        let mut payload = runuser.payload().clone();
        if let Value::Object(map) = &mut payload {
            map.insert("online".to_string(), Value::from(online));
        }
        let message = PublishMessage {
            action: ChildAction::UpdateChild,
            kind: ScopeKind::RunUser,
            pk: runuser_pk,
            payload,
        };

        let mut out = Vec::new();
        if let Some(world) = graph.my(runuser).world()? {
            out.push((
                self.router.scope_topic(world, "update_child"),
                message.clone(),
            ));
        }
        if let Some(run) = graph.my(runuser).run()? {
            out.push((self.router.scope_topic(run, "update_child"), message));
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Store-writing operations
    // ------------------------------------------------------------------

    /// Persist a scope's payload, merged with `patch` and its resolved
    /// parent field. Goes straight to the store; the change event applies
    /// the result to the graph.
    pub async fn save_scope(
        &self,
        kind: ScopeKind,
        pk: i64,
        patch: Value,
    ) -> anyhow::Result<Value> {
        let payload = {
            let graph = self.graph.read().await;
            let scope = graph.get_scope(kind, pk)?;
            let mut merged = scope.payload_object();
            if let Some(parent) = scope.parent_ref() {
                merged.insert(
                    parent.kind.as_str().to_string(),
                    Value::from(parent.pk),
                );
            }
            if let Value::Object(fields) = patch {
                for (k, v) in fields {
                    merged.insert(k, v);
                }
            }
            Value::Object(merged)
        };
        Ok(self.cache.store().save(kind.endpoint(), payload).await?)
    }

    /// Create a child record under an existing parent scope.
    pub async fn create_child(
        &self,
        parent_kind: ScopeKind,
        parent_pk: i64,
        child_kind: ScopeKind,
        mut payload: Value,
    ) -> anyhow::Result<Value> {
        {
            let graph = self.graph.read().await;
            if !parent_kind.is_root() {
                graph.get_scope(parent_kind, parent_pk)?;
            }
        }
        if let Value::Object(map) = &mut payload {
            map.insert(
                parent_kind.as_str().to_string(),
                Value::from(parent_pk),
            );
        }
        Ok(self.cache.store().create(child_kind.endpoint(), payload).await?)
    }

    /// Remove a scope locally and notify interested parties. Store-side
    /// deletion is the caller's concern; this is the local half used by
    /// reconciliation-independent teardown.
    pub async fn remove_scope(&self, kind: ScopeKind, pk: i64) -> ScopeResult<()> {
        let outgoing = {
            let mut graph = self.graph.write().await;
            let scope = graph.get_scope(kind, pk)?;
            let out = child_notifications(&graph, scope, ChildAction::RemoveChild, &self.router);
            graph.remove_scope(kind, pk);
            out
        };
        self.publish_all(outgoing).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase stepping
    // ------------------------------------------------------------------

    pub async fn advance_phase(&self, run_pk: i64) -> anyhow::Result<Value> {
        self.step_phase(run_pk, 1).await
    }

    pub async fn rollback_phase(&self, run_pk: i64) -> anyhow::Result<Value> {
        self.step_phase(run_pk, -1).await
    }

    async fn step_phase(&self, run_pk: i64, delta: i64) -> anyhow::Result<Value> {
        let (payload, target_pk) = {
            let graph = self.graph.read().await;
            let run = graph.get_scope(ScopeKind::Run, run_pk)?;
            let current = graph
                .current_phase(run)
                .ok_or(ScopeError::NoMatch {
                    criteria: format!("run {run_pk} has no phase"),
                })?;
            let order = current.field_i64("order").ok_or_else(|| {
                ScopeError::UnknownAttribute {
                    kind: ScopeKind::Phase,
                    attr: "order".to_string(),
                }
            })?;
            let target = graph
                .phase_by_order(order + delta)
                .ok_or(ScopeError::NoMatch {
                    criteria: format!("no phase with order {}", order + delta),
                })?;

            let mut payload = run.payload_object();
            payload.insert("phase".to_string(), Value::from(target.pk()));
            payload.insert("game".to_string(), Value::from(graph.pk()));
            (Value::Object(payload), target.pk())
        };

        tracing::info!(run = run_pk, phase = target_pk, "stepping run phase");
        Ok(self
            .cache
            .store()
            .save(ScopeKind::Run.endpoint(), payload)
            .await?)
    }

    async fn publish_all(&self, outgoing: Vec<(String, PublishMessage)>) {
        for (topic, message) in outgoing {
            self.publisher.publish(&topic, message).await;
        }
    }
}
