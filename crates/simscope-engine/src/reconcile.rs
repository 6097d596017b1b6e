//! Reconciliation engine: applies remote change events to the graph.
//!
//! The transport guarantees nothing about ordering or dedup, so every
//! handler is idempotent: unknown entities and unresolvable parents are
//! logged at debug and dropped, with bulk restore as the recovery path.
//! `MultipleScopesFound` is never caught here; it signals an index bug and
//! is allowed to abort the event.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use simscope_model::{GameGraph, Scope, ScopeError, ScopeKind, TopicRouter};
use simscope_store::RemoteStore;

use crate::publish::{child_notifications, ChildAction, PublishMessage, Publisher};
use crate::restore;

// ============================================================================
// Events and the change log
// ============================================================================

/// A remote change notification: `<prefix>.<kind>.<action>` plus the
/// changed record's payload.
#[derive(Debug, Clone)]
pub struct ScopeEvent {
    pub event: String,
    pub data: Value,
}

impl ScopeEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Accepts the wire form `{event, data, ref}`.
    pub fn from_wire(value: &Value) -> Option<Self> {
        Some(Self {
            event: value.get("event")?.as_str()?.to_string(),
            data: value.get("data")?.clone(),
        })
    }

    /// (kind segment, action segment). The prefix before them, if any, is
    /// the game slug and is not needed for routing.
    fn split(&self) -> Option<(&str, EventAction)> {
        let mut segments = self.event.rsplit('.');
        let action = segments.next()?.parse().ok()?;
        let kind = segments.next()?;
        Some((kind, action))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventAction {
    Created,
    Changed,
    Deleted,
}

impl std::str::FromStr for EventAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(EventAction::Created),
            "changed" => Ok(EventAction::Changed),
            "deleted" => Ok(EventAction::Deleted),
            _ => Err(()),
        }
    }
}

/// Outcome of one dispatched event, kept for inspection.
#[derive(Debug, Clone)]
pub struct Change {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub status: ChangeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeStatus {
    Applied,
    Dropped { reason: String },
}

// ============================================================================
// Reconciler
// ============================================================================

pub struct Reconciler {
    graph: Arc<RwLock<GameGraph>>,
    store: Arc<dyn RemoteStore>,
    publisher: Arc<dyn Publisher>,
    router: TopicRouter,
    changes: Mutex<Vec<Change>>,
    /// Runs with a subtree restore in flight; concurrent reactivation
    /// events for these are dropped instead of racing the restore.
    restoring_runs: Mutex<HashSet<i64>>,
}

impl Reconciler {
    pub fn new(
        graph: Arc<RwLock<GameGraph>>,
        store: Arc<dyn RemoteStore>,
        publisher: Arc<dyn Publisher>,
        router: TopicRouter,
    ) -> Self {
        Self {
            graph,
            store,
            publisher,
            router,
            changes: Mutex::new(Vec::new()),
            restoring_runs: Mutex::new(HashSet::new()),
        }
    }

    pub fn changes(&self) -> Vec<Change> {
        self.changes.lock().clone()
    }

    fn record(&self, event: &ScopeEvent, status: ChangeStatus) {
        self.changes.lock().push(Change {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event: event.event.clone(),
            status,
        });
    }

    fn applied(&self, event: &ScopeEvent) {
        self.record(event, ChangeStatus::Applied);
    }

    fn dropped(&self, event: &ScopeEvent, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::debug!(event = %event.event, reason, "event dropped");
        self.record(event, ChangeStatus::Dropped { reason });
    }

    /// Apply one remote event. `ScopeNotFound`/`ParentScopeNotFound` never
    /// escape; anything else aborts the event and reaches the caller.
    pub async fn dispatch(&self, event: ScopeEvent) -> anyhow::Result<()> {
        let Some((kind_str, action)) = event.split() else {
            self.dropped(&event, "unparseable event name");
            return Ok(());
        };

        match kind_str {
            "user" => self.apply_user(&event, action).await,
            "game" => {
                self.apply_game(&event, action).await;
                Ok(())
            }
            _ => {
                let Ok(kind) = kind_str.parse::<ScopeKind>() else {
                    self.dropped(&event, format!("unknown kind `{kind_str}`"));
                    return Ok(());
                };
                self.apply_scope(&event, kind, action).await
            }
        }
    }

    // ------------------------------------------------------------------
    // Root and user events
    // ------------------------------------------------------------------

    async fn apply_game(&self, event: &ScopeEvent, action: EventAction) {
        match action {
            EventAction::Deleted => {
                let slug = self.graph.read().await.slug().to_string();
                tracing::error!(
                    slug,
                    "game deletion observed; restart the engine for this game"
                );
                self.dropped(event, "game deletion ignored");
            }
            EventAction::Changed => {
                self.graph.write().await.set_payload(event.data.clone());
                self.applied(event);
            }
            EventAction::Created => {
                self.dropped(event, "root already installed");
            }
        }
    }

    /// A user record changed. Patch the denormalized identity fields on
    /// every RunUser shadowing that user and republish them; the tree
    /// itself is untouched.
    async fn apply_user(&self, event: &ScopeEvent, action: EventAction) -> anyhow::Result<()> {
        if action != EventAction::Changed {
            self.dropped(event, "only user.changed is meaningful here");
            return Ok(());
        }
        let Some(user_pk) = event.data.get("id").and_then(Value::as_i64) else {
            self.dropped(event, "user event without id");
            return Ok(());
        };

        let mut outgoing = Vec::new();
        {
            let mut graph = self.graph.write().await;
            let shadowing: Vec<i64> = graph
                .runusers()
                .iter()
                .filter(|ru| ru.field_i64("user") == Some(user_pk))
                .map(Scope::pk)
                .collect();
            if shadowing.is_empty() {
                self.dropped(event, "no runuser shadows this user");
                return Ok(());
            }

            for pk in shadowing {
                let runuser = graph.manager_mut(ScopeKind::RunUser).get_pk_mut(pk)?;
                for field in ["email", "first_name", "last_name"] {
                    if let Some(value) = event.data.get(field) {
                        runuser.set_field(field, value.clone());
                    }
                }
                let runuser = graph.get_scope(ScopeKind::RunUser, pk)?;
                outgoing.extend(child_notifications(
                    &graph,
                    runuser,
                    ChildAction::UpdateChild,
                    &self.router,
                ));
            }
        }
        self.publish_all(outgoing).await;
        self.applied(event);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scope events
    // ------------------------------------------------------------------

    async fn apply_scope(
        &self,
        event: &ScopeEvent,
        kind: ScopeKind,
        action: EventAction,
    ) -> anyhow::Result<()> {
        let Some(pk) = event.data.get("id").and_then(Value::as_i64) else {
            self.dropped(event, "payload without id");
            return Ok(());
        };

        let outgoing = match action {
            EventAction::Created => self.apply_created(event, kind).await?,
            EventAction::Changed => self.apply_changed(event, kind, pk).await?,
            EventAction::Deleted => self.apply_deleted(event, kind, pk).await?,
        };

        if let Some(outgoing) = outgoing {
            self.publish_all(outgoing).await;
            self.applied(event);
        }
        Ok(())
    }

    async fn apply_created(
        &self,
        event: &ScopeEvent,
        kind: ScopeKind,
    ) -> anyhow::Result<Option<Vec<(String, PublishMessage)>>> {
        let scope = match Scope::new(kind, event.data.clone()) {
            Ok(scope) => scope,
            Err(err) => {
                self.dropped(event, err.to_string());
                return Ok(None);
            }
        };

        let mut graph = self.graph.write().await;
        if graph.contains(kind, scope.pk()) {
            self.dropped(event, "already loaded");
            return Ok(None);
        }

        // The parent must have reached the graph first; a child created
        // during a race is recovered by the run-restore path instead.
        if let Some(parent_key) = scope.parent_ref() {
            if !parent_key.kind.is_root() && !graph.contains(parent_key.kind, parent_key.pk) {
                self.dropped(
                    event,
                    ScopeError::ParentScopeNotFound {
                        parent_kind: parent_key.kind,
                        parent_pk: parent_key.pk,
                        kind,
                        pk: scope.pk(),
                    }
                    .to_string(),
                );
                return Ok(None);
            }
        } else if !matches!(kind.parent_fields(), [ScopeKind::Game]) {
            self.dropped(event, "no parent reference set");
            return Ok(None);
        }

        let pk = scope.pk();
        graph.add_scope(scope);
        let added = graph.get_scope(kind, pk)?;
        Ok(Some(child_notifications(
            &graph,
            added,
            ChildAction::AddChild,
            &self.router,
        )))
    }

    async fn apply_changed(
        &self,
        event: &ScopeEvent,
        kind: ScopeKind,
        pk: i64,
    ) -> anyhow::Result<Option<Vec<(String, PublishMessage)>>> {
        let mut graph = self.graph.write().await;

        if !graph.contains(kind, pk) {
            // A change for an unloaded Run that is now active is the
            // reactivation path: bring the whole subtree back.
            if kind == ScopeKind::Run
                && event.data.get("active").and_then(Value::as_bool) == Some(true)
            {
                if !self.restoring_runs.lock().insert(pk) {
                    self.dropped(event, "run restore already in flight");
                    return Ok(None);
                }
                let result = self.reactivate_run(&mut graph, event, pk).await;
                self.restoring_runs.lock().remove(&pk);
                result?;
                self.applied(event);
                return Ok(None);
            }
            self.dropped(
                event,
                ScopeError::ScopeNotFound { kind, pk }.to_string(),
            );
            return Ok(None);
        }

        let was_active = kind == ScopeKind::Run
            && graph
                .get_scope(kind, pk)?
                .field_bool("active")
                .unwrap_or(false);
        let now_inactive = event.data.get("active").and_then(Value::as_bool) == Some(false);
        if was_active && now_inactive {
            // Archival, not deletion: the subtree leaves memory silently.
            restore::unload_run(&mut graph, pk);
            self.applied(event);
            return Ok(None);
        }

        // Remove, replace, re-add so secondary indexes follow the payload
        // and the parent memo resets.
        let mut scope = match graph.remove_scope(kind, pk) {
            Some(scope) => scope,
            None => return Ok(None),
        };
        scope.replace_payload(event.data.clone());
        graph.add_scope(scope);

        let updated = graph.get_scope(kind, pk)?;
        Ok(Some(child_notifications(
            &graph,
            updated,
            ChildAction::UpdateChild,
            &self.router,
        )))
    }

    async fn apply_deleted(
        &self,
        event: &ScopeEvent,
        kind: ScopeKind,
        pk: i64,
    ) -> anyhow::Result<Option<Vec<(String, PublishMessage)>>> {
        let mut graph = self.graph.write().await;
        if !graph.contains(kind, pk) {
            self.dropped(
                event,
                ScopeError::ScopeNotFound { kind, pk }.to_string(),
            );
            return Ok(None);
        }

        // Fan-out is computed while the scope is still resolvable.
        let doomed = graph.get_scope(kind, pk)?;
        let outgoing =
            child_notifications(&graph, doomed, ChildAction::RemoveChild, &self.router);
        graph.remove_scope(kind, pk);
        Ok(Some(outgoing))
    }

    /// Restore a previously unloaded run. Holds the write guard for the
    /// duration so readers observe either no run or the full subtree.
    async fn reactivate_run(
        &self,
        graph: &mut GameGraph,
        event: &ScopeEvent,
        pk: i64,
    ) -> anyhow::Result<()> {
        tracing::info!(run = pk, "run reactivated");
        let scope = Scope::new(ScopeKind::Run, event.data.clone())?;
        graph.add_scope(scope);
        restore::restore_run(self.store.as_ref(), graph, pk).await
    }

    async fn publish_all(&self, outgoing: Vec<(String, PublishMessage)>) {
        for (topic, message) in outgoing {
            self.publisher.publish(&topic, message).await;
        }
    }
}
