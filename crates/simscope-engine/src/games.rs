//! Directory of installed games for multi-game deployments.
//!
//! One process serves many games, each with its own graph and reconciler;
//! `bootstrap_game` builds that pair from configuration and a store handle.
//! Inbound store events name the game by slug; `forward` routes them to
//! that game's reconciler. An unknown slug is logged and dropped, the same
//! escape valve as any other unroutable event.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use simscope_model::TopicRouter;
use simscope_store::{RemoteStore, StoreCache};

use crate::config::EngineConfig;
use crate::ops::GameService;
use crate::publish::Publisher;
use crate::reconcile::{Reconciler, ScopeEvent};
use crate::restore::restore_game;

/// Restore one game from the store and assemble its service and
/// reconciler around a shared graph. The configured cache TTL governs
/// the root read; everything else about the restore is uncached.
pub async fn bootstrap_game(
    config: &EngineConfig,
    store: Arc<dyn RemoteStore>,
    publisher: Arc<dyn Publisher>,
    slug: &str,
) -> anyhow::Result<(GameService, Arc<Reconciler>)> {
    let cache = Arc::new(StoreCache::new(store.clone()));
    let graph = restore_game(&cache, slug, config.load_active_runs, config.cache_ttl()).await?;
    let graph = Arc::new(tokio::sync::RwLock::new(graph));
    let router = TopicRouter::new(config.root_topic.clone());
    let service = GameService::new(graph.clone(), cache, publisher.clone(), router.clone());
    let reconciler = Arc::new(Reconciler::new(graph, store, publisher, router));
    Ok((service, reconciler))
}

#[derive(Default)]
pub struct GameDirectory {
    games: RwLock<HashMap<String, Arc<Reconciler>>>,
}

impl GameDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, slug: impl Into<String>, reconciler: Arc<Reconciler>) {
        self.games.write().insert(slug.into(), reconciler);
    }

    pub fn uninstall(&self, slug: &str) -> Option<Arc<Reconciler>> {
        self.games.write().remove(slug)
    }

    pub fn get(&self, slug: &str) -> Option<Arc<Reconciler>> {
        self.games.read().get(slug).cloned()
    }

    pub fn slugs(&self) -> Vec<String> {
        self.games.read().keys().cloned().collect()
    }

    /// Route an event to the named game's reconciler. Events for games this
    /// process does not serve are dropped.
    pub async fn forward(&self, slug: &str, event: ScopeEvent) -> anyhow::Result<()> {
        let Some(reconciler) = self.get(slug) else {
            tracing::debug!(slug, event = %event.event, "event for uninstalled game dropped");
            return Ok(());
        };
        reconciler.dispatch(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::RecordingPublisher;
    use serde_json::json;
    use simscope_model::{GameGraph, Scope, ScopeKind, TopicRouter};
    use simscope_store::MemoryStore;
    use tokio::sync::RwLock as AsyncRwLock;

    fn reconciler_for(slug: &str, pk: i64) -> (Arc<Reconciler>, Arc<AsyncRwLock<GameGraph>>) {
        let mut g = GameGraph::new(slug, json!({"id": pk, "slug": slug})).unwrap();
        g.add_scope(
            Scope::new(ScopeKind::Run, json!({"id": 1, "game": pk, "active": true})).unwrap(),
        );
        let graph = Arc::new(AsyncRwLock::new(g));
        let reconciler = Arc::new(Reconciler::new(
            graph.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingPublisher::new()),
            TopicRouter::new(format!("world.{slug}")),
        ));
        (reconciler, graph)
    }

    #[tokio::test]
    async fn forward_routes_by_slug() {
        let directory = GameDirectory::new();
        let (calc, calc_graph) = reconciler_for("calc", 100);
        let (blox, blox_graph) = reconciler_for("blox", 200);
        directory.install("calc", calc);
        directory.install("blox", blox);

        directory
            .forward(
                "calc",
                ScopeEvent::new("calc.world.created", json!({"id": 2, "run": 1})),
            )
            .await
            .unwrap();

        assert!(calc_graph.read().await.contains(ScopeKind::World, 2));
        assert!(!blox_graph.read().await.contains(ScopeKind::World, 2));
    }

    #[tokio::test]
    async fn bootstrap_wires_restore_service_and_reconciler() {
        let store = Arc::new(MemoryStore::new());
        store.insert("games", json!({"id": 100, "slug": "calc"}));
        store.insert(
            "runs",
            json!({"id": 1, "game": 100, "game_slug": "calc", "active": true}),
        );
        let publisher = Arc::new(RecordingPublisher::new());
        let config = EngineConfig::default();

        let (service, reconciler) = bootstrap_game(&config, store, publisher, "calc")
            .await
            .unwrap();
        let directory = GameDirectory::new();
        directory.install("calc", reconciler);
        directory
            .forward(
                "calc",
                ScopeEvent::new("calc.world.created", json!({"id": 2, "run": 1})),
            )
            .await
            .unwrap();

        let graph = service.graph();
        let graph = graph.read().await;
        assert!(graph.contains(ScopeKind::Run, 1));
        assert!(graph.contains(ScopeKind::World, 2));
    }

    #[tokio::test]
    async fn unknown_game_is_dropped_not_fatal() {
        let directory = GameDirectory::new();
        directory
            .forward(
                "nope",
                ScopeEvent::new("nope.world.created", json!({"id": 2, "run": 1})),
            )
            .await
            .unwrap();
        assert!(directory.slugs().is_empty());
    }
}
