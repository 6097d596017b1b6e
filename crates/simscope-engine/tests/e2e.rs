//! End-to-end: restore a game, reconcile out-of-order store events, and
//! serve reads and authorization from the resulting graph.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::RwLock;

use simscope_engine::{
    authorize, restore_game, AuthAction, Caller, ChangeStatus, GameService, NoRooms,
    RecordingPublisher, Reconciler, ScopeEvent,
};
use simscope_model::{ScopeKind, TopicRouter};
use simscope_store::{MemoryStore, StoreCache};

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert("games", json!({"id": 100, "slug": "calc"}));
    store.insert(
        "phases",
        json!({"id": 10, "game": 100, "game_slug": "calc", "name": "Play", "order": 1}),
    );
    store.insert(
        "roles",
        json!({"id": 11, "game": 100, "game_slug": "calc", "name": "Producer"}),
    );
    store.insert(
        "runs",
        json!({"id": 1, "game": 100, "game_slug": "calc", "active": true, "phase": 10}),
    );
    store
}

struct Harness {
    graph: Arc<RwLock<simscope_model::GameGraph>>,
    reconciler: Reconciler,
    service: GameService,
    publisher: Arc<RecordingPublisher>,
    store: Arc<MemoryStore>,
}

async fn harness() -> Harness {
    let store = seeded_store();
    let cache = Arc::new(StoreCache::new(store.clone()));
    let graph = Arc::new(RwLock::new(
        restore_game(&cache, "calc", true, Duration::from_secs(1))
            .await
            .unwrap(),
    ));
    let publisher = Arc::new(RecordingPublisher::new());
    let router = TopicRouter::new("world.simscope");
    let reconciler = Reconciler::new(
        graph.clone(),
        store.clone(),
        publisher.clone(),
        router.clone(),
    );
    let service = GameService::new(graph.clone(), cache, publisher.clone(), router);
    Harness {
        graph,
        reconciler,
        service,
        publisher,
        store,
    }
}

fn ev(name: &str, data: serde_json::Value) -> ScopeEvent {
    ScopeEvent::new(name, data)
}

#[tokio::test]
async fn runuser_before_world_then_reassignment() {
    let h = harness().await;

    // The runuser arrives before any world exists; run 1 is its parent, so
    // it lands in the graph immediately.
    h.reconciler
        .dispatch(ev(
            "calc.runuser.created",
            json!({"id": 5, "run": 1, "world": null, "user": 50,
                   "leader": true, "email": "lead@x.io"}),
        ))
        .await
        .unwrap();

    h.reconciler
        .dispatch(ev("calc.world.created", json!({"id": 2, "run": 1})))
        .await
        .unwrap();

    h.reconciler
        .dispatch(ev(
            "calc.runuser.changed",
            json!({"id": 5, "run": 1, "world": 2, "user": 50,
                   "leader": true, "email": "lead@x.io"}),
        ))
        .await
        .unwrap();

    let graph = h.graph.read().await;
    let world = graph.get_scope(ScopeKind::World, 2).unwrap();
    let assigned = graph.my(world).get_runusers(false).unwrap();
    assert_eq!(assigned.len(), 1);
    assert_eq!(assigned[0].pk(), 5);
    assert!(graph
        .runusers()
        .filter(&[("world", serde_json::Value::Null)])
        .unwrap()
        .is_empty());

    assert!(h
        .reconciler
        .changes()
        .iter()
        .all(|c| c.status == ChangeStatus::Applied));
}

#[tokio::test]
async fn deactivate_then_reactivate_round_trips_the_subtree() {
    let h = harness().await;
    h.reconciler
        .dispatch(ev("calc.world.created", json!({"id": 2, "run": 1})))
        .await
        .unwrap();
    h.reconciler
        .dispatch(ev(
            "calc.runuser.created",
            json!({"id": 5, "run": 1, "world": 2, "user": 50,
                   "leader": false, "email": "s1@x.io"}),
        ))
        .await
        .unwrap();

    // Reactivation reloads from the store, so it must hold the records.
    h.store.insert("worlds", json!({"id": 2, "run": 1}));
    h.store.insert(
        "runusers",
        json!({"id": 5, "run": 1, "world": 2, "user": 50,
               "leader": false, "email": "s1@x.io"}),
    );

    h.publisher.take();
    h.reconciler
        .dispatch(ev(
            "calc.run.changed",
            json!({"id": 1, "game": 100, "active": false, "phase": 10}),
        ))
        .await
        .unwrap();

    {
        let graph = h.graph.read().await;
        assert!(!graph.contains(ScopeKind::Run, 1));
        assert!(!graph.contains(ScopeKind::World, 2));
        assert!(!graph.contains(ScopeKind::RunUser, 5));
        // Archival is silent.
        assert!(h.publisher.is_empty());
        // Game-global kinds survive the unload.
        assert_eq!(graph.phases().len(), 1);
    }

    h.reconciler
        .dispatch(ev(
            "calc.run.changed",
            json!({"id": 1, "game": 100, "active": true, "phase": 10}),
        ))
        .await
        .unwrap();

    let graph = h.graph.read().await;
    assert!(graph.contains(ScopeKind::Run, 1));
    assert!(graph.contains(ScopeKind::World, 2));
    assert!(graph.contains(ScopeKind::RunUser, 5));
}

#[tokio::test]
async fn reads_and_authorization_follow_the_reconciled_graph() {
    let h = harness().await;
    for event in [
        ev("calc.world.created", json!({"id": 2, "run": 1})),
        ev(
            "calc.runuser.created",
            json!({"id": 5, "run": 1, "world": 2, "user": 50,
                   "leader": false, "email": "s1@x.io"}),
        ),
        ev(
            "calc.runuser.created",
            json!({"id": 6, "run": 1, "world": null, "user": 60,
                   "leader": true, "email": "lead@x.io"}),
        ),
    ] {
        h.reconciler.dispatch(event).await.unwrap();
    }

    // Member sees their world branch; the run topic stays leader-only.
    let router = TopicRouter::new("world.simscope");
    let graph = h.graph.read().await;
    let member_world = authorize(
        &graph,
        &router,
        &NoRooms,
        "s1@x.io",
        "world.simscope.model.world.2.get_scope_tree",
        AuthAction::Subscribe,
    )
    .await;
    assert!(member_world.allow);
    let member_run = authorize(
        &graph,
        &router,
        &NoRooms,
        "s1@x.io",
        "world.simscope.model.run.1.topic",
        AuthAction::Subscribe,
    )
    .await;
    assert!(!member_run.allow);
    drop(graph);

    let caller = Caller {
        authid: "s1@x.io".to_string(),
        user_id: 50,
        runuser_pk: 5,
        leader: false,
    };
    let out = h
        .service
        .get_current_run_and_phase(ScopeKind::World, 2)
        .await
        .unwrap();
    assert_eq!(out["run"]["pk"], json!(1));
    assert_eq!(out["phase"]["data"]["name"], json!("Play"));

    h.service.connected(&caller).await.unwrap();
    let listed = h
        .service
        .get_active_runusers(ScopeKind::World, 2, &caller)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["data"]["online"], json!(true));

    let (topics, leader) = h.service.initial_scopes("lead@x.io").await;
    assert!(leader);
    assert_eq!(topics, vec!["model:model.run.1"]);
}
