//! Bulk graph restore from the remote store.
//!
//! Startup loads a game's whole entity population, parents before children
//! so parent resolution never races. A partial load is fatal for that game
//! only; sibling games keep starting.

use std::time::Duration;

use simscope_model::{
    GameGraph, Scope, ScopeError, ScopeKind, ScopeManager, RESTORE_ORDER, RUN_SUBTREE,
};
use simscope_store::{Lookup, RemoteStore, StoreCache};

/// Load the root payload and every scope for `slug`.
///
/// The root record reads through the cache, so back-to-back restores of
/// the same game within `root_ttl` cost one remote fetch. Bulk per-kind
/// population always goes straight to the store.
///
/// With `load_active_runs`, only game-global kinds and runs are loaded
/// up front, then each active run's subtree; archived runs stay out of
/// memory until a reactivation event arrives.
pub async fn restore_game(
    cache: &StoreCache,
    slug: &str,
    load_active_runs: bool,
    root_ttl: Duration,
) -> anyhow::Result<GameGraph> {
    let root = cache
        .get("games", &Lookup::new().with("slug", slug), root_ttl)
        .await?;
    let mut graph = GameGraph::new(slug, root)?;
    tracing::info!(slug, pk = graph.pk(), "restoring game");

    let store = cache.store().as_ref();
    let by_slug = Lookup::new().with("game_slug", slug);

    if load_active_runs {
        for kind in [ScopeKind::Role, ScopeKind::Phase, ScopeKind::Run] {
            load_kind(store, &mut graph, kind, &by_slug).await?;
        }

        let active_pks: Vec<i64> = graph
            .runs()
            .iter()
            .filter(|run| run.field_bool("active") == Some(true))
            .map(Scope::pk)
            .collect();
        for pk in active_pks {
            restore_run(store, &mut graph, pk).await?;
        }
    } else {
        for kind in RESTORE_ORDER {
            load_kind(store, &mut graph, kind, &by_slug).await?;
        }
    }

    tracing::info!(slug, "game restored");
    Ok(graph)
}

/// Load one run's whole subtree, parents first. Used at startup for active
/// runs and by reconciliation when a run is reactivated.
pub async fn restore_run(
    store: &dyn RemoteStore,
    graph: &mut GameGraph,
    run_pk: i64,
) -> anyhow::Result<()> {
    tracing::info!(run = run_pk, "restoring run subtree");
    let by_run = Lookup::new().with("run", run_pk);
    for &kind in RUN_SUBTREE.iter().rev() {
        load_kind(store, graph, kind, &by_run).await?;
    }
    Ok(())
}

/// Fetch every record of one kind and merge it into the graph's container.
///
/// The store reports how many records matched; ending up with fewer live
/// scopes (unkeyed rows, duplicate pks) means the population is partial
/// and the restore must not be trusted.
async fn load_kind(
    store: &dyn RemoteStore,
    graph: &mut GameGraph,
    kind: ScopeKind,
    lookup: &Lookup,
) -> anyhow::Result<()> {
    let rows = store.get_list(kind.endpoint(), lookup).await?;
    let reported = rows.len();

    let mut scopes = Vec::with_capacity(reported);
    for row in rows {
        match Scope::new(kind, row) {
            Ok(scope) => scopes.push(scope),
            Err(err) => tracing::debug!(%kind, %err, "skipping unkeyed record"),
        }
    }

    let manager = ScopeManager::from_scopes(kind, scopes);
    let loaded = manager.len();
    tracing::debug!(%kind, loaded, reported, "restored container");

    if loaded != reported {
        return Err(ScopeError::ScopesNotLoaded {
            kind,
            loaded,
            reported,
        }
        .into());
    }

    if graph.manager(kind).is_empty() {
        graph.set_manager(manager);
    } else {
        // Merging into an already-populated container (run reactivation).
        for scope in manager {
            graph.add_scope(scope);
        }
    }
    Ok(())
}

/// Drop a run and its whole subtree from memory without emitting any
/// client notifications. Children go first so no orphan is ever observable.
pub fn unload_run(graph: &mut GameGraph, run_pk: i64) {
    for &kind in RUN_SUBTREE.iter() {
        let doomed: Vec<i64> = match kind {
            ScopeKind::RunUser | ScopeKind::World => graph
                .manager(kind)
                .iter()
                .filter(|s| s.field_i64("run") == Some(run_pk))
                .map(Scope::pk)
                .collect(),
            _ => graph
                .manager(kind)
                .iter()
                .filter(|scope| {
                    graph
                        .my(scope)
                        .run()
                        .ok()
                        .flatten()
                        .map(Scope::pk)
                        == Some(run_pk)
                })
                .map(Scope::pk)
                .collect(),
        };
        for pk in doomed {
            graph.remove_scope(kind, pk);
        }
    }
    graph.remove_scope(ScopeKind::Run, run_pk);
    tracing::info!(run = run_pk, "run subtree unloaded");
}
