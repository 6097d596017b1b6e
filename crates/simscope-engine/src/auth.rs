//! Graph-walking authorization.
//!
//! Every subscribe/publish/call/register attempt routed through the bus is
//! checked here, synchronously against the current graph. Rules are
//! evaluated most specific first; the final fallback denies without
//! caching so a later graph change can flip the answer.

use async_trait::async_trait;

use simscope_model::{GameGraph, ScopeKind, TopicAddress, TopicRouter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    Subscribe,
    Publish,
    Call,
    Register,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthDecision {
    pub allow: bool,
    pub cache: bool,
    pub disclose: bool,
}

impl AuthDecision {
    pub const ALLOW: Self = Self {
        allow: true,
        cache: true,
        disclose: true,
    };

    pub const DENY: Self = Self {
        allow: false,
        cache: true,
        disclose: true,
    };

    /// Uncached deny: the graph may change in a way that flips this.
    pub const DENY_UNCACHED: Self = Self {
        allow: false,
        cache: false,
        disclose: true,
    };
}

/// Chat-room membership lives outside this engine; only the membership
/// question is needed for authorization.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn check_user(&self, room_slug: &str, authid: &str) -> bool;
}

/// Denies every room membership question; for embeddings without chat.
pub struct NoRooms;

#[async_trait]
impl RoomDirectory for NoRooms {
    async fn check_user(&self, _room_slug: &str, _authid: &str) -> bool {
        false
    }
}

/// The caller's standing in the graph: the runuser shadows matching an
/// identity, summarized for rule evaluation.
struct CallerScopes {
    /// (runuser pk, run pk, world pk) per shadow.
    shadows: Vec<(i64, Option<i64>, Option<i64>)>,
    /// Pks of runs the caller leads.
    led_runs: Vec<i64>,
}

fn caller_scopes(graph: &GameGraph, authid: &str) -> CallerScopes {
    let mut shadows = Vec::new();
    let mut led_runs = Vec::new();
    for ru in graph.runusers().iter() {
        if ru.field_str("email") != Some(authid) {
            continue;
        }
        let run = ru.field_i64("run");
        shadows.push((ru.pk(), run, ru.field_i64("world")));
        if ru.field_bool("leader") == Some(true) {
            if let Some(run) = run {
                led_runs.push(run);
            }
        }
    }
    CallerScopes { shadows, led_runs }
}

pub async fn authorize(
    graph: &GameGraph,
    router: &TopicRouter,
    rooms: &dyn RoomDirectory,
    authid: &str,
    uri: &str,
    action: AuthAction,
) -> AuthDecision {
    tracing::debug!(authid, uri, ?action, "authorize");

    match router.parse(uri) {
        // Every user may fetch their initial scopes.
        TopicAddress::InitUserScopes => AuthDecision::ALLOW,

        // A user's private error channel is theirs alone.
        TopicAddress::Error { authid: owner } => {
            if owner == authid {
                AuthDecision::ALLOW
            } else {
                AuthDecision::DENY
            }
        }

        TopicAddress::Chat { rest } => authorize_chat(graph, rooms, authid, action, &rest).await,

        TopicAddress::Model { kind, pk, name } => {
            authorize_model(graph, authid, action, kind, pk, &name)
        }

        TopicAddress::Unknown | TopicAddress::Foreign => {
            tracing::debug!(authid, uri, "deny: unrecognized address");
            AuthDecision::DENY_UNCACHED
        }
    }
}

async fn authorize_chat(
    graph: &GameGraph,
    rooms: &dyn RoomDirectory,
    authid: &str,
    action: AuthAction,
    rest: &str,
) -> AuthDecision {
    match rest {
        // Room mutation is a leader privilege.
        "create_room" | "add_user" | "remove_user" | "check_user" => {
            if caller_scopes(graph, authid).led_runs.is_empty() {
                tracing::debug!(authid, "deny: non-leader room mutation");
                AuthDecision::DENY
            } else {
                AuthDecision::ALLOW
            }
        }
        // Per-user queries enforce their own scoping internally.
        "rooms_for_user" | "load_messages" => AuthDecision::ALLOW,
        _ => {
            // Members may listen to a room's channel but never publish on it.
            if action == AuthAction::Subscribe {
                if let Some(room_slug) = rest
                    .strip_prefix("rooms.")
                    .map(|tail| tail.split('.').next().unwrap_or(tail))
                {
                    if rooms.check_user(room_slug, authid).await {
                        return AuthDecision::ALLOW;
                    }
                }
            }
            AuthDecision::DENY
        }
    }
}

fn authorize_model(
    graph: &GameGraph,
    authid: &str,
    action: AuthAction,
    kind: ScopeKind,
    pk: Option<i64>,
    name: &str,
) -> AuthDecision {
    // Game-level queries are open; the root holds nothing sensitive.
    if kind.is_root() {
        if name == "get_phases" || name == "get_roles" || action == AuthAction::Call {
            return AuthDecision::ALLOW;
        }
        return AuthDecision::DENY_UNCACHED;
    }

    // Clients never get to expose procedures under the model namespace.
    if action == AuthAction::Register {
        tracing::debug!(authid, "deny: register under model namespace");
        return AuthDecision::DENY;
    }

    // Phases and roles are game-global and visible to everyone.
    if matches!(kind, ScopeKind::Phase | ScopeKind::Role) {
        return AuthDecision::ALLOW;
    }

    let Some(pk) = pk else {
        return AuthDecision::DENY_UNCACHED;
    };
    let caller = caller_scopes(graph, authid);

    match kind {
        // A run's topic belongs to its leader.
        ScopeKind::Run => {
            for (_, run, _) in &caller.shadows {
                if *run == Some(pk) {
                    return if caller.led_runs.contains(&pk) {
                        AuthDecision::ALLOW
                    } else {
                        AuthDecision::DENY
                    };
                }
            }
            AuthDecision::DENY_UNCACHED
        }

        // Only the runuser itself.
        ScopeKind::RunUser => {
            if caller.shadows.iter().any(|(ru, _, _)| *ru == pk) {
                AuthDecision::ALLOW
            } else {
                AuthDecision::DENY
            }
        }

        // Assigned runusers, or the leader of the world's run.
        ScopeKind::World => {
            if caller.shadows.iter().any(|(_, _, world)| *world == Some(pk)) {
                return AuthDecision::ALLOW;
            }
            let led = graph
                .get_scope(ScopeKind::World, pk)
                .ok()
                .and_then(|world| world.field_i64("run"))
                .map(|run| caller.led_runs.contains(&run))
                .unwrap_or(false);
            if led {
                AuthDecision::ALLOW
            } else {
                AuthDecision::DENY_UNCACHED
            }
        }

        _ => AuthDecision::DENY_UNCACHED,
    }
}
