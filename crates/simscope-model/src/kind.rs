//! Scope kinds and the static tree schema.
//!
//! The entity kinds form a fixed tree, root first:
//!
//! ```text
//! Game ── Run ──┬── World ───── Scenario ── Period ──┬── Decision
//!      ├─ Phase └── RunUser ──/                      └── Result
//!      └─ Role
//! ```
//!
//! A `Scenario` is parented by either a `World` or a `RunUser`; exactly one
//! of those payload fields is non-null at any time. The schema is known at
//! compile time, so parent fields, index fields and child kinds are plain
//! match tables rather than runtime registries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Game,
    Run,
    Phase,
    Role,
    World,
    RunUser,
    Scenario,
    Period,
    Decision,
    Result,
}

/// Endpoint-to-kind restore order: parents before children, so that parent
/// lookups succeed while the graph is being populated.
pub const RESTORE_ORDER: [ScopeKind; 9] = [
    ScopeKind::Role,
    ScopeKind::Phase,
    ScopeKind::Run,
    ScopeKind::RunUser,
    ScopeKind::World,
    ScopeKind::Scenario,
    ScopeKind::Period,
    ScopeKind::Decision,
    ScopeKind::Result,
];

/// Kinds that live inside a Run's subtree, children before parents, as
/// visited when a Run is unloaded.
pub const RUN_SUBTREE: [ScopeKind; 6] = [
    ScopeKind::Result,
    ScopeKind::Decision,
    ScopeKind::Period,
    ScopeKind::Scenario,
    ScopeKind::World,
    ScopeKind::RunUser,
];

impl ScopeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Game => "game",
            Self::Run => "run",
            Self::Phase => "phase",
            Self::Role => "role",
            Self::World => "world",
            Self::RunUser => "runuser",
            Self::Scenario => "scenario",
            Self::Period => "period",
            Self::Decision => "decision",
            Self::Result => "result",
        }
    }

    /// Plural endpoint name on the remote games store.
    pub const fn endpoint(self) -> &'static str {
        match self {
            Self::Game => "games",
            Self::Run => "runs",
            Self::Phase => "phases",
            Self::Role => "roles",
            Self::World => "worlds",
            Self::RunUser => "runusers",
            Self::Scenario => "scenarios",
            Self::Period => "periods",
            Self::Decision => "decisions",
            Self::Result => "results",
        }
    }

    /// Candidate parent-reference payload fields, tried in order. Exactly one
    /// is non-null on a well-formed payload.
    pub const fn parent_fields(self) -> &'static [ScopeKind] {
        match self {
            Self::Game => &[],
            Self::Run | Self::Phase | Self::Role => &[Self::Game],
            Self::World | Self::RunUser => &[Self::Run],
            Self::Scenario => &[Self::World, Self::RunUser],
            Self::Period => &[Self::Scenario],
            Self::Decision | Self::Result => &[Self::Period],
        }
    }

    /// Payload fields maintained as secondary indexes in this kind's
    /// container. RunUser is additionally indexed by `world` for visibility
    /// lookups.
    pub const fn index_fields(self) -> &'static [&'static str] {
        match self {
            Self::Game => &[],
            Self::Run | Self::Phase | Self::Role => &["game"],
            Self::World => &["run"],
            Self::RunUser => &["run", "world"],
            Self::Scenario => &["world", "runuser"],
            Self::Period => &["scenario"],
            Self::Decision | Self::Result => &["period"],
        }
    }

    pub const fn child_kinds(self) -> &'static [ScopeKind] {
        match self {
            Self::Game => &[Self::Run, Self::Phase, Self::Role],
            Self::Run => &[Self::RunUser, Self::World],
            Self::World | Self::RunUser => &[Self::Scenario],
            Self::Scenario => &[Self::Period],
            Self::Period => &[Self::Decision, Self::Result],
            Self::Phase | Self::Role | Self::Decision | Self::Result => &[],
        }
    }

    pub const fn is_root(self) -> bool {
        matches!(self, Self::Game)
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown scope kind `{0}`")]
pub struct UnknownKind(pub String);

impl FromStr for ScopeKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "game" => Self::Game,
            "run" => Self::Run,
            "phase" => Self::Phase,
            "role" => Self::Role,
            "world" => Self::World,
            "runuser" => Self::RunUser,
            "scenario" => Self::Scenario,
            "period" => Self::Period,
            "decision" => Self::Decision,
            "result" => Self::Result,
            other => return Err(UnknownKind(other.to_string())),
        })
    }
}
