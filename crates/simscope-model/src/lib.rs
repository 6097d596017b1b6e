//! Simscope Model: In-Memory Scope Graph for Simulation Entities
//!
//! This crate holds the synchronous core of the scope graph: entity kinds and
//! their parent/child topology, the payload-carrying `Scope` wrapper, the
//! indexed insertion-ordered `ScopeManager` container, the per-game
//! `GameGraph`, cross-entity traversal, and bus-address derivation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        GAME GRAPH                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  Game (root payload)                                         │
//! │   ├── Phase / Role          (game-global, visible to all)    │
//! │   └── Run                                                    │
//! │        ├── RunUser ───────────── Scenario ── Period ──┐      │
//! │        └── World ─────────────── Scenario ── Period ──┤      │
//! │                                                       ▼      │
//! │                                            Decision / Result │
//! │                                                              │
//! │  one ScopeManager per kind: insertion order + field indexes  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything here is pure and synchronous. Remote access, caching, and
//! reconciliation live in the store and engine crates; they mutate a graph
//! behind a single writer lock and lean on the invariants kept here:
//!
//! - a scope's identity is `(kind, pk)`; payloads compare irrelevant
//! - containers preserve insertion order under add/remove/replace
//! - indexes stay consistent with payloads across every mutation
//! - parent references are memoized per payload and reset on replacement

pub mod error;
pub mod graph;
pub mod kind;
pub mod manager;
pub mod scope;
pub mod topic;
pub mod traverse;

pub use error::{ScopeError, ScopeResult};
pub use graph::GameGraph;
pub use kind::{ScopeKind, RESTORE_ORDER, RUN_SUBTREE};
pub use manager::ScopeManager;
pub use scope::{Scope, ScopeKey};
pub use topic::{TopicAddress, TopicRouter};
pub use traverse::{Parent, Traverse, Viewer};
