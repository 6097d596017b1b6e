//! Simscope Engine: Synchronization and Authorization over the Scope Graph
//!
//! One engine instance owns one game's graph behind a coarse
//! `tokio::sync::RwLock` and keeps it consistent with the remote store:
//!
//! - `restore` — bulk load at startup (all runs or active runs only) and
//!   per-run subtree restore/unload
//! - `reconcile` — applies created/changed/deleted store events, tolerant
//!   of duplicate and out-of-order delivery, with a queryable change log
//! - `games` — per-game bootstrap and the slug-keyed directory routing
//!   inbound events in multi-game deployments
//! - `ops` — the operations the transport layer exposes to clients
//! - `registry` — the declaration table those operations bind from
//! - `auth` — graph-walking subscribe/publish/call authorization
//! - `publish` — outbound notification contract and interested-party
//!   fan-out
//! - `config` — the values the embedding process must supply
//! - `error` — caller tagging for failures the transport routes onto
//!   private error channels
//!
//! The message bus itself, process bootstrap, and store persistence stay
//! outside; they interact through `Publisher`, `RoomDirectory`, and
//! `RemoteStore`.

pub mod auth;
pub mod config;
pub mod error;
pub mod games;
pub mod ops;
pub mod publish;
pub mod reconcile;
pub mod registry;
pub mod restore;

pub use auth::{authorize, AuthAction, AuthDecision, NoRooms, RoomDirectory};
pub use config::EngineConfig;
pub use error::TaggedError;
pub use games::{bootstrap_game, GameDirectory};
pub use ops::{Caller, GameService};
pub use publish::{child_notifications, ChildAction, PublishMessage, Publisher, RecordingPublisher};
pub use reconcile::{Change, ChangeStatus, Reconciler, ScopeEvent};
pub use registry::{OpDecl, OpMode, OpRegistry, Route};
pub use restore::{restore_game, restore_run, unload_run};
