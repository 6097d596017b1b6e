//! Simscope Store: Remote Store Access for the Scope Graph
//!
//! The store of record lives on the other side of an HTTP API. This crate
//! isolates everything that touches it:
//!
//! - `remote` — the `RemoteStore` async trait, the `reqwest` client behind
//!   the `http` feature, and the in-process `MemoryStore` test double
//! - `cache` — a TTL read-through cache with per-key single-flight fetch
//!
//! Writes never pass through the cache; the engine posts directly to the
//! store and lets the resulting webhook event update the graph.

pub mod cache;
pub mod remote;

pub use cache::StoreCache;
pub use remote::{Lookup, MemoryStore, RemoteStore, StoreError, StoreResult};

#[cfg(feature = "http")]
pub use remote::HttpStore;
