//! Engine configuration surface.
//!
//! Values only; how they are loaded (env, file, flags) is the embedding
//! process's business.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the games store API.
    pub games_url: String,
    /// Basic-auth credentials for the store, if it requires them.
    pub games_auth: Option<(String, String)>,
    /// Namespace prefix for every bus address this engine owns.
    pub root_topic: String,
    /// Load only active runs' subtrees at startup instead of everything.
    pub load_active_runs: bool,
    /// TTL for the read-through store cache, in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            games_url: "http://localhost:8100/apis".to_string(),
            games_auth: None,
            root_topic: "world.simscope".to_string(),
            load_active_runs: true,
            cache_ttl_secs: 1,
        }
    }
}

impl EngineConfig {
    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_ttl_secs)
    }
}
