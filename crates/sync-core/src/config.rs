//! Client-side sync configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the sync server (used by `SyncEngine::connect`)
    #[serde(default = "default_store_url")]
    pub store_url: String,

    /// Quiet period after the last edit before autosave fires (default: 800 ms)
    #[serde(default = "default_autosave_quiet_period_ms")]
    pub autosave_quiet_period_ms: u64,

    /// Minimum spacing between visibility-triggered refreshes (default: 1 s)
    #[serde(default = "default_visibility_refresh_interval_ms")]
    pub visibility_refresh_interval_ms: u64,

    /// Directory for the file backstop; in-memory when unset
    #[serde(default)]
    pub backstop_dir: Option<PathBuf>,
}

fn default_store_url() -> String {
    "http://127.0.0.1:3030".to_string()
}

fn default_autosave_quiet_period_ms() -> u64 {
    800
}

fn default_visibility_refresh_interval_ms() -> u64 {
    1000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_url: default_store_url(),
            autosave_quiet_period_ms: default_autosave_quiet_period_ms(),
            visibility_refresh_interval_ms: default_visibility_refresh_interval_ms(),
            backstop_dir: None,
        }
    }
}

impl SyncConfig {
    pub fn autosave_quiet_period(&self) -> Duration {
        Duration::from_millis(self.autosave_quiet_period_ms)
    }

    pub fn visibility_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.visibility_refresh_interval_ms)
    }
}
