//! Engine-level configuration, loaded the same way the teacher gateway loads
//! its `Config`: a flat TOML file deserialized with `serde`.
//!
//! Everything that belongs to the out-of-scope Transport/Store collaborators
//! (bind addresses, TLS material, DB paths) stays out of this struct — those
//! live in the host application, not the core.

use serde::Deserialize;
use std::fs;

fn default_window_size() -> u32 {
    100
}

fn default_max_attendees() -> usize {
    50
}

#[derive(Clone, Debug, Deserialize)]
pub struct SyncEngineConfig {
    /// `<WindowSize>` sent on every Sync request, absent an explicit override.
    #[serde(default = "default_window_size")]
    pub window_size: u32,

    /// Attendee-redaction threshold (§4.G). Exposed for test tuning; real
    /// deployments should leave this at the spec's 50.
    #[serde(default = "default_max_attendees")]
    pub max_attendees: usize,

    pub log_level: Option<String>,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        SyncEngineConfig {
            window_size: default_window_size(),
            max_attendees: default_max_attendees(),
            log_level: None,
        }
    }
}

impl SyncEngineConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: SyncEngineConfig = toml::from_str(&s)?;
        Ok(cfg)
    }
}
