use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Snapshot of the configuration the embedding front-end injects at session
/// start. The core never re-reads configuration mid-step and never persists
/// any of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Remote endpoint, `host:port`.
    pub endpoint: String,
    /// Name reported to the remote in INIT.
    pub client_name: String,
    pub connect_timeout_ms: u64,
    /// Per-request response timeout.
    pub response_timeout_ms: u64,
    /// Watchdog for the pause that ends a step-out iteration. `None` waits
    /// indefinitely, like a plain continue.
    pub step_watchdog_ms: Option<u64>,
    /// Cooperative yield pacing for long step-out/continue loops: after
    /// `yield_interval_ms` of looping, pause for `yield_pause_ms`, with at
    /// least `yield_min_gap_ms` between yields.
    pub yield_interval_ms: u64,
    pub yield_pause_ms: u64,
    pub yield_min_gap_ms: u64,
    /// Snapshot to load right after INIT, if any.
    pub auto_load: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: "localhost:12000".into(),
            client_name: "zedmon".into(),
            connect_timeout_ms: 1_000,
            response_timeout_ms: 3_000,
            step_watchdog_ms: None,
            yield_interval_ms: 1_000,
            yield_pause_ms: 200,
            yield_min_gap_ms: 100,
            auto_load: None,
        }
    }
}

impl Settings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn step_watchdog(&self) -> Option<Duration> {
        self.step_watchdog_ms.map(Duration::from_millis)
    }
}
