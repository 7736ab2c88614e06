//! Timing knobs of the engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lower and upper bound of a throttled delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayWindow {
    /// Quiet period required after the most recent request.
    pub min: Duration,
    /// Hard cap measured from the first request.
    pub max: Duration,
}

impl DelayWindow {
    pub fn from_millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max.max(min)),
        }
    }
}

/// Engine configuration, shared by every entity of a runtime.
///
/// All durations are in milliseconds so the struct can be read from JSON or TOML
/// as-is; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a local operation waits for a relay to acknowledge it.
    pub continuation_timeout_ms: u64,
    /// How far behind the newest applied operation an arrival may be before the
    /// entity replays its log.
    pub stale_tolerance_ms: u64,
    pub resolve_delay_min_ms: u64,
    pub resolve_delay_max_ms: u64,
    pub compress_delay_min_ms: u64,
    pub compress_delay_max_ms: u64,
    /// Grace period between a delete and the entity being evicted.
    pub free_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            continuation_timeout_ms: 10_000,
            stale_tolerance_ms: 16,
            resolve_delay_min_ms: 10,
            resolve_delay_max_ms: 1_000,
            compress_delay_min_ms: 100,
            compress_delay_max_ms: 10_000,
            free_delay_ms: 0,
        }
    }
}

impl EngineConfig {
    pub fn continuation_timeout(&self) -> Duration {
        Duration::from_millis(self.continuation_timeout_ms)
    }

    pub fn resolve_window(&self) -> DelayWindow {
        DelayWindow::from_millis(self.resolve_delay_min_ms, self.resolve_delay_max_ms)
    }

    pub fn compress_window(&self) -> DelayWindow {
        DelayWindow::from_millis(self.compress_delay_min_ms, self.compress_delay_max_ms)
    }

    pub fn free_delay(&self) -> Duration {
        Duration::from_millis(self.free_delay_ms)
    }
}
