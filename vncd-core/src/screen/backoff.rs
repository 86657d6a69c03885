//! Standby backoff for the update loop.
//!
//! The scheduler blocks in the protocol engine for `defer + standby`
//! each tick. Standby shrinks to its minimum as soon as anything
//! happens and grows by a fixed step on every quiet tick, bounding CPU
//! cost while idle and latency while active.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for [`StandbyBackoff`] and the scheduler tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Base wait in the protocol engine per tick, in milliseconds.
    pub defer_ms: u64,
    /// Standby after any activity.
    pub standby_min_ms: u64,
    /// Growth per quiet tick.
    pub standby_step_ms: u64,
    /// Standby never drops below this while no client is connected.
    pub idle_floor_ms: u64,
    /// Upper bound for standby.
    pub standby_max_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            defer_ms: 10,
            standby_min_ms: 1,
            standby_step_ms: 5,
            idle_floor_ms: 10,
            standby_max_ms: 500,
        }
    }
}

impl SchedulerConfig {
    /// Copy with bounds made consistent (`min <= floor <= max`).
    pub fn normalized(&self) -> Self {
        let max = self.standby_max_ms.max(1);
        let min = self.standby_min_ms.min(max);
        Self {
            defer_ms: self.defer_ms,
            standby_min_ms: min,
            standby_step_ms: self.standby_step_ms,
            idle_floor_ms: self.idle_floor_ms.clamp(min, max),
            standby_max_ms: max,
        }
    }

    pub fn defer(&self) -> Duration {
        Duration::from_millis(self.defer_ms)
    }
}

/// Monotonic-while-idle standby interval.
#[derive(Debug, Clone)]
pub struct StandbyBackoff {
    current: Duration,
    min: Duration,
    step: Duration,
    idle_floor: Duration,
    max: Duration,
}

impl StandbyBackoff {
    pub fn new(config: &SchedulerConfig) -> Self {
        let config = config.normalized();
        Self {
            current: Duration::from_millis(config.idle_floor_ms),
            min: Duration::from_millis(config.standby_min_ms),
            step: Duration::from_millis(config.standby_step_ms),
            idle_floor: Duration::from_millis(config.idle_floor_ms),
            max: Duration::from_millis(config.standby_max_ms),
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// How long the next engine wait may block.
    pub fn wait(&self, defer: Duration) -> Duration {
        defer + self.current
    }

    /// Client activity or a pending request: drop straight to minimum.
    pub fn on_activity(&mut self) {
        self.current = self.min;
    }

    /// A quiet tick: grow by one step, up to the maximum.
    pub fn on_quiet(&mut self) {
        self.current = (self.current + self.step).min(self.max);
    }

    /// No clients at all: never sit below the idle floor.
    pub fn on_no_clients(&mut self) {
        self.current = self.current.max(self.idle_floor);
    }
}

// ── Tests ────────────────────────────────────────────────────────
