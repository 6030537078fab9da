//! Worker configuration.

use crate::clock::{Clock, ClockMode};

/// Configuration for launching a background runner.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub clock_mode: ClockMode,
    /// Offline only: how late each coarse wake-up lands, in ms.
    pub offline_overshoot_ms: f64,
    pub thread_name: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            clock_mode: ClockMode::Realtime,
            offline_overshoot_ms: 0.0,
            thread_name: "countdown-worker".to_string(),
        }
    }
}

impl RunnerConfig {
    /// Build the clock this configuration describes.
    pub fn build_clock(&self) -> Clock {
        match self.clock_mode {
            ClockMode::Realtime => Clock::new(ClockMode::Realtime),
            ClockMode::Offline => Clock::offline_with_overshoot(self.offline_overshoot_ms),
        }
    }
}
