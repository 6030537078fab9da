//! Monotonic clock
//!
//! Millisecond clock shared by the countdown engine and the worker loop.
//! - Realtime: anchored to `std::time::Instant`, busy waits really spin
//! - Offline: time only moves when told to, busy waits jump ahead instantly

use std::cell::Cell;
use std::time::{Duration, Instant};

/// Clock execution mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClockMode {
    #[default]
    Realtime,
    Offline,
}

/// Monotonic clock reporting fractional milliseconds since creation.
pub struct Clock {
    pub mode: ClockMode,

    /// Realtime anchor.
    wall_anchor: Instant,

    /// Offline clock.
    offline_now: Cell<f64>,

    /// How late every coarse wake-up lands in offline mode.
    offline_overshoot_ms: f64,
}

impl Clock {
    /// Create a new clock starting at 0 ms.
    pub fn new(mode: ClockMode) -> Self {
        Self {
            mode,
            wall_anchor: Instant::now(),
            offline_now: Cell::new(0.0),
            offline_overshoot_ms: 0.0,
        }
    }

    /// Create an offline clock whose coarse wake-ups overshoot by `overshoot_ms`.
    pub fn offline_with_overshoot(overshoot_ms: f64) -> Self {
        let overshoot = if overshoot_ms.is_finite() && overshoot_ms > 0.0 {
            overshoot_ms
        } else {
            0.0
        };
        Self {
            offline_overshoot_ms: overshoot,
            ..Self::new(ClockMode::Offline)
        }
    }

    /// Current time in milliseconds.
    pub fn now(&self) -> f64 {
        match self.mode {
            ClockMode::Offline => self.offline_now.get(),
            ClockMode::Realtime => self.wall_anchor.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// Move offline time forward to `t`. Never moves backwards; no-op in realtime mode.
    pub fn advance_to(&self, t: f64) {
        if self.mode == ClockMode::Realtime {
            return;
        }
        if t > self.offline_now.get() {
            self.offline_now.set(t);
        }
    }

    /// Advance offline time to a coarse wake-up at `deadline`, including the configured overshoot.
    pub fn wake_at(&self, deadline: f64) {
        self.advance_to(deadline + self.offline_overshoot_ms);
    }

    /// Coarse wait for `deadline`: a native thread sleep in realtime mode,
    /// which may wake late, or a jump in offline mode.
    pub fn sleep_until(&self, deadline: f64) {
        match self.mode {
            ClockMode::Offline => self.wake_at(deadline),
            ClockMode::Realtime => {
                let remaining = deadline - self.now();
                if remaining > 0.0 {
                    std::thread::sleep(Duration::from_secs_f64(remaining / 1000.0));
                }
            }
        }
    }

    /// Busy wait until `now() >= target` without yielding the thread.
    /// Returns the number of milliseconds spent waiting.
    pub fn spin_until(&self, target: f64) -> f64 {
        let start = self.now();
        match self.mode {
            ClockMode::Offline => {
                self.advance_to(target);
            }
            ClockMode::Realtime => {
                while self.now() < target {
                    std::hint::spin_loop();
                }
            }
        }
        self.now() - start
    }
}
