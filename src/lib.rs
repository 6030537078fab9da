//! Countdown Worker
//!
//! A countdown timer that runs on a background worker thread and reports to
//! a controller through a small JSON message protocol:
//! - Drift-corrected ticks (coarse timeout that wakes early + a short spin)
//! - One countdown per worker, created lazily on the first `create` message
//! - Controller-side hooks dispatched in registration order
//! - Realtime and offline clocks (offline runs are deterministic and instant)

pub mod clock;
pub mod timeouts;
pub mod error;
pub mod countdown;
pub mod protocol;
pub mod config;
pub mod runner;
pub mod bridge;


pub use bridge::{EventHook, TimerWorker};
pub use clock::{Clock, ClockMode};
pub use config::RunnerConfig;
pub use countdown::{Countdown, CountdownSettings, TimerEvent, DRIFT_CORRECTION};
pub use error::TimerError;
pub use protocol::{ErrorCode, EventKind, TimerMessage};
pub use runner::{spawn_runner_thread, TimerRunner};
