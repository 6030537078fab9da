//! Countdown engine
//!
//! Counts a duration down in steps of `resolution` milliseconds and reports
//! each step as a [`TimerEvent::Tick`], followed by a single
//! [`TimerEvent::Completed`].
//!
//! Ticks are placed with two-stage calibration:
//! - the coarse timeout is requested for `DRIFT_CORRECTION` of the remaining
//!   time to the expected tick, so it reliably wakes up early
//! - on wake-up the engine spins on the clock until the expected tick time
//!
//! The expected time of the next tick is always derived from the previous
//! expected time, never from when the callback actually ran, so lateness of
//! one tick does not shift the ones after it.

use crate::clock::Clock;
use crate::error::TimerError;
use crate::timeouts::{TimeoutHandle, TimeoutScheduler};
use std::cell::RefCell;
use std::rc::Rc;
use uuid::Uuid;

/// Fraction of the nominal delay requested from the coarse timeout.
pub const DRIFT_CORRECTION: f64 = 0.875;

pub const MIN_RESOLUTION_MS: u32 = 10;
pub const MAX_RESOLUTION_MS: u32 = 1000;
pub const DEFAULT_RESOLUTION_MS: u32 = 1000;

/// State of one run, carried from tick to tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CountdownSettings {
    pub start_time: f64,
    pub end_time: f64,
    pub milliseconds_left: i64,
    pub next_expected_tick_at: f64,
}

/// Event emitted by a running countdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerEvent {
    Tick { milliseconds_left: i64 },
    Completed,
}

/// Timeout queue shared between a countdown and the loop that fires it.
pub type SharedTimeouts = Rc<RefCell<TimeoutScheduler<CountdownSettings>>>;

type Listener = Box<dyn FnMut(&TimerEvent)>;

pub struct Countdown {
    timer_id: Uuid,
    worker_id: String,
    resolution: u32,
    clock: Rc<Clock>,
    timeouts: SharedTimeouts,
    /// The currently pending tick callback, if any.
    pending: Option<TimeoutHandle>,
    listeners: Vec<Listener>,
}

impl Countdown {
    /// Create a countdown ticking every `resolution` ms.
    /// Fails unless `resolution` lies in `[10, 1000]`.
    pub fn new(
        worker_id: &str,
        resolution: u32,
        clock: Rc<Clock>,
        timeouts: SharedTimeouts,
    ) -> Result<Self, TimerError> {
        if !(MIN_RESOLUTION_MS..=MAX_RESOLUTION_MS).contains(&resolution) {
            return Err(TimerError::InvalidConfiguration { resolution });
        }
        let countdown = Self {
            timer_id: Uuid::new_v4(),
            worker_id: worker_id.to_string(),
            resolution,
            clock,
            timeouts,
            pending: None,
            listeners: Vec::new(),
        };
        log::debug!("{} created timer, resolution {} ms", countdown.prefix(), resolution);
        Ok(countdown)
    }

    pub fn timer_id(&self) -> Uuid {
        self.timer_id
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Whether a tick callback is currently pending.
    pub fn is_running(&self) -> bool {
        self.pending.is_some()
    }

    /// Register an event listener. Listeners run in registration order.
    pub fn add_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&TimerEvent) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Start counting down `milliseconds`. Restarts if a run is already active.
    /// A duration `<= 0` completes immediately.
    pub fn start(&mut self, milliseconds: i64) {
        log::debug!("{} starting timer for {} ms", self.prefix(), milliseconds);
        self.cancel_pending();

        let now = self.clock.now();
        let total = milliseconds as f64;
        self.schedule_next_tick(CountdownSettings {
            start_time: now,
            end_time: now + total,
            milliseconds_left: milliseconds,
            next_expected_tick_at: now + self.resolution as f64,
        });
    }

    /// Cancel the pending tick, if any. Emits nothing.
    pub fn stop(&mut self) {
        if self.cancel_pending() {
            log::debug!("{} stopped timer", self.prefix());
        }
    }

    /// Entry point of the scheduled callback. Timeouts that are not the
    /// currently pending one are ignored.
    pub fn fire(&mut self, handle: TimeoutHandle, settings: CountdownSettings) {
        if self.pending != Some(handle) {
            log::trace!("{} ignoring stale timeout {}", self.prefix(), handle.id());
            return;
        }
        self.pending = None;
        self.countdown(settings);
    }

    fn cancel_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) => self.timeouts.borrow_mut().clear_timeout(handle),
            None => false,
        }
    }

    fn schedule_next_tick(&mut self, settings: CountdownSettings) {
        if settings.milliseconds_left > 0 {
            let now = self.clock.now();
            let delay = ((settings.next_expected_tick_at - now) * DRIFT_CORRECTION).floor();
            let handle = self
                .timeouts
                .borrow_mut()
                .set_timeout(now, delay, settings);
            self.pending = Some(handle);
            log::trace!(
                "{} scheduled next countdown in {} ms at {:.3}",
                self.prefix(),
                delay,
                now
            );
        } else {
            self.emit(TimerEvent::Completed);
            let now = self.clock.now();
            log::debug!(
                "{} completed timer at {:.3}, {:.3} ms late",
                self.prefix(),
                now,
                now - settings.end_time
            );
        }
    }

    fn countdown(&mut self, settings: CountdownSettings) {
        let busy = self.clock.spin_until(settings.next_expected_tick_at);

        let resolution = self.resolution as i64;
        let next = CountdownSettings {
            milliseconds_left: settings.milliseconds_left - resolution,
            next_expected_tick_at: settings.next_expected_tick_at + resolution as f64,
            ..settings
        };

        self.emit(TimerEvent::Tick {
            milliseconds_left: next.milliseconds_left,
        });
        log::trace!(
            "{} tick {} ms left, drift {:.3} ms, busy waited {:.3} ms",
            self.prefix(),
            next.milliseconds_left,
            self.clock.now() - settings.next_expected_tick_at,
            busy
        );

        self.schedule_next_tick(next);
    }

    fn emit(&mut self, event: TimerEvent) {
        for listener in self.listeners.iter_mut() {
            listener(&event);
        }
    }

    fn prefix(&self) -> String {
        format!("[timer: {}, worker: {}]", self.timer_id, self.worker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockMode;

    fn offline_countdown(resolution: u32) -> (Countdown, Rc<Clock>, SharedTimeouts) {
        let clock = Rc::new(Clock::new(ClockMode::Offline));
        let timeouts: SharedTimeouts = Rc::new(RefCell::new(TimeoutScheduler::new()));
        let countdown = Countdown::new("test", resolution, clock.clone(), timeouts.clone())
            .expect("valid resolution");
        (countdown, clock, timeouts)
    }

    fn record(countdown: &mut Countdown) -> Rc<RefCell<Vec<TimerEvent>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let e = events.clone();
        countdown.add_listener(move |event| e.borrow_mut().push(*event));
        events
    }

    /// Fire the next due timeout, advancing offline time to its deadline.
    fn fire_next(countdown: &mut Countdown, clock: &Clock, timeouts: &SharedTimeouts) -> bool {
        let Some(deadline) = timeouts.borrow().next_deadline() else {
            return false;
        };
        clock.wake_at(deadline);
        let due = timeouts.borrow_mut().pop_due(clock.now());
        if let Some((handle, settings)) = due {
            countdown.fire(handle, settings);
        }
        true
    }

    #[test]
    fn test_resolution_bounds() {
        let clock = Rc::new(Clock::new(ClockMode::Offline));
        let timeouts: SharedTimeouts = Rc::new(RefCell::new(TimeoutScheduler::new()));
        for resolution in [10, 11, 500, 999, 1000] {
            assert!(Countdown::new("w", resolution, clock.clone(), timeouts.clone()).is_ok());
        }
        for resolution in [0, 9, 1001, 5000] {
            let err = Countdown::new("w", resolution, clock.clone(), timeouts.clone());
            assert!(matches!(
                err,
                Err(TimerError::InvalidConfiguration { resolution: r }) if r == resolution
            ));
        }
    }

    #[test]
    fn test_first_delay_undershoots() {
        let (mut countdown, _clock, timeouts) = offline_countdown(100);
        countdown.start(300);
        // floor(100 * 0.875) = 87
        assert_eq!(timeouts.borrow().next_deadline(), Some(87.0));
        assert!(countdown.is_running());
    }

    #[test]
    fn test_tick_lands_on_expected_time() {
        let (mut countdown, clock, timeouts) = offline_countdown(100);
        let events = record(&mut countdown);
        countdown.start(200);

        assert!(fire_next(&mut countdown, &clock, &timeouts));
        // The coarse wake-up was at 87 ms; the spin carried it to exactly 100 ms.
        assert!((clock.now() - 100.0).abs() < 1e-10);
        assert_eq!(
            *events.borrow(),
            vec![TimerEvent::Tick { milliseconds_left: 100 }]
        );
        // Second delay is measured from 100 to 200: floor(100 * 0.875)
        assert_eq!(timeouts.borrow().next_deadline(), Some(187.0));
    }

    #[test]
    fn test_zero_duration_completes_immediately() {
        let (mut countdown, _clock, timeouts) = offline_countdown(250);
        let events = record(&mut countdown);
        countdown.start(0);
        assert_eq!(*events.borrow(), vec![TimerEvent::Completed]);
        assert!(!countdown.is_running());
        assert!(!timeouts.borrow().has_pending());
    }

    #[test]
    fn test_stop_without_run_is_noop() {
        let (mut countdown, _clock, _timeouts) = offline_countdown(100);
        let events = record(&mut countdown);
        countdown.stop();
        countdown.stop();
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_stop_cancels_pending_tick() {
        let (mut countdown, clock, timeouts) = offline_countdown(100);
        let events = record(&mut countdown);
        countdown.start(500);
        fire_next(&mut countdown, &clock, &timeouts);
        countdown.stop();

        assert!(!countdown.is_running());
        assert!(!fire_next(&mut countdown, &clock, &timeouts));
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn test_restart_replaces_schedule() {
        let (mut countdown, clock, timeouts) = offline_countdown(100);
        let events = record(&mut countdown);
        countdown.start(1000);
        countdown.start(100);
        assert!(timeouts.borrow().has_pending());

        while fire_next(&mut countdown, &clock, &timeouts) {}
        assert_eq!(
            *events.borrow(),
            vec![
                TimerEvent::Tick { milliseconds_left: 0 },
                TimerEvent::Completed
            ]
        );
    }

    #[test]
    fn test_timeout_popped_before_stop_is_ignored() {
        let (mut countdown, clock, timeouts) = offline_countdown(100);
        let events = record(&mut countdown);
        countdown.start(300);

        let deadline = timeouts.borrow().next_deadline().unwrap();
        clock.wake_at(deadline);
        let (handle, settings) = timeouts.borrow_mut().pop_due(clock.now()).unwrap();
        countdown.stop();

        countdown.fire(handle, settings);
        assert!(events.borrow().is_empty());
        assert!(!countdown.is_running());
        assert!(!timeouts.borrow().has_pending());
    }

    #[test]
    fn test_negative_duration_completes_immediately() {
        let (mut countdown, _clock, _timeouts) = offline_countdown(100);
        let events = record(&mut countdown);
        countdown.start(-20);
        assert_eq!(*events.borrow(), vec![TimerEvent::Completed]);
    }

    #[test]
    fn test_longest_duration_ticks() {
        let (mut countdown, clock, timeouts) = offline_countdown(100);
        let events = record(&mut countdown);
        countdown.start(i64::MAX);

        assert!(fire_next(&mut countdown, &clock, &timeouts));
        assert_eq!(
            *events.borrow(),
            vec![TimerEvent::Tick { milliseconds_left: i64::MAX - 100 }]
        );
        assert!(countdown.is_running());
    }

    #[test]
    fn test_non_multiple_duration_goes_negative_once() {
        let (mut countdown, clock, timeouts) = offline_countdown(100);
        let events = record(&mut countdown);
        countdown.start(250);
        while fire_next(&mut countdown, &clock, &timeouts) {}
        assert_eq!(
            *events.borrow(),
            vec![
                TimerEvent::Tick { milliseconds_left: 150 },
                TimerEvent::Tick { milliseconds_left: 50 },
                TimerEvent::Tick { milliseconds_left: -50 },
                TimerEvent::Completed,
            ]
        );
    }
}
