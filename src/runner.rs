//! Background runner
//!
//! [`TimerRunner`] is the worker side of the protocol: it owns at most one
//! [`Countdown`], created on the first `create` message, and relays the
//! countdown's events back as JSON frames. [`spawn_runner_thread`] hosts a
//! runner on a dedicated OS thread that blocks on its inbound channel until
//! the next timeout is due.

use crate::clock::{Clock, ClockMode};
use crate::config::RunnerConfig;
use crate::countdown::{Countdown, SharedTimeouts};
use crate::error::TimerError;
use crate::protocol::{ErrorCode, TimerMessage};
use crate::timeouts::TimeoutScheduler;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Upper bound on coarse wake-ups per `run_until_idle` call.
const MAX_WAKEUPS: usize = 1_000_000;

fn notify_controller(outbound: &Sender<String>, message: &TimerMessage) {
    let frame = match message.encode() {
        Ok(frame) => frame,
        Err(e) => {
            log::error!("failed to encode {:?}: {}", message, e);
            return;
        }
    };
    if outbound.send(frame).is_err() {
        log::debug!("controller is gone, dropping {:?}", message);
    }
}

fn is_start_frame(frame: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(frame)
        .map(|value| value.get("event").and_then(|event| event.as_str()) == Some("start"))
        .unwrap_or(false)
}

/// Round a wire duration to whole milliseconds, saturating at the `i64` range.
fn whole_milliseconds(milliseconds: f64) -> i64 {
    // Float-to-int `as` saturates and maps NaN to 0.
    milliseconds.round() as i64
}

pub struct TimerRunner {
    clock: Rc<Clock>,
    timeouts: SharedTimeouts,
    countdown: Option<Countdown>,
    outbound: Sender<String>,
}

impl TimerRunner {
    pub fn new(clock: Rc<Clock>, outbound: Sender<String>) -> Self {
        Self {
            clock,
            timeouts: Rc::new(RefCell::new(TimeoutScheduler::new())),
            countdown: None,
            outbound,
        }
    }

    pub fn clock(&self) -> &Rc<Clock> {
        &self.clock
    }

    pub fn countdown(&self) -> Option<&Countdown> {
        self.countdown.as_ref()
    }

    /// Decode and handle one inbound frame. Malformed frames are logged and
    /// dropped, except a `start` frame, which is answered as if it carried
    /// no duration.
    pub fn handle_frame(&mut self, frame: &str) {
        match TimerMessage::decode(frame) {
            Ok(message) => self.handle_message(message),
            Err(e) if is_start_frame(frame) => {
                log::warn!("start frame without a usable duration {:?}: {}", frame, e);
                self.start(None);
            }
            Err(e) => log::warn!("dropping malformed frame {:?}: {}", frame, e),
        }
    }

    pub fn handle_message(&mut self, message: TimerMessage) {
        match message {
            TimerMessage::Create {
                worker_id,
                resolution,
            } => self.create(&worker_id, resolution),
            TimerMessage::Start { milliseconds, .. } => self.start(milliseconds),
            TimerMessage::Stop { .. } => self.stop(),
            other => log::trace!("ignoring {:?}", other),
        }
    }

    fn create(&mut self, worker_id: &str, resolution: u32) {
        if self.countdown.is_some() {
            return;
        }
        let created = Countdown::new(
            worker_id,
            resolution,
            self.clock.clone(),
            self.timeouts.clone(),
        );
        let mut countdown = match created {
            Ok(countdown) => countdown,
            Err(e) => {
                log::error!("[worker: {}] could not create timer: {}", worker_id, e);
                return;
            }
        };
        let outbound = self.outbound.clone();
        countdown.add_listener(move |event| {
            log::trace!("timer event {:?}", event);
            notify_controller(&outbound, &TimerMessage::from(*event));
        });
        self.countdown = Some(countdown);
    }

    /// Only an absent duration is `seconds.missing`. A duration of 0 is a
    /// valid run that completes at once, unlike a plain truthiness check on
    /// the payload, which would reject it too.
    fn start(&mut self, milliseconds: Option<f64>) {
        let Some(countdown) = self.countdown.as_mut() else {
            return;
        };
        match milliseconds {
            Some(ms) => countdown.start(whole_milliseconds(ms)),
            None => {
                notify_controller(&self.outbound, &TimerMessage::error(ErrorCode::SecondsMissing))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(countdown) = self.countdown.as_mut() {
            countdown.stop();
        }
    }

    /// Deadline of the next pending timeout.
    pub fn next_deadline(&self) -> Option<f64> {
        self.timeouts.borrow().next_deadline()
    }

    /// Fire every timeout due at the current time, including ones scheduled
    /// by the callbacks themselves. Returns how many fired.
    pub fn fire_due(&mut self) -> usize {
        let mut fired = 0;
        loop {
            let now = self.clock.now();
            let due = self.timeouts.borrow_mut().pop_due(now);
            let Some((handle, settings)) = due else {
                break;
            };
            if let Some(countdown) = self.countdown.as_mut() {
                countdown.fire(handle, settings);
            }
            fired += 1;
        }
        fired
    }

    /// Keep waking up for pending timeouts until none are left.
    /// Returns the number of timeouts fired.
    pub fn run_until_idle(&mut self) -> usize {
        let mut fired = self.fire_due();
        let mut wakeups = 0;
        while let Some(deadline) = self.next_deadline() {
            if wakeups >= MAX_WAKEUPS {
                log::warn!("giving up after {} wake-ups with timeouts still pending", wakeups);
                break;
            }
            self.clock.sleep_until(deadline);
            fired += self.fire_due();
            wakeups += 1;
        }
        fired
    }
}

/// Endpoints of a running worker thread, as seen by the controller.
pub struct WorkerChannels {
    pub requests: Sender<String>,
    pub replies: Receiver<String>,
    pub join_handle: JoinHandle<()>,
}

/// Spawn a named thread hosting a [`TimerRunner`].
/// The thread exits once the request sender is dropped.
pub fn spawn_runner_thread(config: RunnerConfig) -> Result<WorkerChannels, TimerError> {
    let (request_tx, request_rx) = mpsc::channel::<String>();
    let (reply_tx, reply_rx) = mpsc::channel::<String>();

    let join_handle = std::thread::Builder::new()
        .name(config.thread_name.clone())
        .spawn(move || {
            let clock = Rc::new(config.build_clock());
            let mut runner = TimerRunner::new(clock, reply_tx);
            run_worker(&mut runner, &request_rx);
            log::debug!("worker thread {} exiting", config.thread_name);
        })?;

    Ok(WorkerChannels {
        requests: request_tx,
        replies: reply_rx,
        join_handle,
    })
}

/// Worker loop: handle inbound frames, fire due timeouts, wait for whichever comes first.
pub fn run_worker(runner: &mut TimerRunner, requests: &Receiver<String>) {
    loop {
        loop {
            match requests.try_recv() {
                Ok(frame) => runner.handle_frame(&frame),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        runner.fire_due();

        let Some(deadline) = runner.next_deadline() else {
            match requests.recv() {
                Ok(frame) => runner.handle_frame(&frame),
                Err(_) => return,
            }
            continue;
        };

        let clock = runner.clock().clone();
        match clock.mode {
            ClockMode::Offline => clock.wake_at(deadline),
            ClockMode::Realtime => {
                let remaining = (deadline - clock.now()).max(0.0);
                match requests.recv_timeout(Duration::from_secs_f64(remaining / 1000.0)) {
                    Ok(frame) => runner.handle_frame(&frame),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        }
    }
}
