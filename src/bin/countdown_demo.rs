//! Countdown demo
//!
//! Runs a countdown on a worker thread and renders the remaining
//! milliseconds on stdout as ticks arrive.
//!
//! Usage:
//!   cargo run --bin countdown_demo -- --seconds 3 --resolution 100
//!   cargo run --bin countdown_demo -- --seconds 5 --pause-after 1500 --verbose
//!   cargo run --bin countdown_demo -- --seconds 5 --stop-after 2000

use countdown_worker::{EventHook, EventKind, TimerMessage, TimerWorker};
use std::cell::Cell;
use std::env;
use std::io::Write;
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime};

/// How long a paused countdown stays paused before resuming.
const PAUSE_LENGTH: Duration = Duration::from_millis(1000);

/// Slack on top of two resolutions before a silent worker is given up on.
const IDLE_GRACE: Duration = Duration::from_millis(1000);

/// How long `pump` waits for the next message before giving up.
fn idle_limit(resolution: u32) -> Duration {
    Duration::from_millis(2 * resolution as u64) + IDLE_GRACE
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum TimerState {
    Stopped,
    Running,
    Paused,
}

/// Foreground controller: owns the worker and the displayed remaining time.
struct Controller {
    worker: TimerWorker,
    state: Rc<Cell<TimerState>>,
    remaining: Rc<Cell<i64>>,
    total_ms: i64,
    idle_limit: Duration,
}

impl Controller {
    fn new(total_ms: i64, resolution: u32) -> Result<Self, Box<dyn std::error::Error>> {
        let mut worker = TimerWorker::new(resolution)?;
        let state = Rc::new(Cell::new(TimerState::Stopped));
        let remaining = Rc::new(Cell::new(total_ms));

        let tick_remaining = remaining.clone();
        let done_state = state.clone();
        worker.register_hooks(vec![
            EventHook::new(EventKind::Tick, move |msg| {
                if let TimerMessage::Tick { milliseconds_left } = msg {
                    tick_remaining.set(*milliseconds_left);
                    render(*milliseconds_left);
                }
            }),
            EventHook::new(EventKind::Completed, move |_| {
                done_state.set(TimerState::Stopped);
                println!();
                println!("Countdown complete.");
            }),
        ]);
        render(total_ms);

        Ok(Self {
            worker,
            state,
            remaining,
            total_ms,
            idle_limit: idle_limit(resolution),
        })
    }

    fn start(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.state.get() != TimerState::Running {
            self.state.set(TimerState::Running);
            let remaining = self.remaining.get().max(0) as u64;
            self.worker.start_timer(remaining)?;
        }
        Ok(())
    }

    fn pause(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.worker.stop_timer()?;
        self.state.set(TimerState::Paused);
        Ok(())
    }

    fn stop(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.worker.stop_timer()?;
        self.state.set(TimerState::Stopped);
        self.remaining.set(self.total_ms);
        render(self.total_ms);
        Ok(())
    }

    /// Dispatch worker messages until the countdown leaves the running state
    /// or `budget` has elapsed. Without a budget, a worker that stays silent
    /// for longer than `idle_limit` ends the wait and the countdown.
    fn pump(&mut self, budget: Option<Duration>) -> Result<(), Box<dyn std::error::Error>> {
        let started = Instant::now();
        let mut last_message = Instant::now();
        while self.state.get() == TimerState::Running {
            let wait = match budget {
                Some(budget) => match budget.checked_sub(started.elapsed()) {
                    Some(left) => left,
                    None => break,
                },
                None => Duration::from_millis(100),
            };
            if self.worker.dispatch_next(wait)? {
                last_message = Instant::now();
            } else if budget.is_none() && last_message.elapsed() >= self.idle_limit {
                println!();
                eprintln!(
                    "No message from the worker for {} ms; it may have rejected the resolution.",
                    self.idle_limit.as_millis()
                );
                self.state.set(TimerState::Stopped);
            }
        }
        Ok(())
    }
}

fn render(milliseconds: i64) {
    print!("\r{:>8} ms", milliseconds);
    let _ = std::io::stdout().flush();
}

fn setup_logger(level: log::LevelFilter) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339_millis(SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

fn print_usage() {
    println!("Countdown Worker - Demo");
    println!("=======================");
    println!();
    println!("Usage:");
    println!("  cargo run --bin countdown_demo -- [options]");
    println!();
    println!("Options:");
    println!("  --seconds, -s N       Countdown length in seconds (default 3)");
    println!("  --resolution, -r MS   Tick interval in milliseconds (default 100)");
    println!("  --pause-after, -p MS  Pause once after MS milliseconds, then resume");
    println!("  --stop-after, -x MS   Stop and reset after MS more milliseconds");
    println!("  --verbose, -v         Log timer diagnostics to stderr");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut seconds: f64 = 3.0;
    let mut resolution: u32 = 100;
    let mut pause_after: Option<u64> = None;
    let mut stop_after: Option<u64> = None;
    let mut verbose = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--seconds" | "-s" => {
                i += 1;
                if i < args.len() {
                    seconds = args[i].parse()?;
                }
            }
            "--resolution" | "-r" => {
                i += 1;
                if i < args.len() {
                    resolution = args[i].parse()?;
                }
            }
            "--pause-after" | "-p" => {
                i += 1;
                if i < args.len() {
                    pause_after = Some(args[i].parse()?);
                }
            }
            "--stop-after" | "-x" => {
                i += 1;
                if i < args.len() {
                    stop_after = Some(args[i].parse()?);
                }
            }
            "--verbose" | "-v" => {
                verbose = true;
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => {
                print_usage();
                return Err(format!("Unknown argument {}", other).into());
            }
        }
        i += 1;
    }

    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!("Invalid duration {}. Must be a non-negative number.", seconds).into());
    }

    let level = if verbose {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Warn
    };
    setup_logger(level)?;

    let total_ms = (seconds * 1000.0).round() as i64;
    let mut controller = Controller::new(total_ms, resolution)?;

    controller.start()?;
    if let Some(pause_after) = pause_after {
        controller.pump(Some(Duration::from_millis(pause_after)))?;
        if controller.state.get() == TimerState::Running {
            controller.pause()?;
            println!();
            println!("Paused at {} ms.", controller.remaining.get());
            std::thread::sleep(PAUSE_LENGTH);
            // Deliver ticks that raced the pause before resuming.
            controller.worker.dispatch_pending()?;
            println!("Resuming.");
            controller.start()?;
        }
    }
    match stop_after {
        Some(stop_after) => {
            controller.pump(Some(Duration::from_millis(stop_after)))?;
            if controller.state.get() == TimerState::Running {
                controller.stop()?;
                println!();
                println!("Stopped, reset to {} ms.", controller.remaining.get());
            }
        }
        None => controller.pump(None)?,
    }

    controller.worker.terminate();
    Ok(())
}
