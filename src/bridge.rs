//! Controller-side handle for a countdown running on a worker thread.
//!
//! [`TimerWorker`] spawns the worker, turns method calls into protocol
//! frames, and dispatches incoming frames to the registered [`EventHook`]s.
//! Dispatch happens on the controller's thread whenever it pumps the reply
//! channel with [`TimerWorker::dispatch_pending`] or
//! [`TimerWorker::dispatch_next`].

use crate::config::RunnerConfig;
use crate::countdown::MIN_RESOLUTION_MS;
use crate::error::TimerError;
use crate::protocol::{EventKind, TimerMessage};
use crate::runner::spawn_runner_thread;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

/// Callback run for every incoming message of kind `on_event`.
pub struct EventHook {
    pub on_event: EventKind,
    pub execute: Box<dyn FnMut(&TimerMessage)>,
}

impl EventHook {
    pub fn new<F>(on_event: EventKind, execute: F) -> Self
    where
        F: FnMut(&TimerMessage) + 'static,
    {
        Self {
            on_event,
            execute: Box::new(execute),
        }
    }
}

pub struct TimerWorker {
    worker_id: String,
    requests: Option<Sender<String>>,
    replies: Option<Receiver<String>>,
    join_handle: Option<JoinHandle<()>>,
    hooks: Vec<EventHook>,
}

impl TimerWorker {
    /// Spawn a realtime worker and ask it to create a timer ticking every `resolution` ms.
    pub fn new(resolution: u32) -> Result<Self, TimerError> {
        Self::with_config(resolution, RunnerConfig::default())
    }

    /// Only the lower bound of `resolution` is checked here; a resolution the
    /// worker rejects leaves the worker without a timer.
    pub fn with_config(resolution: u32, config: RunnerConfig) -> Result<Self, TimerError> {
        if resolution < MIN_RESOLUTION_MS {
            return Err(TimerError::InvalidConfiguration { resolution });
        }

        let channels = spawn_runner_thread(config)?;
        let worker = Self {
            worker_id: Uuid::new_v4().to_string(),
            requests: Some(channels.requests),
            replies: Some(channels.replies),
            join_handle: Some(channels.join_handle),
            hooks: Vec::new(),
        };
        worker.post_message(&TimerMessage::Create {
            worker_id: worker.worker_id.clone(),
            resolution,
        })?;
        Ok(worker)
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Replace the dispatch table. Hooks run in the given order.
    pub fn register_hooks(&mut self, hooks: Vec<EventHook>) -> &mut Self {
        log::debug!("[{}] setting up message handlers", self.worker_id);
        self.hooks = hooks;
        self
    }

    pub fn start_timer(&self, milliseconds: u64) -> Result<(), TimerError> {
        self.post_message(&TimerMessage::Start {
            worker_id: self.worker_id.clone(),
            milliseconds: Some(milliseconds as f64),
        })
    }

    pub fn stop_timer(&self) -> Result<(), TimerError> {
        self.post_message(&TimerMessage::Stop {
            worker_id: self.worker_id.clone(),
        })
    }

    /// Send a raw protocol message to the worker.
    pub fn post_message(&self, message: &TimerMessage) -> Result<(), TimerError> {
        let frame = message.encode()?;
        self.requests
            .as_ref()
            .ok_or(TimerError::WorkerGone)?
            .send(frame)
            .map_err(|_| TimerError::WorkerGone)
    }

    /// Dispatch every message that has already arrived. Returns how many were handled.
    pub fn dispatch_pending(&mut self) -> Result<usize, TimerError> {
        let mut handled = 0;
        loop {
            let next = self
                .replies
                .as_ref()
                .ok_or(TimerError::WorkerGone)?
                .try_recv();
            match next {
                Ok(frame) => {
                    self.dispatch(&frame);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => return Ok(handled),
                Err(TryRecvError::Disconnected) => return Err(TimerError::WorkerGone),
            }
        }
    }

    /// Wait up to `timeout` for one message and dispatch it.
    /// Returns false if nothing arrived in time.
    pub fn dispatch_next(&mut self, timeout: Duration) -> Result<bool, TimerError> {
        let next = self
            .replies
            .as_ref()
            .ok_or(TimerError::WorkerGone)?
            .recv_timeout(timeout);
        match next {
            Ok(frame) => {
                self.dispatch(&frame);
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(TimerError::WorkerGone),
        }
    }

    fn dispatch(&mut self, frame: &str) {
        let message = match TimerMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("[{}] dropping malformed frame {:?}: {}", self.worker_id, frame, e);
                return;
            }
        };
        if let TimerMessage::Error { error_details } = &message {
            log::error!("[{}] error in worker: {}", self.worker_id, error_details);
            return;
        }
        let Some(kind) = message.kind() else {
            return;
        };
        for hook in self.hooks.iter_mut().filter(|hook| hook.on_event == kind) {
            (hook.execute)(&message);
        }
    }

    /// Tear down the worker. Pending ticks are lost and no further messages are dispatched.
    pub fn terminate(mut self) {
        self.close();
    }

    /// Like [`TimerWorker::terminate`], but keeps the handle. Every later
    /// send or dispatch returns [`TimerError::WorkerGone`].
    pub fn close(&mut self) {
        self.requests.take();
        self.replies.take();
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                log::error!("[{}] worker thread panicked", self.worker_id);
            }
        }
    }
}

impl Drop for TimerWorker {
    fn drop(&mut self) {
        self.close();
    }
}
