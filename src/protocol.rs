//! Message protocol between the controller and the worker.
//!
//! Messages travel as JSON objects tagged by their `event` field:
//!
//! | event     | fields                    |
//! |-----------|---------------------------|
//! | create    | workerId, resolution      |
//! | start     | workerId, milliseconds    |
//! | stop      | workerId                  |
//! | tick      | millisecondsLeft          |
//! | completed |                           |
//! | error     | errorDetails              |
//!
//! Any other `event` value decodes to [`TimerMessage::Unknown`].

use crate::countdown::{TimerEvent, DEFAULT_RESOLUTION_MS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Worker id used when a message does not name one.
pub const DEFAULT_WORKER_ID: &str = "none";

fn default_worker_id() -> String {
    DEFAULT_WORKER_ID.to_string()
}

fn default_resolution() -> u32 {
    DEFAULT_RESOLUTION_MS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum TimerMessage {
    Create {
        #[serde(default = "default_worker_id")]
        worker_id: String,
        #[serde(default = "default_resolution")]
        resolution: u32,
    },
    Start {
        #[serde(default = "default_worker_id")]
        worker_id: String,
        /// Any JSON number; the runner rounds it to whole milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        milliseconds: Option<f64>,
    },
    Stop {
        #[serde(default = "default_worker_id")]
        worker_id: String,
    },
    Tick {
        milliseconds_left: i64,
    },
    Completed,
    Error {
        error_details: String,
    },
    #[serde(other)]
    Unknown,
}

/// Discriminant of a [`TimerMessage`], used to filter event hooks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    Start,
    Stop,
    Tick,
    Completed,
    Error,
}

/// Error codes carried by `error` messages.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// A `start` message arrived without a duration.
    SecondsMissing,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SecondsMissing => "seconds.missing",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TimerMessage {
    pub fn error(code: ErrorCode) -> Self {
        TimerMessage::Error {
            error_details: code.as_str().to_string(),
        }
    }

    /// Kind of this message, `None` for unknown events.
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            TimerMessage::Create { .. } => Some(EventKind::Create),
            TimerMessage::Start { .. } => Some(EventKind::Start),
            TimerMessage::Stop { .. } => Some(EventKind::Stop),
            TimerMessage::Tick { .. } => Some(EventKind::Tick),
            TimerMessage::Completed => Some(EventKind::Completed),
            TimerMessage::Error { .. } => Some(EventKind::Error),
            TimerMessage::Unknown => None,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

impl From<TimerEvent> for TimerMessage {
    fn from(event: TimerEvent) -> Self {
        match event {
            TimerEvent::Tick { milliseconds_left } => TimerMessage::Tick { milliseconds_left },
            TimerEvent::Completed => TimerMessage::Completed,
        }
    }
}
