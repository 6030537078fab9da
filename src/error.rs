use thiserror::Error;

/// Errors surfaced synchronously to callers of the engine and the bridge.
#[derive(Debug, Error)]
pub enum TimerError {
    #[error("timer resolution must be between 10 and 1000 ms, got {resolution}")]
    InvalidConfiguration { resolution: u32 },
    #[error("worker thread is no longer running")]
    WorkerGone,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("protocol encoding error: {0}")]
    Protocol(#[from] serde_json::Error),
}
