//! Timeout Scheduler
//!
//! The coarse delayed-callback primitive of a worker: callers register a
//! payload to be delivered after a delay and get back an opaque handle that
//! can cancel it. The owning loop asks for the deadline, sleeps until
//! roughly then, and pops the payload once it is due.
//!
//! A worker runs one countdown and a countdown keeps one tick callback
//! pending, so the scheduler holds a single slot.

/// Opaque handle of a pending timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimeoutHandle(u64);

impl TimeoutHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// At most one pending timeout carrying a payload of type `M`.
pub struct TimeoutScheduler<M> {
    /// Next handle id. Starts at 1 so no handle is ever 0.
    next_id: u64,
    pending: Option<(TimeoutHandle, f64, M)>,
}

impl<M> Default for TimeoutScheduler<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> TimeoutScheduler<M> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: None,
        }
    }

    /// Schedule `meta` to become due `delay_ms` after `now`, replacing any
    /// pending timeout. Negative delays are treated as 0.
    pub fn set_timeout(&mut self, now: f64, delay_ms: f64, meta: M) -> TimeoutHandle {
        let handle = TimeoutHandle(self.next_id);
        self.next_id += 1;
        let delay = if delay_ms.is_finite() { delay_ms.max(0.0) } else { 0.0 };
        if let Some((replaced, _, _)) = self.pending.replace((handle, now + delay, meta)) {
            log::trace!("timeout {} replaced by {}", replaced.id(), handle.id());
        }
        handle
    }

    /// Cancel a pending timeout. Returns false if it already fired or was cleared.
    pub fn clear_timeout(&mut self, handle: TimeoutHandle) -> bool {
        match &self.pending {
            Some((pending, _, _)) if *pending == handle => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Deadline of the pending timeout.
    pub fn next_deadline(&self) -> Option<f64> {
        self.pending.as_ref().map(|(_, deadline, _)| *deadline)
    }

    /// Take the pending timeout if its deadline is `<= now`.
    pub fn pop_due(&mut self, now: f64) -> Option<(TimeoutHandle, M)> {
        if self.next_deadline()? > now {
            return None;
        }
        self.pending.take().map(|(handle, _, meta)| (handle, meta))
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique_and_nonzero() {
        let mut sched: TimeoutScheduler<()> = TimeoutScheduler::new();
        let a = sched.set_timeout(0.0, 10.0, ());
        let b = sched.set_timeout(0.0, 10.0, ());
        assert_ne!(a, b);
        assert!(a.id() > 0 && b.id() > 0);
    }

    #[test]
    fn test_pop_due_respects_deadline() {
        let mut sched = TimeoutScheduler::new();
        sched.set_timeout(100.0, 50.0, "a");

        assert_eq!(sched.next_deadline(), Some(150.0));
        assert!(sched.pop_due(149.9).is_none());

        let (_, meta) = sched.pop_due(150.0).unwrap();
        assert_eq!(meta, "a");
        assert!(!sched.has_pending());
    }

    #[test]
    fn test_negative_delay_is_due_immediately() {
        let mut sched = TimeoutScheduler::new();
        sched.set_timeout(10.0, -5.0, 1);
        assert_eq!(sched.next_deadline(), Some(10.0));
        assert!(sched.pop_due(10.0).is_some());
    }

    #[test]
    fn test_clear_timeout() {
        let mut sched = TimeoutScheduler::new();
        let h = sched.set_timeout(0.0, 10.0, 1);
        assert!(sched.clear_timeout(h));
        assert!(!sched.has_pending());

        // Clearing twice is harmless
        assert!(!sched.clear_timeout(h));
        assert!(sched.pop_due(1000.0).is_none());
    }

    #[test]
    fn test_set_timeout_replaces_pending() {
        let mut sched = TimeoutScheduler::new();
        let first = sched.set_timeout(0.0, 10.0, "first");
        let second = sched.set_timeout(0.0, 50.0, "second");

        // The replaced handle no longer cancels anything.
        assert!(!sched.clear_timeout(first));
        assert_eq!(sched.next_deadline(), Some(50.0));
        assert!(sched.pop_due(10.0).is_none());
        assert_eq!(sched.pop_due(50.0), Some((second, "second")));
    }
}
