//! In-flight work counter shared by the ingestion and delivery pipelines.
//!
//! One unit per queued hint while it sits in the ingestion queue or is being
//! reconciled, and one unit per event batch while it waits for or undergoes
//! delivery. Ingestion adds the batch's unit before releasing the hint's, so
//! the counter never touches zero between the two stages.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Counts outstanding units of pipeline work; waiters block until it is zero.
#[derive(Default)]
pub struct InFlight {
    pending: Mutex<u64>,
    idle: Condvar,
}

impl InFlight {
    /// Counter starting idle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one unit before handing work to a queue.
    pub fn begin(&self) {
        *self.pending.lock() += 1;
    }

    /// Release `units` and wake waiters once nothing is pending.
    pub fn finish(&self, units: u64) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(units);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    /// Units outstanding right now.
    #[must_use]
    pub fn pending(&self) -> u64 {
        *self.pending.lock()
    }

    /// Block until nothing is pending.
    pub fn wait_idle(&self) {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            self.idle.wait(&mut pending);
        }
    }

    /// Returns `false` if work was still pending at the deadline.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while *pending > 0 {
            if self.idle.wait_until(&mut pending, deadline).timed_out() {
                return *pending == 0;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn idle_when_nothing_pending() {
        let counter = InFlight::new();
        counter.wait_idle();
        assert!(counter.wait_idle_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn waits_for_release_from_another_thread() {
        let counter = Arc::new(InFlight::new());
        counter.begin();
        counter.begin();
        assert_eq!(counter.pending(), 2);
        assert!(!counter.wait_idle_timeout(Duration::from_millis(10)));

        let worker = Arc::clone(&counter);
        let join = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            worker.finish(2);
        });
        counter.wait_idle();
        assert_eq!(counter.pending(), 0);
        join.join().unwrap();
    }

    #[test]
    fn over_release_saturates() {
        let counter = InFlight::new();
        counter.begin();
        counter.finish(5);
        assert_eq!(counter.pending(), 0);
    }
}
