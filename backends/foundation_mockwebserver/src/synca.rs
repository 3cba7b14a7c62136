//! Small synchronization helpers shared by the server and its handlers.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// `RunOnDrop` runs a function when it gets dropped, similar to go's defer.
pub struct RunOnDrop<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> RunOnDrop<F> {
    pub fn new(f: F) -> Self {
        Self(Some(f))
    }
}

impl<F: FnOnce()> Drop for RunOnDrop<F> {
    fn drop(&mut self) {
        if let Some(cb) = self.0.take() {
            cb();
        }
    }
}

/// Counts live worker threads so shutdown can wait, with a bound, for
/// all of them to exit.
#[derive(Clone, Default)]
pub struct WorkerTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Default)]
struct TrackerInner {
    active: Mutex<usize>,
    idle: Condvar,
}

impl TrackerInner {
    fn lock(&self) -> MutexGuard<'_, usize> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Held by a worker for its whole lifetime; dropping it, including while
/// unwinding from a panic, marks the worker finished.
pub struct WorkerGuard {
    inner: Arc<TrackerInner>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let mut active = self.inner.lock();
        *active = active.saturating_sub(1);
        let now_idle = *active == 0;
        drop(active);

        if now_idle {
            self.inner.idle.notify_all();
        }
    }
}

impl WorkerTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn enter(&self) -> WorkerGuard {
        *self.inner.lock() += 1;
        WorkerGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    #[must_use]
    pub fn active(&self) -> usize {
        *self.inner.lock()
    }

    /// Blocks until no worker is active or `timeout` elapses. Returns true
    /// when every worker exited.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = self.inner.lock();
        let (guard, _) = match self
            .inner
            .idle
            .wait_timeout_while(guard, timeout, |active| *active > 0)
        {
            Ok(result) => result,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_run_on_drop_runs_once() {
        let ran = AtomicBool::new(false);
        {
            let _guard = RunOnDrop::new(|| ran.store(true, Ordering::SeqCst));
        }
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_wait_idle_returns_when_workers_exit() {
        let tracker = WorkerTracker::new();
        let guard = tracker.enter();
        assert_eq!(tracker.active(), 1);

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(guard);
        });

        assert!(tracker.wait_idle(Duration::from_secs(5)));
        assert_eq!(tracker.active(), 0);
        worker.join().unwrap();
    }

    #[test]
    fn test_wait_idle_is_bounded() {
        let tracker = WorkerTracker::new();
        let _stuck = tracker.enter();
        assert!(!tracker.wait_idle(Duration::from_millis(30)));
    }
}
