//! Unbounded blocking FIFO with an explicit closed state.
//!
//! Consumers block on a condition variable until an item arrives or the
//! queue is closed, and are served in the order they started waiting.
//! Closing never drops queued items: they stay poppable and consumers only
//! see [`Popped::Closed`] once the queue is both closed and empty.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, PartialEq, Eq)]
pub enum Popped<T> {
    Value(T),
    Closed,
    TimedOut,
}

struct State<T> {
    items: VecDeque<T>,
    pushed: u64,
    closed: bool,
    waiters: VecDeque<u64>,
    next_waiter: u64,
}

impl<T> State<T> {
    fn leave(&mut self, waiter: u64) {
        self.waiters.retain(|id| *id != waiter);
    }
}

pub struct ClosableQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
}

impl<T> Default for ClosableQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ClosableQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                pushed: 0,
                closed: false,
                waiters: VecDeque::new(),
                next_waiter: 0,
            }),
            not_empty: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Appends `item`. Returns false, dropping the item, once closed.
    pub fn push(&self, item: T) -> bool {
        self.push_with(|_| item).is_some()
    }

    /// Builds the item from the number of items pushed before it and
    /// appends it, all under one lock, so the index handed to `make`
    /// always matches the item's position in push order.
    pub fn push_with<F>(&self, make: F) -> Option<u64>
    where
        F: FnOnce(u64) -> T,
    {
        let mut guard = self.lock();
        if guard.closed {
            return None;
        }

        let index = guard.pushed;
        guard.pushed += 1;
        guard.items.push_back(make(index));
        drop(guard);

        self.not_empty.notify_all();
        Some(index)
    }

    /// Blocks until an item is available or the queue is closed and empty.
    pub fn pop(&self) -> Popped<T> {
        self.pop_until(None)
    }

    /// Like [`Self::pop`] but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Popped<T> {
        self.pop_until(Some(Instant::now() + timeout))
    }

    fn pop_until(&self, deadline: Option<Instant>) -> Popped<T> {
        let mut guard = self.lock();
        if guard.waiters.is_empty() {
            if let Some(item) = guard.items.pop_front() {
                return Popped::Value(item);
            }
        }

        let waiter = guard.next_waiter;
        guard.next_waiter += 1;
        guard.waiters.push_back(waiter);

        let popped = loop {
            if guard.waiters.front() == Some(&waiter) {
                if let Some(item) = guard.items.pop_front() {
                    break Popped::Value(item);
                }
            }
            if guard.closed && guard.items.is_empty() {
                break Popped::Closed;
            }

            guard = match deadline {
                None => match self.not_empty.wait(guard) {
                    Ok(g) => g,
                    Err(e) => e.into_inner(),
                },
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break Popped::TimedOut;
                    }
                    match self.not_empty.wait_timeout(guard, deadline - now) {
                        Ok((g, _)) => g,
                        Err(e) => e.into_inner().0,
                    }
                }
            };
        };

        guard.leave(waiter);
        let more = !guard.items.is_empty() && !guard.waiters.is_empty();
        drop(guard);

        // The next waiter in line may now be first.
        if more || !matches!(popped, Popped::Value(_)) {
            self.not_empty.notify_all();
        }
        popped
    }

    /// Non-blocking pop. Yields nothing while blocked consumers are waiting
    /// for their turn.
    pub fn try_pop(&self) -> Option<T> {
        let mut guard = self.lock();
        if !guard.waiters.is_empty() {
            return None;
        }
        guard.items.pop_front()
    }

    /// Marks the queue closed and wakes every blocked consumer.
    pub fn close(&self) {
        let mut guard = self.lock();
        guard.closed = true;
        drop(guard);
        self.not_empty.notify_all();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of items ever accepted.
    #[must_use]
    pub fn pushed(&self) -> u64 {
        self.lock().pushed
    }
}

impl<T: Clone> ClosableQueue<T> {
    /// Clone of the head item without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        self.lock().items.front().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = ClosableQueue::new();
        queue.push("a");
        queue.push("b");
        assert_eq!(queue.peek(), Some("a"));
        assert_eq!(queue.pop(), Popped::Value("a"));
        assert_eq!(queue.pop(), Popped::Value("b"));
        assert_eq!(queue.pushed(), 2);
    }

    #[test]
    fn test_push_with_hands_out_push_index() {
        let queue = ClosableQueue::new();
        assert_eq!(queue.push_with(|index| index * 10), Some(0));
        assert_eq!(queue.push_with(|index| index * 10), Some(1));
        assert_eq!(queue.try_pop(), Some(0));
        assert_eq!(queue.try_pop(), Some(10));
    }

    #[test]
    fn test_close_drains_then_reports_closed() {
        let queue = ClosableQueue::new();
        queue.push(1);
        queue.close();
        assert!(!queue.push(2));
        assert_eq!(queue.pop(), Popped::Value(1));
        assert_eq!(queue.pop(), Popped::Closed);
    }

    #[test]
    fn test_pop_timeout_times_out() {
        let queue: ClosableQueue<u8> = ClosableQueue::new();
        let started = Instant::now();
        assert_eq!(queue.pop_timeout(Duration::from_millis(50)), Popped::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_close_wakes_blocked_consumer() {
        let queue: Arc<ClosableQueue<u8>> = Arc::new(ClosableQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(50));
        queue.close();
        assert_eq!(consumer.join().unwrap(), Popped::Closed);
    }

    #[test]
    fn test_consumers_are_served_in_waiting_order() {
        let queue: Arc<ClosableQueue<u8>> = Arc::new(ClosableQueue::new());
        let spawn_consumer = || {
            let queue = Arc::clone(&queue);
            let consumer = thread::spawn(move || queue.pop_timeout(Duration::from_secs(5)));
            thread::sleep(Duration::from_millis(50));
            consumer
        };
        let first = spawn_consumer();
        let second = spawn_consumer();

        queue.push(1);
        queue.push(2);
        assert_eq!(first.join().unwrap(), Popped::Value(1));
        assert_eq!(second.join().unwrap(), Popped::Value(2));
    }

    #[test]
    fn test_timed_out_consumer_gives_up_its_turn() {
        let queue: Arc<ClosableQueue<u8>> = Arc::new(ClosableQueue::new());
        let impatient = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_timeout(Duration::from_millis(20)))
        };
        thread::sleep(Duration::from_millis(10));
        let patient = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_timeout(Duration::from_secs(5)))
        };

        assert_eq!(impatient.join().unwrap(), Popped::TimedOut);
        queue.push(7);
        assert_eq!(patient.join().unwrap(), Popped::Value(7));
    }

    #[test]
    fn test_blocked_consumer_receives_pushed_item() {
        let queue: Arc<ClosableQueue<u8>> = Arc::new(ClosableQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_timeout(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(50));
        queue.push(9);
        assert_eq!(consumer.join().unwrap(), Popped::Value(9));
    }
}
