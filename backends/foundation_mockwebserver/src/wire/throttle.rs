use std::thread;

use crate::response::Throttle;

/// Splits a transfer into throttle windows.
///
/// The pause for a full window is taken lazily, right before the next
/// byte moves, so a transfer that ends exactly on a window boundary never
/// sleeps after its last byte.
#[derive(Debug)]
pub struct Throttler {
    throttle: Option<Throttle>,
    in_window: usize,
}

impl Throttler {
    #[must_use]
    pub fn new(throttle: Option<Throttle>) -> Self {
        Self {
            throttle,
            in_window: 0,
        }
    }

    /// How many of `wanted` bytes may move now, sleeping first when the
    /// current window is already full.
    pub fn allowance(&mut self, wanted: usize) -> usize {
        let Some(throttle) = self.throttle else {
            return wanted;
        };

        if self.in_window >= throttle.bytes_per_period {
            thread::sleep(throttle.period);
            self.in_window = 0;
        }

        wanted.min(throttle.bytes_per_period - self.in_window)
    }

    pub fn consumed(&mut self, bytes: usize) {
        if self.throttle.is_some() {
            self.in_window += bytes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_unthrottled_allows_everything() {
        let mut throttler = Throttler::new(None);
        assert_eq!(throttler.allowance(4096), 4096);
    }

    #[test]
    fn test_six_bytes_in_windows_of_three_sleep_once() {
        let mut throttler = Throttler::new(Some(Throttle::new(3, Duration::from_millis(100))));
        let started = Instant::now();

        let mut remaining = 6;
        let mut windows = Vec::new();
        while remaining > 0 {
            let allowed = throttler.allowance(remaining);
            throttler.consumed(allowed);
            windows.push(allowed);
            remaining -= allowed;
        }

        let elapsed = started.elapsed();
        assert_eq!(windows, vec![3, 3]);
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(200));
    }
}
