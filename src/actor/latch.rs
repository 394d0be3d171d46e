use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// One-shot countdown latch: waiters are released once the count reaches zero.
#[derive(Debug)]
pub struct Latch {
    count: Mutex<usize>,
    zero: Condvar,
}

impl Latch {
    /// Create a latch that opens after `count` calls to [`Latch::count_down`].
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    /// Decrement the count, waking waiters when it reaches zero. Saturates at zero.
    pub fn count_down(&self) {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            if *count == 0 {
                self.zero.notify_all();
            }
        }
    }

    /// Current count.
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Wait for the count to reach zero. Returns `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.zero.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}
