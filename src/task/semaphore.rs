//! Semaphore (spec §4.E "Semaphore (example of higher-level primitive):
//! counter + wait queue. `lock`: if count > 0, decrement; else suspend on
//! the queue (reason Mutex). `unlock`: if queue empty, increment; else wake
//! one.").
//!
//! A `Spin`-protected counter plus a `WaitQueue`, deliberately simpler than
//! a generic `LockStrategy`/condvar-backed design — this core has no async
//! runtime to hang a condvar off of.

use alloc::sync::Arc;

use rainbow_sync::Spin;

use super::wait_queue::WaitQueue;
use super::{Task, TaskState};

pub struct Semaphore {
    count: Spin<isize>,
    waiters: WaitQueue,
}

impl Semaphore {
    pub const fn new(initial: isize) -> Self {
        Self {
            count: Spin::new(initial),
            waiters: WaitQueue::new(),
        }
    }

    /// Blocks `current` until a unit is available.
    pub fn lock(&self, current: Arc<Task>) {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            return;
        }
        drop(count);
        self.waiters.suspend(current, TaskState::Mutex);
    }

    /// Non-blocking variant; returns `true` if a unit was acquired.
    pub fn try_lock(&self) -> bool {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    pub fn unlock(&self) {
        if self.waiters.is_empty() {
            *self.count.lock() += 1;
        } else {
            self.waiters.wakeup_n(1);
        }
    }

    pub fn count(&self) -> isize {
        *self.count.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_lock_consumes_available_units() {
        let sem = Semaphore::new(2);
        assert!(sem.try_lock());
        assert!(sem.try_lock());
        assert!(!sem.try_lock());
    }

    #[test]
    fn unlock_with_no_waiters_just_increments() {
        let sem = Semaphore::new(0);
        sem.unlock();
        assert_eq!(sem.count(), 1);
        assert!(sem.try_lock());
    }
}
