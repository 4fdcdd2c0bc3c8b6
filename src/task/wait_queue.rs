//! Wait queue (spec §4.E "Wait queue"): a lock-protected waiter list with
//! a condvar-style wait/notify shape, supporting `suspend`,
//! `wakeup`/`wakeup(n)`/`wakeup_all`, `wakeup_until`.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use rainbow_sync::Spin;

use super::scheduler::schedule;
use super::{Task, TaskState};

pub struct WaitQueue {
    waiters: Spin<VecDeque<Arc<Task>>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: Spin::new(VecDeque::new()),
        }
    }

    /// Parks the current task on this queue with the given blocked state,
    /// then calls the scheduler. Returns once some other task has called
    /// `wakeup`/`wakeup_all`/`wakeup_until` on `current`.
    ///
    /// # Safety
    /// Must be called with the BKL held and interrupts disabled, as every
    /// kernel entry point is (spec §5).
    pub fn suspend(&self, current: Arc<Task>, reason: TaskState) {
        current.set_state(reason);
        self.waiters.lock().push_back(current);
        schedule();
    }

    /// Wakes a specific task if it is parked here; no-op otherwise.
    pub fn wakeup(&self, task: &Arc<Task>) {
        let mut waiters = self.waiters.lock();
        if let Some(pos) = waiters.iter().position(|t| Arc::ptr_eq(t, task)) {
            let woken = waiters.remove(pos).unwrap();
            super::scheduler::requeue(woken);
        }
    }

    /// Wakes up to `n` waiters, FIFO, returning the number actually woken
    /// (SPEC_FULL §6) — used by `Semaphore` to wake exactly as many
    /// waiters as permits became available.
    pub fn wakeup_n(&self, n: usize) -> usize {
        let mut waiters = self.waiters.lock();
        let mut woken = 0;
        while woken < n {
            match waiters.pop_front() {
                Some(task) => {
                    super::scheduler::requeue(task);
                    woken += 1;
                }
                None => break,
            }
        }
        woken
    }

    pub fn wakeup_all(&self) -> usize {
        self.wakeup_n(usize::MAX)
    }

    /// Moves every waiter whose `sleep_deadline() <= now_ns` to the ready
    /// queue (spec §4.D "Sleep").
    pub fn wakeup_until(&self, now_ns: u64) -> usize {
        let mut waiters = self.waiters.lock();
        let mut woken = 0;
        let mut remaining = VecDeque::with_capacity(waiters.len());
        while let Some(task) = waiters.pop_front() {
            if task.sleep_deadline() <= now_ns {
                super::scheduler::requeue(task);
                woken += 1;
            } else {
                remaining.push_back(task);
            }
        }
        *waiters = remaining;
        woken
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rainbow_mm::address::{PAddr, PRange};
    use rainbow_mm::page_table::PageTable;
    use rainbow_mm::pmm::{MemoryDescriptor, MemoryKind, Pmm};
    use rainbow_sync::Spin as RSpin;

    fn task() -> Arc<Task> {
        let mut pmm = Pmm::new();
        pmm.init(&[MemoryDescriptor {
            kind: MemoryKind::Available,
            range: PRange::new(PAddr::from_val(0x10_0000), PAddr::from_val(0x20_0000)),
        }]);
        let table = Arc::new(RSpin::new(PageTable::init_long_mode(&mut pmm)));
        unsafe extern "C" fn entry(_: usize) -> ! {
            loop {}
        }
        Task::new_kernel(super::super::Priority::Normal, 0x8000, table, entry, 0)
    }

    #[test]
    fn wakeup_n_returns_the_count_actually_woken() {
        rainbow_percpu::install_test_cpu(0);
        super::super::scheduler::init_test_scheduler();
        let wq = WaitQueue::new();
        wq.waiters.lock().push_back(task());
        wq.waiters.lock().push_back(task());

        assert_eq!(wq.wakeup_n(5), 2);
        assert!(wq.is_empty());
    }

    #[test]
    fn wakeup_until_only_moves_expired_deadlines() {
        rainbow_percpu::install_test_cpu(1);
        super::super::scheduler::init_test_scheduler();
        let wq = WaitQueue::new();

        let expired = task();
        expired.set_sleep_deadline(10);
        let not_yet = task();
        not_yet.set_sleep_deadline(1_000);

        wq.waiters.lock().push_back(expired);
        wq.waiters.lock().push_back(not_yet);

        assert_eq!(wq.wakeup_until(500), 1);
        assert_eq!(wq.len(), 1);
    }
}
