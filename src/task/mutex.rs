//! Sleeping mutex (spec §4.E), built the same way as the semaphore example
//! in §4.E: a binary counter plus a wait queue, blocked waiters
//! parked with reason `Mutex`. Distinct from `rainbow_sync::Spin`, which is
//! the non-sleeping primitive used inside the kernel itself (spec §4.E
//! "Spinlock"); `Mutex` is for tasks blocking each other, not for protecting
//! kernel data structures across interrupts.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use super::semaphore::Semaphore;
use super::Task;

const NO_OWNER: u64 = u64::MAX;

pub struct Mutex {
    sem: Semaphore,
    owner: AtomicU64,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            sem: Semaphore::new(1),
            owner: AtomicU64::new(NO_OWNER),
        }
    }

    pub fn lock(&self, current: Arc<Task>) {
        let id = current.id();
        self.sem.lock(current);
        self.owner.store(id, Ordering::Release);
    }

    pub fn try_lock(&self, current: &Arc<Task>) -> bool {
        if self.sem.try_lock() {
            self.owner.store(current.id(), Ordering::Release);
            true
        } else {
            false
        }
    }

    pub fn unlock(&self, current: &Arc<Task>) {
        assert_eq!(
            self.owner.load(Ordering::Acquire),
            current.id(),
            "Mutex::unlock called by a task that does not hold it"
        );
        self.owner.store(NO_OWNER, Ordering::Release);
        self.sem.unlock();
    }

    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Acquire) != NO_OWNER
    }
}

impl Default for Mutex {
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
    use rainbow_sync::Spin;

    fn task() -> Arc<Task> {
        let mut pmm = Pmm::new();
        pmm.init(&[MemoryDescriptor {
            kind: MemoryKind::Available,
            range: PRange::new(PAddr::from_val(0x10_0000), PAddr::from_val(0x20_0000)),
        }]);
        let table = Arc::new(Spin::new(PageTable::init_long_mode(&mut pmm)));
        unsafe extern "C" fn entry(_: usize) -> ! {
            loop {}
        }
        Task::new_kernel(super::super::Priority::Normal, 0x8000, table, entry, 0)
    }

    #[test]
    fn try_lock_then_unlock_round_trips_ownership() {
        let mutex = Mutex::new();
        let owner = task();
        assert!(mutex.try_lock(&owner));
        assert!(mutex.is_locked());
        mutex.unlock(&owner);
        assert!(!mutex.is_locked());
    }

    #[test]
    #[should_panic]
    fn unlock_by_non_owner_panics() {
        let mutex = Mutex::new();
        let owner = task();
        let other = task();
        assert!(mutex.try_lock(&owner));
        mutex.unlock(&other);
    }

    #[test]
    fn second_try_lock_fails_while_held() {
        let mutex = Mutex::new();
        let a = task();
        let b = task();
        assert!(mutex.try_lock(&a));
        assert!(!mutex.try_lock(&b));
    }
}
