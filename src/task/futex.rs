//! Futex table (spec §3 names `Futex` as a blocking state): buckets hashed
//! by user virtual address, each a plain `Spin`-protected `WaitQueue` —
//! this crate has no async runtime, so the bucket stays synchronous rather
//! than built over an RBTree of pending futures.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use rainbow_sync::Spin;

use super::wait_queue::WaitQueue;
use super::{Task, TaskState};

const BUCKET_COUNT: usize = 256;

pub struct FutexTable {
    buckets: [Spin<BTreeMap<usize, WaitQueue>>; BUCKET_COUNT],
}

fn bucket_index(addr: usize) -> usize {
    // Shift by more than a pointer width's worth of alignment so futexes on
    // the same page don't all collide into one bucket.
    (addr >> 3) % BUCKET_COUNT
}

impl FutexTable {
    pub fn new() -> Self {
        Self {
            buckets: core::array::from_fn(|_| Spin::new(BTreeMap::new())),
        }
    }

    /// Blocks `current` on the futex at `addr` (spec's analogue of Linux
    /// `FUTEX_WAIT`: caller has already checked `*addr == expected` under
    /// its own lock before calling this).
    pub fn wait(&self, addr: usize, current: Arc<Task>) {
        let idx = bucket_index(addr);

        let queue_ptr: *const WaitQueue = {
            let mut bucket = self.buckets[idx].lock();
            bucket.entry(addr).or_insert_with(WaitQueue::new)
        };

        // SAFETY: entries are never removed from a bucket once inserted
        // (only emptied), so the `WaitQueue` the pointer came from stays
        // valid for the table's lifetime; dropping the guard above only
        // releases the bucket lock, not the entry itself.
        unsafe { (*queue_ptr).suspend(current, TaskState::Futex) };
    }

    /// Wakes up to `n` tasks blocked on `addr` (spec's analogue of
    /// `FUTEX_WAKE`). Returns the number actually woken.
    pub fn wake(&self, addr: usize, n: usize) -> usize {
        let bucket = self.buckets[bucket_index(addr)].lock();
        match bucket.get(&addr) {
            Some(queue) => queue.wakeup_n(n),
            None => 0,
        }
    }
}

impl Default for FutexTable {
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
    fn wake_on_unused_address_wakes_nothing() {
        let table = FutexTable::new();
        assert_eq!(table.wake(0x4000, 1), 0);
    }

    #[test]
    fn distinct_addresses_hash_into_independent_buckets_when_spread() {
        assert_ne!(bucket_index(0x1000), bucket_index(0x1000 + 8 * BUCKET_COUNT));
        let _ = task();
    }
}
