use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use rainbow_percpu::PerCpu;

const NO_OWNER: usize = usize::MAX;

/// The recursive spinlock used as the kernel's single big kernel lock (BKL).
///
/// Every interrupt/syscall entry acquires it before running handler logic;
/// the idle loop is the only place that releases it (to let another CPU make
/// progress while this one waits for work). Held across every other kernel
/// entry, it linearises all kernel mutation across CPUs.
pub struct Bkl {
    locked: AtomicBool,
    owner: AtomicUsize,
    depth: AtomicUsize,
}

impl Bkl {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            owner: AtomicUsize::new(NO_OWNER),
            depth: AtomicUsize::new(0),
        }
    }

    fn this_cpu() -> usize {
        PerCpu::current().id as usize
    }

    pub fn lock(&self) {
        let me = Self::this_cpu();

        if self.owner.load(Ordering::Relaxed) == me {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return;
        }

        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }

        self.owner.store(me, Ordering::Relaxed);
        self.depth.store(1, Ordering::Relaxed);
    }

    pub fn unlock(&self) {
        let me = Self::this_cpu();
        assert_eq!(
            self.owner.load(Ordering::Relaxed),
            me,
            "Bkl::unlock() by a CPU that does not own the lock"
        );

        let depth = self.depth.fetch_sub(1, Ordering::Relaxed) - 1;
        if depth == 0 {
            self.owner.store(NO_OWNER, Ordering::Relaxed);
            self.locked.store(false, Ordering::Release);
        }
    }

    /// `true` iff `depth > 0`, i.e. some CPU (possibly this one) holds the lock.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn owner(&self) -> Option<usize> {
        match self.owner.load(Ordering::Relaxed) {
            NO_OWNER => None,
            owner => Some(owner),
        }
    }
}

impl Default for Bkl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recursive_lock_tracks_depth() {
        rainbow_percpu::install_test_cpu(0);
        let bkl = Bkl::new();

        bkl.lock();
        assert_eq!(bkl.depth(), 1);
        bkl.lock();
        assert_eq!(bkl.depth(), 2);

        bkl.unlock();
        assert!(bkl.is_locked());
        bkl.unlock();
        assert!(!bkl.is_locked());
        assert_eq!(bkl.owner(), None);
    }

    #[test]
    #[should_panic]
    fn unlock_by_non_owner_panics() {
        rainbow_percpu::install_test_cpu(1);
        let bkl = Bkl::new();
        bkl.unlock();
    }
}
