use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Reads the CPU's interrupt-enable flag directly; used only to assert the
/// "interrupts are already disabled" contract `Spin` callers must uphold.
#[inline(always)]
pub fn interrupts_enabled() -> bool {
    // Off the bare-metal target (host unit tests for the architecture-free
    // parts of the kernel) EFLAGS.IF reflects the test harness, not kernel
    // state — always report "disabled" so the debug assertions below don't
    // fire outside a real kernel build.
    #[cfg(target_os = "none")]
    unsafe {
        let flags: u64;
        core::arch::asm!("pushfq; pop {}", out(reg) flags, options(nomem, preserves_flags));
        return flags & (1 << 9) != 0;
    }

    #[cfg(not(target_os = "none"))]
    {
        false
    }
}

/// A plain busy-wait spinlock.
///
/// Acquired by exchange-true-acquire, released by store-false-release, per
/// the kernel's synchronisation design. The caller is required to already
/// have interrupts disabled (asserted in debug builds); `Spin` itself only
/// disables preemption for the lifetime of the guard so that the lock
/// holder cannot be rescheduled off this CPU while it owns the lock.
pub struct Spin<T: ?Sized> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for Spin<T> {}
unsafe impl<T: ?Sized + Send> Sync for Spin<T> {}

impl<T> Spin<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: ?Sized> Spin<T> {
    pub fn lock(&self) -> SpinGuard<'_, T> {
        debug_assert!(
            !interrupts_enabled(),
            "Spin::lock() called with interrupts enabled"
        );

        rainbow_preempt::disable();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }

        SpinGuard { lock: self }
    }

    pub fn try_lock(&self) -> Option<SpinGuard<'_, T>> {
        rainbow_preempt::disable();
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinGuard { lock: self })
        } else {
            rainbow_preempt::enable();
            None
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Raw pointer to the protected value, bypassing the guard.
    ///
    /// # Safety
    /// The caller must otherwise guarantee exclusive access for as long as
    /// the pointer is used (e.g. a context switch performed under the BKL,
    /// where no other CPU can touch this task's context).
    pub unsafe fn as_ptr(&self) -> *mut T {
        self.value.get()
    }
}

pub struct SpinGuard<'a, T: ?Sized> {
    lock: &'a Spin<T>,
}

impl<T: ?Sized> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        rainbow_preempt::enable();
    }
}

impl<T: ?Sized> Deref for SpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: holding `SpinGuard` implies exclusive access to `value`.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding `SpinGuard` implies exclusive access to `value`.
        unsafe { &mut *self.lock.value.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_unlock_roundtrip() {
        rainbow_percpu::install_test_cpu(0);
        let spin = Spin::new(0u32);
        *spin.lock() = 42;
        assert_eq!(*spin.lock(), 42);
    }

    #[test]
    fn try_lock_fails_while_held() {
        rainbow_percpu::install_test_cpu(1);
        let spin = Spin::new(0u32);
        let guard = spin.lock();
        assert!(spin.try_lock().is_none());
        drop(guard);
        assert!(spin.try_lock().is_some());
    }
}
