#![cfg_attr(target_os = "none", no_std)]

//! One block of per-logical-CPU state, addressable through the `GS` segment.
//!
//! `PerCpu::init` parks a `&'static mut PerCpu` for the running CPU and loads its
//! address into `IA32_GS_BASE`. From then on `PerCpu::current()` is a single
//! `mov reg, gs:0` away: every live `PerCpu` stores a pointer to itself at
//! offset 0 so the segment load and the dereference are the same instruction
//! sequence on every CPU.
//!
//! Off the bare-metal target (`target_os != "none"`, i.e. host unit tests)
//! the `wrmsr`/`gs:0` instructions are unavailable (and privileged even where
//! the encoding exists), so `current()` falls back to a thread-local slot —
//! one independent "CPU" per host test thread, so parallel `cargo test` runs
//! do not trample each other's installed `PerCpu`.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

#[cfg(target_os = "none")]
const IA32_GS_BASE: u32 = 0xc000_0101;

/// Opaque pointer slot for the currently running task. The concrete `Task` type
/// lives above this crate (task state depends on scheduling, which depends on
/// per-CPU data), so this crate only shuffles `*mut ()` around; the kernel task
/// module wraps this in a typed accessor.
pub type TaskPtr = AtomicPtr<()>;

#[repr(C)]
pub struct PerCpu {
    self_ptr: *mut PerCpu,
    pub id: u32,
    pub apic_id: u32,
    pub enabled: bool,
    pub bootstrap: bool,
    /// Address of this CPU's GDT, set by the HAL once it has built one.
    pub gdt: AtomicPtr<()>,
    /// Address of this CPU's TSS, set by the HAL once it has built one.
    pub tss: AtomicPtr<()>,
    pub current_task: TaskPtr,
    pub user_stack_scratch: AtomicUsize,
    pub kernel_stack_scratch: AtomicUsize,
    pub preempt_count: AtomicUsize,
}

impl PerCpu {
    pub const fn new(id: u32, apic_id: u32, bootstrap: bool) -> Self {
        Self {
            self_ptr: core::ptr::null_mut(),
            id,
            apic_id,
            enabled: false,
            bootstrap,
            gdt: AtomicPtr::new(core::ptr::null_mut()),
            tss: AtomicPtr::new(core::ptr::null_mut()),
            current_task: AtomicPtr::new(core::ptr::null_mut()),
            user_stack_scratch: AtomicUsize::new(0),
            kernel_stack_scratch: AtomicUsize::new(0),
            preempt_count: AtomicUsize::new(0),
        }
    }

    /// Installs `cpu` as the per-CPU block for the CPU executing this call.
    ///
    /// # Safety
    /// `cpu` must be valid for `'static` and must not already be installed on
    /// another live CPU (each `PerCpu` belongs to exactly one logical CPU).
    pub unsafe fn init(cpu: &'static mut PerCpu) {
        cpu.self_ptr = cpu as *mut PerCpu;

        #[cfg(target_os = "none")]
        unsafe {
            wrmsr(IA32_GS_BASE, cpu.self_ptr as u64);
        }

        #[cfg(not(target_os = "none"))]
        host::install(cpu.self_ptr);
    }

    /// Returns the per-CPU block for the CPU executing this call.
    ///
    /// # Panics
    /// Panics if called before `init` has run on this CPU.
    pub fn current() -> &'static PerCpu {
        let ptr = current_raw();
        // SAFETY: `init` installs a pointer to a `'static` `PerCpu` before anyone
        // is allowed to call `current`; the pointer is never reused for a
        // different CPU.
        unsafe {
            NonNull::new(ptr)
                .expect("PerCpu::init was not called on this CPU")
                .as_ref()
        }
    }
}

#[cfg(target_os = "none")]
fn current_raw() -> *mut PerCpu {
    let ptr: u64;
    unsafe {
        core::arch::asm!("mov {}, gs:0", out(reg) ptr, options(nostack, preserves_flags));
    }
    ptr as *mut PerCpu
}

#[cfg(not(target_os = "none"))]
fn current_raw() -> *mut PerCpu {
    host::current()
}

#[cfg(target_os = "none")]
unsafe fn wrmsr(msr: u32, value: u64) {
    let lo = value as u32;
    let hi = (value >> 32) as u32;
    unsafe {
        core::arch::asm!(
            "wrmsr",
            in("ecx") msr,
            in("eax") lo,
            in("edx") hi,
            options(nostack, preserves_flags),
        );
    }
}

#[cfg(not(target_os = "none"))]
mod host {
    use super::PerCpu;
    use core::cell::Cell;

    std::thread_local! {
        static CURRENT: Cell<*mut PerCpu> = const { Cell::new(core::ptr::null_mut()) };
    }

    pub(super) fn install(ptr: *mut PerCpu) {
        CURRENT.with(|cell| cell.set(ptr));
    }

    pub(super) fn current() -> *mut PerCpu {
        CURRENT.with(|cell| cell.get())
    }
}

/// Installs a fresh `PerCpu` for the calling (host test) thread and returns
/// it. Only meaningful off the bare-metal target; real CPUs get their
/// `PerCpu` from the boot/SMP-bringup sequence instead.
#[cfg(all(feature = "test-util", not(target_os = "none")))]
pub fn install_test_cpu(id: u32) -> &'static PerCpu {
    let cpu: &'static mut PerCpu = Box::leak(Box::new(PerCpu::new(id, id, id == 0)));
    unsafe { PerCpu::init(cpu) };
    cpu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_returns_installed_cpu() {
        let cpu = Box::leak(Box::new(PerCpu::new(7, 7, false)));
        unsafe { PerCpu::init(cpu) };

        assert_eq!(PerCpu::current().id, 7);
    }

    #[test]
    #[should_panic]
    fn current_panics_before_init() {
        // Each host test thread has its own thread-local slot; this thread
        // never calls `init`, so `current()` must panic rather than alias
        // another thread's `PerCpu`.
        let _ = PerCpu::current();
    }
}
