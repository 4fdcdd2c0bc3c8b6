#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]

//! Rainbow: a hobby microkernel core — PMM/VMM/page tables, task model and
//! scheduler, synchronisation primitives, SMP bring-up, interrupt dispatch,
//! and synchronous rendezvous IPC.
//!
//! `kernel_init`/`kernel_ap_main` are the two boot entry points, wired here
//! alongside `shutdown_system`. No VFS, no network stack, no ELF loader,
//! no POSIX process model — see `DESIGN.md` for the full drop ledger.

extern crate alloc;

pub mod allocator;
pub mod config;
pub mod ipc;
pub mod kernel_init;
mod panic;
pub mod prelude;
pub mod smp;
pub mod syscall;
pub mod task;

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rainbow_hal::bootinfo::BootInfo;
use rainbow_sync::Bkl;

/// The single big kernel lock (spec §4.D "Kernel-entry discipline"): held
/// for the entirety of every interrupt/syscall entry; the idle loop is the
/// only place that releases it.
pub static BKL: Bkl = Bkl::new();

static BSP_READY: AtomicBool = AtomicBool::new(false);
static CPUS_SHUTTING_DOWN: AtomicUsize = AtomicUsize::new(0);

/// COM1, written one byte at a time with no handshake (spec.md leaves
/// console wiring out of scope; this is the minimal thing a loader-provided
/// serial port needs).
const COM1_PORT: u16 = 0x3F8;

struct SerialConsole;

impl rainbow_log::ConsoleWrite for SerialConsole {
    fn write(&self, s: &str) {
        #[cfg(target_os = "none")]
        for byte in s.bytes() {
            unsafe {
                core::arch::asm!(
                    "out %al, %dx",
                    in("dx") COM1_PORT,
                    in("al") byte,
                    options(att_syntax, nostack),
                );
            }
        }
        #[cfg(not(target_os = "none"))]
        let _ = s;
    }
}

/// Entry point reached from the loader's handoff stub with interrupts still
/// disabled (spec §6 "Boot handoff"). Never returns.
///
/// # Safety
/// Must be called exactly once, by the bootstrap processor only, with
/// `boot_info` pointing at the loader's untouched handoff record and
/// `kernel_stack_top` the top of the stack this call is already running on.
#[cfg_attr(target_os = "none", no_mangle)]
pub unsafe extern "C" fn kernel_main(boot_info: &BootInfo, kernel_stack_top: usize) -> ! {
    rainbow_log::set_console(alloc::sync::Arc::new(SerialConsole));
    rainbow_log::println!("rainbow: booting");

    BKL.lock();

    let boot_task = unsafe { kernel_init::init_bsp(boot_info, kernel_stack_top) };

    unsafe {
        allocator::grow_heap(
            &kernel_init::PMM,
            boot_task.page_table().as_ref(),
            16 * rainbow_mm::paging::PAGE_SIZE,
        )
    };

    BSP_READY.store(true, Ordering::Release);
    rainbow_log::println!("rainbow: task 0 running, entering idle");

    smp::idle_loop()
}

/// Entry point for every AP, reached from the real-mode trampoline once it
/// has switched into long mode (spec §4.G "AP entry (in kernel)").
///
/// # Safety
/// Must be called exactly once per AP, with `cpu` a `'static` block this AP
/// owns exclusively and not yet installed anywhere else.
#[cfg_attr(target_os = "none", no_mangle)]
pub unsafe extern "C" fn kernel_ap_main(cpu: &'static mut rainbow_percpu::PerCpu) -> ! {
    while !BSP_READY.load(Ordering::Acquire) {
        rainbow_hal::cpu::pause();
    }

    unsafe { rainbow_percpu::PerCpu::init(cpu) };
    BKL.lock();
    smp::idle_loop()
}

/// Parks every CPU but the caller's, for use by the `exit` path of the last
/// surviving task (spec.md names no multi-user shutdown protocol beyond
/// this).
pub fn shutdown_system() -> ! {
    CPUS_SHUTTING_DOWN.fetch_add(1, Ordering::AcqRel);
    rainbow_hal::cpu::halt_forever()
}

#[cfg(test)]
mod tests {
    #[test]
    fn bkl_starts_unlocked() {
        assert!(!super::BKL.is_locked());
    }
}
