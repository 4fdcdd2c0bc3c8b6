//! SMP bring-up orchestration (spec §4.G), run from task 0 once the
//! scheduler is live (so `sleep` below actually parks the caller instead of
//! busy-waiting the only CPU in existence).
//!
//! Follows the INIT-then-STARTUP retry shape of a classic x86 AP bring-up
//! sequence; the low-level trampoline layout and IPI helpers come from
//! [`rainbow_hal::smp`]. One step per small function, matching the
//! structure `kernel_init.rs` uses for BSP bring-up.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicPtr, Ordering};

use rainbow_hal::controller::apic::Apic;
use rainbow_hal::gdt::Gdt;
use rainbow_hal::idt;
use rainbow_hal::smp::{
    poll_ap_flag, send_init_ipi, send_startup_ipi, ApProgress, TrampolineContext,
    AP_FLAG_OFFSET, TRAMPOLINE_CONTEXT_OFFSET,
};
use rainbow_mm::address::Addr;
use rainbow_mm::page_table::PageTable;
use rainbow_percpu::PerCpu;
use rainbow_sync::{Bkl, Spin};

use crate::kernel_init::PMM;
use crate::task::{self, Priority, Task, TaskState};

/// The shared low-memory trampoline page, recorded so `ap_entry_trampoline`
/// (which only receives its APIC id as an argument) can find the
/// `TrampolineContext` the BSP wrote for it.
static TRAMPOLINE_BASE: AtomicPtr<u8> = AtomicPtr::new(core::ptr::null_mut());

const TEN_MS_NS: u64 = 10_000_000;
const ONE_MS_NS: u64 = 1_000_000;
const ONE_S_NS: u64 = 1_000_000_000;

/// One CPU this kernel knows about but has not yet started (spec §4.G:
/// discovered from the ACPI MADT by the loader, handed down as a plain
/// APIC id list — parsing MADT itself is out of scope, spec.md §1).
#[derive(Clone, Copy)]
pub struct ApDescriptor {
    pub apic_id: u8,
}

/// Starts every AP in `aps`, one at a time, from task 0.
///
/// # Safety
/// Must run after the scheduler and BSP `PerCpu` are installed, with
/// `trampoline_base` pointing at an identity-mapped page below 1 MiB that
/// the real-mode trampoline stub has already been copied into.
pub unsafe fn bring_up_all(
    current: Arc<Task>,
    apic: &Apic,
    bkl: &Bkl,
    boot_page_table: Arc<Spin<PageTable>>,
    trampoline_base: *mut u8,
    aps: &[ApDescriptor],
) {
    for ap in aps {
        unsafe {
            bring_up_one(
                current.clone(),
                apic,
                bkl,
                boot_page_table.clone(),
                trampoline_base,
                ap.apic_id,
            )
        };
    }
}

/// Brings up a single AP (spec §4.G steps 1-7).
///
/// # Safety
/// See [`bring_up_all`].
unsafe fn bring_up_one(
    current: Arc<Task>,
    apic: &Apic,
    bkl: &Bkl,
    boot_page_table: Arc<Spin<PageTable>>,
    trampoline_base: *mut u8,
    apic_id: u8,
) {
    // Step 1: trampoline frame is reserved/identity-mapped by the caller
    // (shared across every AP we bring up, not reallocated per CPU); only
    // its `TrampolineContext` is (re)written here.
    TRAMPOLINE_BASE.store(trampoline_base, Ordering::Release);
    let ctx_ptr = unsafe { trampoline_base.add(TRAMPOLINE_CONTEXT_OFFSET) } as *mut TrampolineContext;
    let flag_ptr = unsafe { trampoline_base.add(AP_FLAG_OFFSET) } as *mut u32;
    unsafe { core::ptr::write_volatile(flag_ptr, ApProgress::NotStarted as u32) };

    // Step 2: a fresh AP task, sharing the BSP's address space (clone of
    // the `Arc`, same underlying page table — every task sees the same
    // kernel half; spec §4.B "kernel half identical across every address
    // space"). Handed to the AP as a raw pointer via `Arc::into_raw` — the
    // strong reference travels with it rather than being dropped when this
    // function returns; `ap_entry_trampoline` reconstructs it with
    // `Arc::from_raw` once it adopts the task.
    let ap_kernel_stack = alloc_kernel_stack();
    let ap_task = Task::new_kernel(
        Priority::Normal,
        ap_kernel_stack,
        boot_page_table,
        ap_entry_trampoline,
        apic_id as usize,
    );
    let initial_task_ptr = Arc::into_raw(ap_task) as u64;

    unsafe {
        core::ptr::write_volatile(
            ctx_ptr,
            TrampolineContext {
                flag: ApProgress::NotStarted as u32,
                cr3: current_cr3(),
                ap_kernel_stack: ap_kernel_stack as u64,
                ap_entry: ap_entry_trampoline as usize as u64,
                cpu_ptr: 0,
                initial_task_ptr,
                pat_msr: 0,
            },
        );
    }

    // Step 3: INIT IPI, then a real sleep (scheduler is live, so this
    // parks `current` and lets the AP's 10ms settle elapse concurrently).
    send_init_ipi(apic, apic_id);
    task::scheduler::sleep(current.clone(), TEN_MS_NS);

    // Step 4/5: STARTUP IPI, then poll with a short budget first and a
    // longer retry if the AP hasn't signalled `RealModeEntered` yet.
    send_startup_ipi(apic, apic_id, trampoline_base as usize >> 12);
    if !wait_for_progress(trampoline_base, ApProgress::RealModeEntered, ONE_MS_NS, &current) {
        send_startup_ipi(apic, apic_id, trampoline_base as usize >> 12);
        wait_for_progress(trampoline_base, ApProgress::RealModeEntered, ONE_S_NS, &current);
    }

    // Step 6: release the BKL briefly so the AP (which must acquire it
    // during its own bring-up) can make progress, then spin for `flag==3`.
    bkl.unlock();
    while unsafe { poll_ap_flag(trampoline_base) } < ApProgress::Ready as u32 {
        rainbow_hal::cpu::pause();
    }
    bkl.lock();

    // Step 7: the trampoline frame itself is shared and reused for the
    // next AP, so nothing is freed here; a one-shot scratch frame
    // allocated per-AP (if any) would be released by the caller.
}

fn wait_for_progress(
    trampoline_base: *const u8,
    want: ApProgress,
    budget_ns: u64,
    current: &Arc<Task>,
) -> bool {
    let deadline = task::scheduler::now_ns() + budget_ns;
    while task::scheduler::now_ns() < deadline {
        if unsafe { poll_ap_flag(trampoline_base) } >= want as u32 {
            return true;
        }
        task::scheduler::yield_now();
    }
    let _ = current;
    unsafe { poll_ap_flag(trampoline_base) } >= want as u32
}

fn alloc_kernel_stack() -> usize {
    let mut pmm = PMM.lock();
    let frame = pmm
        .allocate_frames(crate::config::KERNEL_STACK_PAGES)
        .expect("out of memory bringing up an AP kernel stack");
    frame.addr() + crate::config::KERNEL_STACK_PAGES * 4096
}

#[cfg(target_os = "none")]
fn current_cr3() -> u64 {
    let value: u64;
    unsafe { core::arch::asm!("mov %cr3, {}", out(reg) value, options(att_syntax)) };
    value
}

#[cfg(not(target_os = "none"))]
fn current_cr3() -> u64 {
    0
}

/// The first Rust code an AP runs once the trampoline has switched it into
/// long mode: installs its own `PerCpu`/GDT/IDT, adopts the `Task` the BSP
/// built for it, and falls into the idle loop (spec §4.G step 6's
/// `flag = 3` is written just before this call falls into `idle_loop`).
unsafe extern "C" fn ap_entry_trampoline(apic_id: usize) -> ! {
    let cpu = Box::leak(Box::new(PerCpu::new(apic_id as u32, apic_id as u32, false)));
    unsafe { PerCpu::init(cpu) };

    // Every CPU gets its own GDT/TSS (so its ring-0 entry stack is its own,
    // not the BSP's) but shares the IDT layout the BSP already built (the
    // ISR stub table is the same for every CPU; only `isr_start` matters,
    // and it was already baked in by `kernel_init::init_bsp`).
    let tss = Box::leak(Box::new(rainbow_hal::gdt::Tss::new()));
    tss.set_rsp0(0);
    let gdt = Box::leak(Box::new(Gdt::new()));
    gdt.set_tss(tss);
    // SAFETY: `gdt`/`tss` are leaked, so `'static`, and this is the only
    // CPU that will ever load them.
    unsafe { gdt.load() };

    let idt_table = Box::leak(Box::new(idt::build_table(0, Gdt::KERNEL_CODE_SELECTOR)));
    // SAFETY: see above.
    unsafe { idt::load(idt_table) };

    let base = TRAMPOLINE_BASE.load(Ordering::Acquire);
    let ctx_ptr = unsafe { base.add(TRAMPOLINE_CONTEXT_OFFSET) } as *const TrampolineContext;
    // SAFETY: the BSP wrote a live `TrampolineContext` for this AP at
    // `base` before sending the STARTUP IPI that got us here.
    let initial_task_ptr = unsafe { core::ptr::read_volatile(ctx_ptr) }.initial_task_ptr;

    // SAFETY: `initial_task_ptr` came from `Arc::into_raw` in `bring_up_one`
    // and has not been reconstructed since.
    let task = unsafe { Arc::from_raw(initial_task_ptr as *const Task) };
    task.set_state(TaskState::Running);
    task::scheduler::install_current(task);

    let flag_ptr = unsafe { base.add(AP_FLAG_OFFSET) } as *mut u32;
    unsafe { core::ptr::write_volatile(flag_ptr, ApProgress::Ready as u32) };

    idle_loop()
}

/// The bottom of every CPU's run queue: nothing to do, so release the BKL
/// and halt until an interrupt (spec §4.D "Idle").
pub fn idle_loop() -> ! {
    loop {
        rainbow_hal::cpu::enable();
        rainbow_hal::cpu::halt();
        rainbow_hal::cpu::disable();
        task::scheduler::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_for_progress_times_out_without_spinning_forever() {
        rainbow_percpu::install_test_cpu(40);
        let mut page = alloc::vec![0u8; 0x1000];
        let found = wait_for_progress(page.as_mut_ptr(), ApProgress::Ready, 0, &dummy_task());
        assert!(!found);
    }

    fn dummy_task() -> Arc<Task> {
        let mut pmm = rainbow_mm::pmm::Pmm::new();
        pmm.init(&[rainbow_mm::pmm::MemoryDescriptor {
            kind: rainbow_mm::pmm::MemoryKind::Available,
            range: rainbow_mm::address::PRange::new(
                rainbow_mm::address::PAddr::from_val(0x10_0000),
                rainbow_mm::address::PAddr::from_val(0x20_0000),
            ),
        }]);
        let table = Arc::new(Spin::new(PageTable::init_long_mode(&mut pmm)));
        Task::new_boot(0x9000, table)
    }
}
