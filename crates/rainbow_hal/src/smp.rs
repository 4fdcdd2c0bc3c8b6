//! SMP bring-up (spec §4.G): a real-mode trampoline blob copied to a fixed
//! low-memory address, brought up with INIT-then-STARTUP IPIs issued
//! through [`crate::controller::apic`].

use crate::controller::apic::Apic;

/// Where the trampoline blob is copied, and where `TrampolineContext`
/// starts within it (spec §4.G step 1: "append a `TrampolineContext` at
/// offset 0x0F00").
pub const TRAMPOLINE_CONTEXT_OFFSET: usize = 0x0F00;

/// One word beyond `TrampolineContext` itself (SPEC_FULL §6, grounded on
/// `apic.cpp`'s per-AP "startup acknowledged" flag): polled by the BSP,
/// written by the AP as it progresses through bring-up.
pub const AP_FLAG_OFFSET: usize = 0x0FF0;

/// AP bring-up progress, written by the AP itself at `AP_FLAG_OFFSET`.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApProgress {
    NotStarted = 0,
    RealModeEntered = 1,
    LongModeEntered = 2,
    /// AP has installed its `Task`, set state Running, and is about to
    /// call `idle_loop` — spec §4.G step 6: "spin until `flag == 3`".
    Ready = 3,
}

/// Data the real-mode trampoline reads to get into long mode and jump into
/// Rust code, laid out exactly as spec.md §4.G step 1 names: flag word,
/// CR3, AP kernel stack pointer, AP entry point, CPU pointer, initial task
/// pointer, PAT MSR value.
#[repr(C)]
pub struct TrampolineContext {
    pub flag: u32,
    pub cr3: u64,
    pub ap_kernel_stack: u64,
    pub ap_entry: u64,
    pub cpu_ptr: u64,
    pub initial_task_ptr: u64,
    pub pat_msr: u64,
}

impl TrampolineContext {
    pub const fn new() -> Self {
        Self {
            flag: ApProgress::NotStarted as u32,
            cr3: 0,
            ap_kernel_stack: 0,
            ap_entry: 0,
            cpu_ptr: 0,
            initial_task_ptr: 0,
            pat_msr: 0,
        }
    }
}

impl Default for TrampolineContext {
    fn default() -> Self {
        Self::new()
    }
}

const INIT_IPI: u32 = 0x4500;
const STARTUP_IPI: u32 = 0x4600;

/// Sends an INIT IPI to `apic_id` (spec §4.G step 3).
pub fn send_init_ipi(apic: &Apic, apic_id: u8) {
    apic.interrupt_command()
        .write(INIT_IPI | ((apic_id as u32) << 24));
}

/// Sends a STARTUP IPI pointing the AP at `trampoline_page` (spec §4.G
/// step 4/5: "vector = (trampoline >> 12)").
pub fn send_startup_ipi(apic: &Apic, apic_id: u8, trampoline_page: usize) {
    let vector = (trampoline_page >> 12) as u32 & 0xff;
    apic.interrupt_command()
        .write(STARTUP_IPI | vector | ((apic_id as u32) << 24));
}

/// Reads the AP flag word at `AP_FLAG_OFFSET` within the trampoline page.
///
/// # Safety
/// `trampoline_base` must point at a live trampoline page the AP (or
/// nobody yet) is writing to.
pub unsafe fn poll_ap_flag(trampoline_base: *const u8) -> u32 {
    let ptr = unsafe { trampoline_base.add(AP_FLAG_OFFSET) } as *const u32;
    unsafe { core::ptr::read_volatile(ptr) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_trampoline_context_reports_not_started() {
        let ctx = TrampolineContext::new();
        assert_eq!(ctx.flag, ApProgress::NotStarted as u32);
    }

    #[test]
    fn ap_flag_offset_sits_one_word_past_the_context() {
        assert!(AP_FLAG_OFFSET - TRAMPOLINE_CONTEXT_OFFSET >= core::mem::size_of::<TrampolineContext>());
    }

    #[test]
    fn poll_ap_flag_reads_the_written_word() {
        let mut page = alloc::vec![0u8; 0x1000];
        let flag_ptr = unsafe { page.as_mut_ptr().add(AP_FLAG_OFFSET) } as *mut u32;
        unsafe { flag_ptr.write_volatile(ApProgress::Ready as u32) };

        let read = unsafe { poll_ap_flag(page.as_ptr()) };
        assert_eq!(read, ApProgress::Ready as u32);
    }
}
