//! Boot sequencing (SPEC_FULL §2 data flow): memory-map ingestion via
//! `rainbow_hal::bootinfo::BootInfo`, then the explicit ia32/PAE/long-mode
//! paging choice spec §4.B names, then GDT/IDT bring-up and task 0's
//! adoption as the running task.

use alloc::sync::Arc;
use alloc::vec::Vec;

use rainbow_hal::bootinfo::BootInfo;
use rainbow_hal::gdt::Gdt;
use rainbow_hal::idt;
use rainbow_mm::page_table::PageTable;
use rainbow_mm::pmm::Pmm;
use rainbow_sync::Spin;

use crate::task::{self, Priority, Task};

/// Global PMM; initialised once by the BSP from the loader's memory map,
/// then shared (through its own lock) by every CPU's page-fault/`mmap`
/// path (spec §4.A).
pub static PMM: Spin<Pmm> = Spin::new(Pmm::new());

fn choose_paging_mode(pmm: &mut Pmm) -> PageTable {
    if rainbow_hal::cpu::supports_long_mode() {
        PageTable::init_long_mode(pmm)
    } else if rainbow_hal::cpu::supports_pae() {
        PageTable::init_pae(pmm)
    } else {
        PageTable::init_ia32(pmm)
    }
}

/// Runs once, on the bootstrap processor, before any other CPU is started
/// (spec §4.D "Initialisation", §4.G "Executes from task 0 after the
/// scheduler is live").
///
/// # Safety
/// `boot_info` must be the untouched record the loader handed off, and
/// `this_cpu_id` must be the bootstrap processor's APIC id. Must be called
/// exactly once, before interrupts are enabled.
pub unsafe fn init_bsp(boot_info: &BootInfo, kernel_stack_top: usize) -> Arc<Task> {
    let descriptors: Vec<_> = unsafe { boot_info.memory_descriptors() }.collect();
    {
        let mut pmm = PMM.lock();
        pmm.init(&descriptors);
    }

    let page_table = {
        let mut pmm = PMM.lock();
        Arc::new(Spin::new(choose_paging_mode(&mut pmm)))
    };

    let gdt = alloc::boxed::Box::leak(alloc::boxed::Box::new(Gdt::new()));
    // SAFETY: `gdt` is `'static` (leaked) and this is the only CPU running.
    unsafe { gdt.load() };

    let idt_table = alloc::boxed::Box::leak(alloc::boxed::Box::new(idt::build_table(
        0, // patched in by the real ISR-stub linker symbol once assembled
        Gdt::KERNEL_CODE_SELECTOR,
    )));
    // SAFETY: see above.
    unsafe { idt::load(idt_table) };

    let boot_task = Task::new_boot(kernel_stack_top, page_table);
    task::scheduler::install_current(boot_task.clone());

    let idle_table = {
        let mut pmm = PMM.lock();
        Arc::new(Spin::new(choose_paging_mode(&mut pmm)))
    };
    let idle = Task::new_kernel(Priority::Idle, kernel_stack_top, idle_table, idle_entry, 0);
    task::scheduler::install_idle_task(idle);

    boot_task
}

unsafe extern "C" fn idle_entry(_: usize) -> ! {
    crate::smp::idle_loop()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rainbow_hal::bootinfo::{FirmwareKind, MemoryDescriptorKind, RawMemoryDescriptor};

    #[test]
    fn init_bsp_adopts_a_running_task_zero() {
        rainbow_percpu::install_test_cpu(30);

        let raw = [RawMemoryDescriptor {
            kind: MemoryDescriptorKind::Available,
            flags: 0,
            address: 0x10_0000,
            size: 0x0F00_0000,
        }];
        let info = BootInfo {
            version: 1,
            firmware: FirmwareKind::Bios,
            memory_map: raw.as_ptr(),
            memory_map_len: raw.len(),
            initrd_address: 0,
            initrd_size: 0,
            framebuffer: None,
            acpi_rsdp: 0,
            modules: core::ptr::null(),
            modules_len: 0,
        };

        let boot = unsafe { init_bsp(&info, 0x9000) };
        assert_eq!(boot.state(), crate::task::TaskState::Running);
    }
}
