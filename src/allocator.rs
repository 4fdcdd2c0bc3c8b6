//! Kernel heap / global allocator.
//!
//! `linked_list_allocator::LockedHeap` backs the global allocator, grown
//! from [`rainbow_mm::vmm::Vmm::sbrk`] rather than a fixed static array;
//! see `DESIGN.md` for why this replaces a slab-on-pages design.

use core::sync::atomic::{AtomicBool, Ordering};

use rainbow_mm::address::Addr as _;
use rainbow_mm::page_table::PageTable;
use rainbow_mm::pmm::Pmm;
use rainbow_mm::vmm::Vmm;
use rainbow_sync::Spin;

#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static ALLOCATOR: std::alloc::System = std::alloc::System;

static VMM: Spin<Vmm> = Spin::new(Vmm::new());
static HEAP_INITIALISED: AtomicBool = AtomicBool::new(false);

/// Grows the kernel heap by `bytes` via [`Vmm::sbrk`] and hands the new
/// region to the global allocator: `init` the first time, `extend`
/// thereafter (the break only ever grows upward, so the region stays
/// contiguous). Called once at boot with an initial size, and again from
/// the allocation-error handler if it ever runs dry.
///
/// # Safety
/// Must be called with the BKL held (the underlying `PageTable` mutation
/// is not itself synchronised across CPUs) and only on the bare-metal
/// target — off it, the host system allocator is used instead and this is
/// a no-op.
pub unsafe fn grow_heap(pmm: &Spin<Pmm>, table: &Spin<PageTable>, bytes: usize) {
    #[cfg(target_os = "none")]
    {
        let start = {
            let mut pmm = pmm.lock();
            let mut table = table.lock();
            VMM.lock().sbrk(&mut pmm, &mut table, bytes as isize)
        };
        if HEAP_INITIALISED.swap(true, Ordering::AcqRel) {
            unsafe { ALLOCATOR.lock().extend(bytes) };
        } else {
            unsafe { ALLOCATOR.lock().init(start.addr() as *mut u8, bytes) };
        }
    }
    #[cfg(not(target_os = "none"))]
    {
        let _ = (pmm, table, bytes);
    }
}

#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error(layout: core::alloc::Layout) -> ! {
    crate::fatal!("out of memory allocating {} bytes", layout.size())
}
