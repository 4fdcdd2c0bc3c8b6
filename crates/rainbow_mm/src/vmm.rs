//! Virtual memory manager (spec §4.C): kernel heap, anonymous page
//! allocation, MMIO mapping and the direct-map fast path, all coordinating
//! the [`Pmm`] and a [`PageTable`].

use rainbow_sync::Spin;

use crate::address::{Addr as _, AddrOps as _, PAddr, VAddr};
use crate::page_table::{LongModePageTable, PageTable, Permission};
use crate::paging::PAGE_SIZE;
use crate::pmm::Pmm;

/// Kernel-side virtual layout on long mode (spec §4.C table); 32-bit/PAE
/// builds use analogous, narrower splits owned by their own mode module.
pub const KERNEL_HEAP_BASE: usize = 0xFFFF_FF80_0000_0000;
pub const KERNEL_HEAP_CEILING: usize = 0xFFFF_FFFF_7FFF_FFFF;

pub struct Vmm {
    heap_break: usize,
    /// Top of the mmap region; `allocate_pages` grows this *down* towards
    /// `heap_break` (spec §4.C).
    mmap_floor: usize,
}

impl Vmm {
    pub const fn new() -> Self {
        Self {
            heap_break: KERNEL_HEAP_BASE,
            mmap_floor: KERNEL_HEAP_CEILING,
        }
    }

    /// Extends/shrinks the kernel heap break by `delta` bytes, returning the
    /// break *before* the adjustment (the `sbrk(2)` convention). On growth,
    /// allocates and zero-maps whole frames; on shrink, only the break
    /// pointer moves (spec §4.C: "adjusts the break only").
    pub fn sbrk(&mut self, pmm: &mut Pmm, table: &mut PageTable, delta: isize) -> VAddr {
        let old_break = self.heap_break;

        if delta > 0 {
            let delta = delta as usize;
            let old_top = old_break;
            let new_top = old_break + delta;
            assert!(new_top <= self.mmap_floor, "kernel heap ran into the mmap region");

            let first_page = VAddr::from(old_top).floor();
            let last_page = VAddr::from(new_top - 1).floor();
            let mut virt = first_page;
            while virt <= last_page {
                let frame = pmm.allocate_frames(1).expect("out of memory growing kernel heap");
                table.map_page(pmm, frame, virt, Permission::KernelDataRw);
                virt = virt + PAGE_SIZE;
            }
            self.heap_break = new_top;
        } else {
            self.heap_break = old_break - (-delta) as usize;
        }

        VAddr::from(old_break)
    }

    /// PMM-allocates `n` frames and maps them into the mmap region, which
    /// grows down from the heap ceiling (spec §4.C).
    pub fn allocate_pages(&mut self, pmm: &mut Pmm, table: &mut PageTable, n: usize) -> VAddr {
        let size = n * PAGE_SIZE;
        assert!(
            self.mmap_floor - size >= self.heap_break,
            "mmap region ran into the kernel heap"
        );
        self.mmap_floor -= size;
        let base = VAddr::from(self.mmap_floor);

        let mut virt = base;
        for _ in 0..n {
            let frame = pmm.allocate_frames(1).expect("out of memory allocating kernel pages");
            table.map_page(pmm, frame, virt, Permission::KernelDataRw);
            virt = virt + PAGE_SIZE;
        }
        base
    }

    /// Maps `n` frames starting at `phys` with `flags`. On long mode, plain
    /// kernel-data mappings take the direct-map fast path and never touch
    /// the page table at all; everything else (and every 32-bit/PAE
    /// request) is carved out of the mmap region.
    pub fn map_pages(
        &mut self,
        pmm: &mut Pmm,
        table: &mut PageTable,
        phys: PAddr,
        n: usize,
        perm: Permission,
    ) -> VAddr {
        if let PageTable::LongMode(_) = table {
            if perm == Permission::KernelDataRw {
                return LongModePageTable::direct_map(phys);
            }
        }

        let size = n * PAGE_SIZE;
        assert!(
            self.mmap_floor - size >= self.heap_break,
            "mmap region ran into the kernel heap"
        );
        self.mmap_floor -= size;
        let base = VAddr::from(self.mmap_floor);

        table.map(pmm, phys, base, size, perm);
        base
    }

    pub fn unmap_pages(&mut self, table: &mut PageTable, virt: VAddr, n: usize) {
        table.unmap_pages(virt, n);
    }

    pub fn get_physical_address(&self, table: &PageTable, virt: VAddr) -> Option<PAddr> {
        table.get_physical_address(virt)
    }
}

impl Default for Vmm {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-task user heap: `[start, break, end)`, bumped under a lock (spec
/// §4.C "Per-task user heap").
pub struct UserHeap {
    start: VAddr,
    brk: Spin<usize>,
    end: VAddr,
}

impl UserHeap {
    pub fn init(start: VAddr, end: VAddr) -> Self {
        Self {
            start,
            brk: Spin::new(start.addr()),
            end,
        }
    }

    pub fn allocate_user_pages(&self, pmm: &mut Pmm, table: &mut PageTable, n: usize) -> VAddr {
        let size = n * PAGE_SIZE;
        let mut brk = self.brk.lock();
        let base = VAddr::from(*brk);
        assert!(base.addr() + size <= self.end.addr(), "user heap exhausted");

        let mut virt = base;
        for _ in 0..n {
            let frame = pmm.allocate_frames(1).expect("out of memory growing user heap");
            table.map_page(pmm, frame, virt, Permission::UserDataRw);
            virt = virt + PAGE_SIZE;
        }

        *brk += size;
        base
    }

    pub fn free_user_pages(&self, table: &mut PageTable, ptr: VAddr, n: usize) {
        table.unmap_pages(ptr, n);
    }

    pub fn start(&self) -> VAddr {
        self.start
    }

    pub fn break_addr(&self) -> VAddr {
        VAddr::from(*self.brk.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddrRange;
    use crate::pmm::{MemoryDescriptor, MemoryKind};

    fn pmm_with_memory() -> Pmm {
        let mut pmm = Pmm::new();
        pmm.init(&[MemoryDescriptor {
            kind: MemoryKind::Available,
            range: AddrRange::new(PAddr::from_val(0x10_0000), PAddr::from_val(0x1000_0000)),
        }]);
        pmm
    }

    #[test]
    fn sbrk_round_trip_restores_the_break() {
        rainbow_percpu::install_test_cpu(0);
        let mut pmm = pmm_with_memory();
        let mut table = PageTable::init_long_mode(&mut pmm);
        let mut vmm = Vmm::new();

        let before = vmm.heap_break;
        vmm.sbrk(&mut pmm, &mut table, 4096);
        vmm.sbrk(&mut pmm, &mut table, -4096);
        assert_eq!(vmm.heap_break, before);
    }

    #[test]
    fn map_pages_kernel_rw_uses_the_direct_map() {
        let mut pmm = pmm_with_memory();
        let mut table = PageTable::init_long_mode(&mut pmm);
        let mut vmm = Vmm::new();

        let phys = PAddr::from_val(0x40_0000);
        let virt = vmm.map_pages(&mut pmm, &mut table, phys, 1, Permission::KernelDataRw);
        assert_eq!(virt, LongModePageTable::direct_map(phys));
    }

    #[test]
    fn user_heap_bumps_the_break_per_allocation() {
        rainbow_percpu::install_test_cpu(1);
        let mut pmm = pmm_with_memory();
        let mut table = PageTable::init_long_mode(&mut pmm);
        let heap = UserHeap::init(VAddr::from(0x1000_0000), VAddr::from(0x2000_0000));

        let first = heap.allocate_user_pages(&mut pmm, &mut table, 1);
        let second = heap.allocate_user_pages(&mut pmm, &mut table, 1);
        assert_eq!(second, first + PAGE_SIZE);
    }
}
