use super::flags::Permission;
use super::mode::{PagingMode, SoftwareTable, SupportedFlags};
use crate::address::PhysAccess;
use crate::address::PAddr;
use crate::address::VAddr;
use crate::pmm::Pmm;

/// Self-reference slot of the single page directory (spec §4.B: "on 32-bit,
/// slot 1023 of PML2").
pub const RECURSIVE_SLOT: usize = 1023;

/// Page-directory index `0xC000_0000` falls at — the classic 3 GiB/1 GiB
/// kernel/user split a clone's kernel half is carried across.
const KERNEL_HALF_START: usize = 768;

const ADDR_MASK: u32 = 0xFFFF_F000;
const PRESENT: u32 = 1 << 0;
const WRITE: u32 = 1 << 1;
const USER: u32 = 1 << 2;
const LINK_FLAGS: u32 = PRESENT | WRITE | USER;

/// # Safety
/// `table` must be the physical address of a live page-directory or
/// page-table frame and `index` in `0..1024`.
unsafe fn read(table: PAddr, index: usize) -> u32 {
    PAddr::as_ptr::<u32>(table + index * 4).as_ptr().read()
}

/// # Safety
/// Same contract as [`read`].
unsafe fn write(table: PAddr, index: usize, value: u32) {
    PAddr::as_ptr::<u32>(table + index * 4).as_ptr().write(value);
}

fn make_entry(phys: PAddr, flags: u32) -> u32 {
    use crate::address::Addr as _;
    (phys.addr() as u32 & ADDR_MASK) | flags
}

/// # Safety
/// `frame` must be a freshly allocated, otherwise-unreferenced physical
/// frame.
unsafe fn zero_frame(frame: PAddr) {
    core::ptr::write_bytes(PAddr::as_ptr::<u32>(frame).as_ptr(), 0, 1024);
}

/// # Safety
/// Same contract as [`read`].
unsafe fn ensure_child(pmm: &mut Pmm, table: PAddr, index: usize, link_flags: u32) -> PAddr {
    let entry = read(table, index);
    if entry & PRESENT != 0 {
        return PAddr::from_val((entry & ADDR_MASK) as usize);
    }
    let child = pmm
        .allocate_frames(1)
        .expect("out of memory extending page table");
    zero_frame(child);
    write(table, index, make_entry(child, link_flags));
    child
}

pub struct Ia32PageTable {
    root: PAddr,
    supported: SupportedFlags,
    software: SoftwareTable,
}

impl Ia32PageTable {
    pub fn init(pmm: &mut Pmm) -> Self {
        let root = pmm.allocate_frames(1).expect("out of memory initialising page table");
        #[cfg(target_os = "none")]
        unsafe {
            zero_frame(root);
            write(root, RECURSIVE_SLOT, make_entry(root, LINK_FLAGS));
        }
        Self {
            root,
            supported: SupportedFlags { nx: false },
            software: SoftwareTable::new(),
        }
    }

    fn indices(virt: VAddr) -> (usize, usize) {
        use crate::address::Addr as _;
        let addr = virt.addr();
        ((addr >> 22) & 0x3FF, (addr >> 12) & 0x3FF)
    }
}

impl PagingMode for Ia32PageTable {
    fn enable(&self) {
        #[cfg(target_os = "none")]
        unsafe {
            use crate::address::Addr as _;
            core::arch::asm!(
                "mov cr3, {0}",
                "mov {1}, cr0",
                "or {1}, 0x80000000",
                "mov cr0, {1}",
                in(reg) self.root.addr(),
                out(reg) _,
                options(nostack, preserves_flags),
            );
        }
    }

    fn map_page(&mut self, pmm: &mut Pmm, phys: PAddr, virt: VAddr, perm: Permission) {
        if !self.software.insert(virt, phys, perm) {
            panic!("map-over-map at {virt:?}");
        }

        #[cfg(target_os = "none")]
        unsafe {
            let (pd_i, pt_i) = Self::indices(virt);
            let pt = ensure_child(pmm, self.root, pd_i, LINK_FLAGS);
            let flags = perm.raw_flags().clamp_nx(self.supported.nx).to_bits() as u32;
            write(pt, pt_i, make_entry(phys, flags));
        }
        #[cfg(not(target_os = "none"))]
        let _ = pmm;
    }

    fn get_root(&self) -> PAddr {
        self.root
    }

    fn get_physical_address(&self, virt: VAddr) -> Option<PAddr> {
        self.software.get(virt)
    }

    fn unmap_pages(&mut self, virt: VAddr, n: usize) {
        let mut addr = virt;
        for _ in 0..n {
            self.software.remove(addr);

            #[cfg(target_os = "none")]
            unsafe {
                let (pd_i, pt_i) = Self::indices(addr);
                let pd_entry = read(self.root, pd_i);
                if pd_entry & PRESENT != 0 {
                    let pt = PAddr::from_val((pd_entry & ADDR_MASK) as usize);
                    write(pt, pt_i, 0);
                }
            }

            addr = addr + crate::paging::PAGE_SIZE;
        }
    }

    fn clone_kernel_half(&self, pmm: &mut Pmm) -> Self {
        let mut clone = Self::init(pmm);
        clone.supported = self.supported;
        for (virt, phys, perm) in self.software.kernel_half(KERNEL_HALF_START << 22) {
            clone.software.insert(VAddr::from(virt), phys, perm);
        }

        #[cfg(target_os = "none")]
        unsafe {
            for index in KERNEL_HALF_START..RECURSIVE_SLOT {
                let entry = read(self.root, index);
                if entry & PRESENT != 0 {
                    write(clone.root, index, entry);
                }
            }
        }

        clone
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
            range: AddrRange::new(PAddr::from_val(0x10_0000), PAddr::from_val(0x100_0000)),
        }]);
        pmm
    }

    #[test]
    fn map_then_unmap_clears_the_translation() {
        let mut pmm = pmm_with_memory();
        let mut table = Ia32PageTable::init(&mut pmm);

        let virt = VAddr::from(0x4000_0000);
        let phys = PAddr::from_val(0x20_0000);
        table.map_page(&mut pmm, phys, virt, Permission::KernelDataRw);
        assert_eq!(table.get_physical_address(virt), Some(phys));

        table.unmap_pages(virt, 1);
        assert_eq!(table.get_physical_address(virt), None);
    }

    #[test]
    #[should_panic]
    fn map_over_map_is_fatal() {
        let mut pmm = pmm_with_memory();
        let mut table = Ia32PageTable::init(&mut pmm);

        let virt = VAddr::from(0x4000_0000);
        table.map_page(&mut pmm, PAddr::from_val(0x20_0000), virt, Permission::KernelDataRw);
        table.map_page(&mut pmm, PAddr::from_val(0x21_0000), virt, Permission::KernelDataRw);
    }

    #[test]
    fn indices_split_the_classic_three_gib_boundary() {
        let (pd, pt) = Ia32PageTable::indices(VAddr::from(0xC000_0000));
        assert_eq!((pd, pt), (KERNEL_HALF_START, 0));
    }
}
