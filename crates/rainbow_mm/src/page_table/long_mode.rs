use super::flags::Permission;
use super::mode::{probe_nx, PagingMode, SoftwareTable, SupportedFlags};
use super::pte;
use crate::address::PAddr;
use crate::address::VAddr;
use crate::pmm::Pmm;

/// Self-reference slot of the PML4 (spec §4.B: "on long mode, slot 510 of
/// PML4").
pub const RECURSIVE_SLOT: usize = 510;

/// Base of the direct map of all physical RAM, installed by the PMM after
/// `init` on 64-bit builds (spec §4.A, §4.C).
pub const DIRECT_MAP_BASE: usize = 0xFFFF_8000_0000_0000;

/// PML4 index `0xFFFF_8000_0000_0000` falls at — the kernel/user split point
/// a clone's kernel half is carried across (spec §4.B "Cloning").
const KERNEL_HALF_START: usize = 256;

pub struct LongModePageTable {
    root: PAddr,
    supported: SupportedFlags,
    software: SoftwareTable,
}

impl LongModePageTable {
    pub fn init(pmm: &mut Pmm) -> Self {
        let root = pmm.allocate_frames(1).expect("out of memory initialising page table");
        #[cfg(target_os = "none")]
        unsafe {
            pte::zero_frame(root);
            pte::write(root, RECURSIVE_SLOT, pte::make_entry(root, pte::LINK_FLAGS));
        }
        Self {
            root,
            supported: SupportedFlags { nx: probe_nx() },
            software: SoftwareTable::new(),
        }
    }

    /// `phys + DIRECT_MAP_BASE` — the fast path `map_pages` takes for plain
    /// kernel data (spec §4.C): no page-table walk needed since the whole
    /// of physical RAM is already mapped there.
    pub fn direct_map(phys: PAddr) -> VAddr {
        use crate::address::Addr as _;
        VAddr::from(phys.addr() + DIRECT_MAP_BASE)
    }

    fn indices(virt: VAddr) -> (usize, usize, usize, usize) {
        use crate::address::Addr as _;
        let addr = virt.addr();
        (
            (addr >> 39) & 0x1FF,
            (addr >> 30) & 0x1FF,
            (addr >> 21) & 0x1FF,
            (addr >> 12) & 0x1FF,
        )
    }
}

impl PagingMode for LongModePageTable {
    fn enable(&self) {
        #[cfg(target_os = "none")]
        unsafe {
            use crate::address::Addr as _;
            core::arch::asm!(
                "mov cr3, {0}",
                in(reg) self.root.addr(),
                options(nostack, preserves_flags),
            );
            if self.supported.nx {
                core::arch::asm!(
                    "rdmsr",
                    "or eax, 0x800",
                    "wrmsr",
                    in("ecx") 0xC000_0080u32,
                    out("eax") _,
                    out("edx") _,
                    options(nostack),
                );
            }
        }
    }

    fn map_page(&mut self, pmm: &mut Pmm, phys: PAddr, virt: VAddr, perm: Permission) {
        if !self.software.insert(virt, phys, perm) {
            panic!("map-over-map at {virt:?}");
        }

        #[cfg(target_os = "none")]
        unsafe {
            let (pml4_i, pdpt_i, pd_i, pt_i) = Self::indices(virt);
            let pdpt = pte::ensure_child(pmm, self.root, pml4_i, pte::LINK_FLAGS);
            let pd = pte::ensure_child(pmm, pdpt, pdpt_i, pte::LINK_FLAGS);
            let pt = pte::ensure_child(pmm, pd, pd_i, pte::LINK_FLAGS);
            let flags = perm.raw_flags().clamp_nx(self.supported.nx).to_bits();
            pte::write(pt, pt_i, pte::make_entry(phys, flags));
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
                let (pml4_i, pdpt_i, pd_i, pt_i) = Self::indices(addr);
                if let Some(pdpt) = pte::child_if_present(self.root, pml4_i) {
                    if let Some(pd) = pte::child_if_present(pdpt, pdpt_i) {
                        if let Some(pt) = pte::child_if_present(pd, pd_i) {
                            pte::write(pt, pt_i, 0);
                        }
                    }
                }
            }

            addr = addr + crate::paging::PAGE_SIZE;
        }
    }

    fn clone_kernel_half(&self, pmm: &mut Pmm) -> Self {
        let mut clone = Self::init(pmm);
        clone.supported = self.supported;
        for (virt, phys, perm) in self.software.kernel_half(DIRECT_MAP_BASE) {
            clone.software.insert(VAddr::from(virt), phys, perm);
        }

        #[cfg(target_os = "none")]
        unsafe {
            for index in KERNEL_HALF_START..RECURSIVE_SLOT {
                let entry = pte::read(self.root, index);
                if entry & pte::PRESENT != 0 {
                    pte::write(clone.root, index, entry);
                }
            }
        }

        clone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_map_offsets_by_the_base() {
        let phys = PAddr::from_val(0x1234_000);
        let virt = LongModePageTable::direct_map(phys);
        use crate::address::Addr as _;
        assert_eq!(virt.addr(), DIRECT_MAP_BASE + 0x1234_000);
    }

    #[test]
    fn indices_split_a_canonical_higher_half_address() {
        let virt = VAddr::from(DIRECT_MAP_BASE);
        let (pml4, pdpt, pd, pt) = LongModePageTable::indices(virt);
        assert_eq!(pml4, KERNEL_HALF_START);
        assert_eq!((pdpt, pd, pt), (0, 0, 0));
    }
}
