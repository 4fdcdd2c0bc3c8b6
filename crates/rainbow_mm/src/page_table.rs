//! Hardware page tables (spec §4.B): three paging flavours behind one
//! contract, picked once at boot (spec §9 "Polymorphism over paging modes").

mod flags;
mod ia32;
mod long_mode;
mod mode;
mod pae;
mod pte;

pub use flags::{Permission, RawFlags};
pub use ia32::Ia32PageTable;
pub use long_mode::LongModePageTable;
pub use mode::PagingMode;
pub use pae::PaePageTable;

use crate::address::{PAddr, VAddr};
use crate::pmm::Pmm;

/// The active paging mode, dispatched by matching rather than by generic
/// parameter — chosen once at boot depending on what the CPU and loader
/// support, never switched at runtime.
pub enum PageTable {
    Ia32(Ia32PageTable),
    Pae(PaePageTable),
    LongMode(LongModePageTable),
}

impl PageTable {
    pub fn init_ia32(pmm: &mut Pmm) -> Self {
        Self::Ia32(Ia32PageTable::init(pmm))
    }

    pub fn init_pae(pmm: &mut Pmm) -> Self {
        Self::Pae(PaePageTable::init(pmm))
    }

    pub fn init_long_mode(pmm: &mut Pmm) -> Self {
        Self::LongMode(LongModePageTable::init(pmm))
    }

    pub fn enable(&self) {
        match self {
            Self::Ia32(t) => t.enable(),
            Self::Pae(t) => t.enable(),
            Self::LongMode(t) => t.enable(),
        }
    }

    pub fn map(&mut self, pmm: &mut Pmm, phys: PAddr, virt: VAddr, size: usize, perm: Permission) {
        match self {
            Self::Ia32(t) => t.map(pmm, phys, virt, size, perm),
            Self::Pae(t) => t.map(pmm, phys, virt, size, perm),
            Self::LongMode(t) => t.map(pmm, phys, virt, size, perm),
        }
    }

    pub fn map_page(&mut self, pmm: &mut Pmm, phys: PAddr, virt: VAddr, perm: Permission) {
        match self {
            Self::Ia32(t) => t.map_page(pmm, phys, virt, perm),
            Self::Pae(t) => t.map_page(pmm, phys, virt, perm),
            Self::LongMode(t) => t.map_page(pmm, phys, virt, perm),
        }
    }

    pub fn get_root(&self) -> PAddr {
        match self {
            Self::Ia32(t) => t.get_root(),
            Self::Pae(t) => t.get_root(),
            Self::LongMode(t) => t.get_root(),
        }
    }

    pub fn get_physical_address(&self, virt: VAddr) -> Option<PAddr> {
        match self {
            Self::Ia32(t) => t.get_physical_address(virt),
            Self::Pae(t) => t.get_physical_address(virt),
            Self::LongMode(t) => t.get_physical_address(virt),
        }
    }

    pub fn unmap_pages(&mut self, virt: VAddr, n: usize) {
        match self {
            Self::Ia32(t) => t.unmap_pages(virt, n),
            Self::Pae(t) => t.unmap_pages(virt, n),
            Self::LongMode(t) => t.unmap_pages(virt, n),
        }
    }

    /// Allocates a fresh top-level frame and copies the kernel-half entries
    /// of `self` into it (spec §4.B "Cloning"); the user half starts empty.
    pub fn clone_kernel_half(&self, pmm: &mut Pmm) -> Self {
        match self {
            Self::Ia32(t) => Self::Ia32(t.clone_kernel_half(pmm)),
            Self::Pae(t) => Self::Pae(t.clone_kernel_half(pmm)),
            Self::LongMode(t) => Self::LongMode(t.clone_kernel_half(pmm)),
        }
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
    fn dispatch_reaches_the_active_variant() {
        let mut pmm = pmm_with_memory();
        let mut table = PageTable::init_long_mode(&mut pmm);

        let virt = VAddr::from(0xFFFF_FFFF_8000_0000usize);
        let phys = PAddr::from_val(0x20_0000);
        table.map_page(&mut pmm, phys, virt, Permission::KernelCode);
        assert_eq!(table.get_physical_address(virt), Some(phys));

        table.unmap_pages(virt, 1);
        assert_eq!(table.get_physical_address(virt), None);
    }
}
