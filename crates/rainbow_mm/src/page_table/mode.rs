use alloc::collections::BTreeMap;

use super::flags::Permission;
use crate::address::{PAddr, VAddr};
use crate::pmm::Pmm;

/// Which architectural features the running mode actually has, probed once
/// at `init` time. Today this only tracks NX (spec §4.B "NX probe"); the
/// mask is intersected with every `map_page` call.
#[derive(Clone, Copy, Debug, Default)]
pub struct SupportedFlags {
    pub nx: bool,
}

#[cfg(target_os = "none")]
pub fn probe_nx() -> bool {
    // SAFETY: CPUID leaf 0x8000_0001 is always available on any CPU this
    // kernel boots on (it predates long mode support itself).
    let result = unsafe { core::arch::x86_64::__cpuid(0x8000_0001) };
    result.edx & (1 << 20) != 0
}

#[cfg(not(target_os = "none"))]
pub fn probe_nx() -> bool {
    true
}

/// Common contract every paging-mode implementation satisfies (spec §4.B,
/// §9 "tagged variant with a common trait"). [`super::PageTable`] dispatches
/// to one of these by matching on the enum picked once at boot.
pub trait PagingMode: Sized {
    fn enable(&self);

    fn map_page(&mut self, pmm: &mut Pmm, phys: PAddr, virt: VAddr, perm: Permission);

    fn map(&mut self, pmm: &mut Pmm, phys: PAddr, virt: VAddr, size: usize, perm: Permission) {
        let mut offset = 0;
        while offset < size {
            self.map_page(pmm, phys + offset, virt + offset, perm);
            offset += crate::paging::PAGE_SIZE;
        }
    }

    fn get_root(&self) -> PAddr;

    fn get_physical_address(&self, virt: VAddr) -> Option<PAddr>;

    fn unmap_pages(&mut self, virt: VAddr, n: usize);

    fn clone_kernel_half(&self, pmm: &mut Pmm) -> Self;
}

/// Software bookkeeping shared by all three modes: which virtual page maps
/// to which frame, under which permission. This is what backs
/// `get_physical_address`/`unmap_pages`/the map-over-map fatal check; it is
/// kept alongside (not instead of) the raw hardware PTEs written under
/// `target_os = "none"`, so the mapping contract stays host-testable even
/// though the on-target side dereferences real physical memory.
#[derive(Default)]
pub(super) struct SoftwareTable {
    entries: BTreeMap<usize, (PAddr, Permission)>,
}

impl SoftwareTable {
    pub(super) fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Records `virt -> phys` and returns `false` if the page was already
    /// mapped (the caller must treat that as fatal, per spec §4.B).
    pub(super) fn insert(&mut self, virt: VAddr, phys: PAddr, perm: Permission) -> bool {
        use crate::address::Addr as _;
        self.entries.insert(virt.addr(), (phys, perm)).is_none()
    }

    pub(super) fn get(&self, virt: VAddr) -> Option<PAddr> {
        use crate::address::Addr as _;
        self.entries.get(&virt.addr()).map(|(phys, _)| *phys)
    }

    pub(super) fn remove(&mut self, virt: VAddr) {
        use crate::address::Addr as _;
        self.entries.remove(&virt.addr());
    }

    /// Entries at or above `boundary` — the caller's chosen kernel/user
    /// split point. The user half is never carried into a clone (spec §4.B
    /// "Cloning": "the user half starts empty").
    pub(super) fn kernel_half(&self, boundary: usize) -> impl Iterator<Item = (usize, PAddr, Permission)> + '_ {
        self.entries
            .iter()
            .filter(move |(&v, _)| v >= boundary)
            .map(|(&v, &(p, perm))| (v, p, perm))
    }
}
