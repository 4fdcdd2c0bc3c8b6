//! Raw 8-byte page-table-entry access shared by the long-mode and PAE
//! backends (both use 8-byte entries; ia32 uses 4-byte entries and handles
//! its own encoding directly). Every function here is only ever called from
//! a `target_os = "none"` block — on any other target there is no real
//! physical memory behind these addresses to write through.

use crate::address::{Addr as _, PAddr, PhysAccess};
use crate::pmm::Pmm;

const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

pub(super) const PRESENT: u64 = 1 << 0;
const WRITE: u64 = 1 << 1;
const USER: u64 = 1 << 2;

/// Flags linking an interior table to its parent: present, writable, and
/// user-accessible so the leaf permission is the only thing restricting the
/// mapping (the CPU ANDs permission bits across every level of the walk).
pub(super) const LINK_FLAGS: u64 = PRESENT | WRITE | USER;

/// # Safety
/// `table` must be the physical address of a live page-table frame and
/// `index` must be in bounds for one level of the hierarchy.
pub(super) unsafe fn read(table: PAddr, index: usize) -> u64 {
    PAddr::as_ptr::<u64>(table + index * 8).as_ptr().read()
}

/// # Safety
/// Same contract as [`read`].
pub(super) unsafe fn write(table: PAddr, index: usize, value: u64) {
    PAddr::as_ptr::<u64>(table + index * 8).as_ptr().write(value);
}

fn entry_addr(entry: u64) -> PAddr {
    PAddr::from_val((entry & ADDR_MASK) as usize)
}

pub(super) fn make_entry(phys: PAddr, flags: u64) -> u64 {
    (phys.addr() as u64 & ADDR_MASK) | flags
}

/// # Safety
/// `frame` must be a freshly allocated, otherwise-unreferenced physical
/// frame.
pub(super) unsafe fn zero_frame(frame: PAddr) {
    core::ptr::write_bytes(PAddr::as_ptr::<u64>(frame).as_ptr(), 0, 512);
}

/// Returns the child table physical address at `index` of `table` if
/// present, without allocating one.
///
/// # Safety
/// Same contract as [`read`].
pub(super) unsafe fn child_if_present(table: PAddr, index: usize) -> Option<PAddr> {
    let entry = read(table, index);
    (entry & PRESENT != 0).then(|| entry_addr(entry))
}

/// Returns the physical address of the child table at `index` of `table`,
/// allocating and zeroing a fresh frame and linking it with `link_flags` if
/// the entry is not yet present.
///
/// # Safety
/// Same contract as [`read`].
pub(super) unsafe fn ensure_child(
    pmm: &mut Pmm,
    table: PAddr,
    index: usize,
    link_flags: u64,
) -> PAddr {
    if let Some(child) = child_if_present(table, index) {
        return child;
    }
    let child = pmm
        .allocate_frames(1)
        .expect("out of memory extending page table");
    zero_frame(child);
    write(table, index, make_entry(child, link_flags));
    child
}
