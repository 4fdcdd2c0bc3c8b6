mod addr;
mod addr_range;
mod paddr;
mod vaddr;

pub use addr::{Addr, AddrOps};
pub use addr_range::AddrRange;
pub use paddr::{PAddr, PhysAccess};
pub use vaddr::VAddr;

pub type PRange = AddrRange<PAddr>;
pub type VRange = AddrRange<VAddr>;

/// A physical frame range: `{start, end}`, half-open, page-aligned. This is
/// the PMM's unit of bookkeeping (spec's "frame range"), spelled out as an
/// alias so `pmm.rs` doesn't need to repeat the page-alignment invariant in
/// its own type.
pub type FrameRange = PRange;
