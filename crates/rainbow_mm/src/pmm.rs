//! Physical frame allocator (spec §4.A).
//!
//! Owns an unsorted list of free frame ranges, split at the 1 MiB and 4 GiB
//! boundaries at `init` time so "allocate below X" requests can skip past
//! unrelated high ranges instead of scanning the whole list.

use alloc::vec::Vec;

use crate::address::{Addr as _, AddrRange, FrameRange, PAddr};
use crate::paging::PAGE_SIZE;

const ONE_MIB: usize = 0x0010_0000;
const FOUR_GIB: usize = 0x1_0000_0000;

/// Classification of one entry in the loader-provided memory map (spec §6,
/// `BootInfo`'s memory descriptor array). Only `Available` ranges are ever
/// handed to the PMM's free list; everything else is recorded for the
/// running totals only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryKind {
    Available,
    Reserved,
    Unusable,
    Persistent,
    Bootloader,
    BootModule,
    KernelCode,
    KernelData,
    AcpiReclaimable,
    AcpiNvs,
    Launcher,
}

#[derive(Clone, Copy, Debug)]
pub struct MemoryDescriptor {
    pub kind: MemoryKind,
    pub range: FrameRange,
}

/// Running totals the PMM tracks across `init`/`allocate_frames`/`free_frames`
/// so `sum(free) + sum(allocated) == system memory - unavailable` can be
/// checked by a caller (spec §8).
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryStats {
    pub available: usize,
    pub allocated: usize,
}

pub struct Pmm {
    free: Vec<FrameRange>,
    stats: MemoryStats,
}

impl Pmm {
    pub const fn new() -> Self {
        Self {
            free: Vec::new(),
            stats: MemoryStats {
                available: 0,
                allocated: 0,
            },
        }
    }

    /// Classifies the loader's memory map, keeping only `Available` ranges,
    /// split at the 1 MiB and 4 GiB boundaries.
    pub fn init(&mut self, memory_map: &[MemoryDescriptor]) {
        for descriptor in memory_map {
            if descriptor.kind != MemoryKind::Available {
                continue;
            }

            self.stats.available += descriptor.range.len();

            for piece in split_at_boundaries(descriptor.range) {
                self.free.push(piece);
            }
        }
    }

    /// First-fit allocation of `n` contiguous frames, skipping ranges that
    /// lie entirely below 1 MiB (reserved for real-mode trampolines).
    ///
    /// Exhaustion is a fatal condition at the call site (spec §7); this
    /// function itself only reports it via `None` so leaf crates never need
    /// to reach across the workspace to the kernel's fatal-error sink.
    pub fn allocate_frames(&mut self, n: usize) -> Option<PAddr> {
        let size = n * PAGE_SIZE;
        let index = self
            .free
            .iter()
            .position(|r| r.len() >= size && r.end().addr() > ONE_MIB)?;
        Some(self.take_from(index, size))
    }

    /// First-fit allocation of `n` contiguous frames entirely below `limit`.
    pub fn allocate_frames_under(&mut self, n: usize, limit: PAddr) -> Option<PAddr> {
        let size = n * PAGE_SIZE;
        let index = self
            .free
            .iter()
            .position(|r| r.len() >= size && r.end() <= limit)?;
        Some(self.take_from(index, size))
    }

    /// Releases `n` frames starting at `frame` back to the free list.
    ///
    /// Contract: memory eventually becomes available again for allocation;
    /// this implementation does not coalesce adjacent ranges back together,
    /// matching the PMM's simple first-fit design (a future buddy/coalescing
    /// allocator can replace the free-list representation without touching
    /// this contract).
    pub fn free_frames(&mut self, frame: PAddr, n: usize) {
        let range = AddrRange::new(frame, frame + n * PAGE_SIZE);
        self.stats.allocated -= range.len();
        self.free.push(range);
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats
    }

    fn take_from(&mut self, index: usize, size: usize) -> PAddr {
        let range = self.free[index];
        let start = range.start();

        let (_, remainder) = range.split_at(start + size);
        if remainder.is_empty() {
            self.free.remove(index);
        } else {
            self.free[index] = remainder;
        }

        self.stats.allocated += size;
        start
    }
}

impl Default for Pmm {
    fn default() -> Self {
        Self::new()
    }
}

fn split_at_boundaries(range: FrameRange) -> impl Iterator<Item = FrameRange> {
    let mut pieces = Vec::with_capacity(3);
    let mut rest = range;

    for boundary in [PAddr::from_val(ONE_MIB), PAddr::from_val(FOUR_GIB)] {
        if rest.start() < boundary && boundary < rest.end() {
            let (left, right) = rest.split_at(boundary);
            pieces.push(left);
            rest = right;
        }
    }
    pieces.push(rest);
    pieces.into_iter().filter(|r| !r.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(start: usize, end: usize) -> MemoryDescriptor {
        MemoryDescriptor {
            kind: MemoryKind::Available,
            range: AddrRange::new(PAddr::from_val(start), PAddr::from_val(end)),
        }
    }

    #[test]
    fn init_splits_at_one_mib_and_four_gib() {
        let mut pmm = Pmm::new();
        pmm.init(&[descriptor(0, FOUR_GIB + ONE_MIB)]);
        assert_eq!(pmm.free.len(), 3);
        assert_eq!(pmm.stats().available, FOUR_GIB + ONE_MIB);
    }

    #[test]
    fn allocate_frames_skips_below_one_mib() {
        let mut pmm = Pmm::new();
        pmm.init(&[descriptor(0, 2 * ONE_MIB)]);

        let frame = pmm.allocate_frames(1).unwrap();
        assert!(frame.addr() >= ONE_MIB);
    }

    #[test]
    fn allocate_frames_under_stays_below_limit() {
        let mut pmm = Pmm::new();
        pmm.init(&[descriptor(0, 2 * ONE_MIB)]);

        let frame = pmm
            .allocate_frames_under(1, PAddr::from_val(ONE_MIB))
            .unwrap();
        assert!(frame.addr() < ONE_MIB);

        // Subsequent `allocate_frames` must not reuse the low region.
        let frame = pmm.allocate_frames(1).unwrap();
        assert!(frame.addr() >= ONE_MIB);
    }

    #[test]
    fn exhaustion_reports_none() {
        let mut pmm = Pmm::new();
        pmm.init(&[descriptor(ONE_MIB, ONE_MIB + PAGE_SIZE)]);

        assert!(pmm.allocate_frames(1).is_some());
        assert!(pmm.allocate_frames(1).is_none());
    }

    #[test]
    fn free_then_allocate_reuses_frame() {
        let mut pmm = Pmm::new();
        pmm.init(&[descriptor(ONE_MIB, ONE_MIB + PAGE_SIZE)]);

        let frame = pmm.allocate_frames(1).unwrap();
        pmm.free_frames(frame, 1);
        assert!(pmm.allocate_frames(1).is_some());
    }

    #[test]
    fn totals_balance_across_alloc_and_free() {
        let mut pmm = Pmm::new();
        pmm.init(&[descriptor(ONE_MIB, ONE_MIB + 4 * PAGE_SIZE)]);

        let frame = pmm.allocate_frames(2).unwrap();
        assert_eq!(pmm.stats().allocated, 2 * PAGE_SIZE);
        pmm.free_frames(frame, 2);
        assert_eq!(pmm.stats().allocated, 0);
    }
}
