//! Compile-time kernel tunables (SPEC_FULL §4): one module collecting the
//! magic numbers that would otherwise be scattered through the tree.

/// Preemption-timer frequency (spec §4.D "Arm the 200 Hz preemption
/// timer...").
pub const TICK_HZ: u64 = 200;

/// Pages allocated for each task's kernel stack.
pub const KERNEL_STACK_PAGES: usize = 4;

/// Virtual address a kernel page is recursively mapped at, per paging mode
/// (spec §4.B); `0` disables recursive mapping for long mode, which instead
/// uses the direct map.
pub const RECURSIVE_SLOT_IA32: usize = 0xFFC0_0000;
pub const RECURSIVE_SLOT_PAE: usize = 0xFFE0_0000;

/// Base of the kernel heap (`sbrk` region), above the direct map.
pub const KERNEL_HEAP_BASE: usize = 0xFFFF_FF00_0000_0000;

/// Base of the long-mode direct physical map (spec §4.C).
pub const DIRECT_MAP_BASE: usize = 0xFFFF_8000_0000_0000;

/// Fixed virtual address of the VDSO page (spec §6 "VDSO").
pub const VMA_VDSO_START: usize = 0x7FFF_F000;

/// Base of each task's anonymous `mmap` region (spec §6 "Known calls:
/// ... mmap, munmap").
pub const VMA_MMAP_BASE: usize = 0x4000_0000;

/// Real-mode trampoline target for SMP bring-up (spec §4.G step 1).
pub const AP_TRAMPOLINE_BASE: usize = 0x8000;
