//! Long-mode GDT + TSS construction (spec §4.D context switch, §4.G AP entry).
//!
//! A packed-`u64` descriptor array loaded with `lgdt`/`ltr`. One `Gdt`/`Tss`
//! pair lives in each CPU's [`rainbow_percpu::PerCpu`] block (`gdt`/`tss`
//! fields), built once during that CPU's bring-up.

use core::mem::size_of;

#[repr(transparent)]
#[derive(Debug, Clone, Copy)]
pub struct GdtEntry(u64);

impl GdtEntry {
    pub const NULL: Self = Self(0);

    pub const KERNEL_CODE64: Self = Self::new(0, 0, 0x9a, 0x2);
    pub const KERNEL_DATA64: Self = Self::new(0, 0, 0x92, 0x0);
    pub const USER_CODE64: Self = Self::new(0, 0, 0xfa, 0x2);
    pub const USER_DATA64: Self = Self::new(0, 0, 0xf2, 0x0);

    // ia32/PAE user segments, flat 4 GiB, needed only while a task compiled
    // for one of the 32-bit paging modes is scheduled on a long-mode CPU.
    pub const USER_CODE32: Self = Self::new(0, 0xfffff, 0xfa, 0xc);
    pub const USER_DATA32: Self = Self::new(0, 0xfffff, 0xf2, 0xc);

    pub const fn new(base: u32, limit: u32, access: u8, flags: u8) -> Self {
        let mut entry = 0u64;
        entry |= (limit & 0x0000_ffff) as u64;
        entry |= ((limit & 0x000f_0000) as u64) << 32;
        entry |= ((base & 0x00ff_ffff) as u64) << 16;
        entry |= ((base & 0xff00_0000) as u64) << 32;
        entry |= (access as u64) << 40;
        entry |= (flags as u64) << 52;
        Self(entry)
    }

    pub const fn new_tss(base: u64, limit: u32) -> [Self; 2] {
        let low = Self::new(base as u32, limit, 0x89, 0x0);
        let high = Self(base >> 32);
        [low, high]
    }

    pub const fn bits(self) -> u64 {
        self.0
    }
}

/// Task State Segment. Only `rsp0` (ring-0 entry stack) is used today; the
/// IST slots are reserved for a future double-fault/NMI stack (spec names
/// none, so they stay zeroed).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Tss {
    reserved0: u32,
    rsp: [u64; 3],
    reserved1: u64,
    ist: [u64; 7],
    reserved2: u64,
    reserved3: u16,
    iomap_base: u16,
}

impl Tss {
    pub const fn new() -> Self {
        Self {
            reserved0: 0,
            rsp: [0; 3],
            reserved1: 0,
            ist: [0; 7],
            reserved2: 0,
            reserved3: 0,
            iomap_base: size_of::<Tss>() as u16,
        }
    }

    /// Sets the ring-0 entry stack pointer used on every interrupt/syscall
    /// entry taken while running a task at a lower privilege level.
    pub fn set_rsp0(&mut self, rsp: u64) {
        self.rsp[0] = rsp;
    }
}

impl Default for Tss {
    fn default() -> Self {
        Self::new()
    }
}

const GDT_LEN: usize = 9;
const TSS_INDEX: usize = 7;

/// Per-CPU GDT: null, kernel code/data, user code/data (64-bit), user
/// code/data (32-bit, for ia32/PAE tasks), then the two-slot TSS descriptor.
#[repr(C)]
pub struct Gdt([GdtEntry; GDT_LEN]);

impl Gdt {
    pub const KERNEL_CODE_SELECTOR: u16 = 1 * 8;
    pub const KERNEL_DATA_SELECTOR: u16 = 2 * 8;
    pub const USER_CODE_SELECTOR: u16 = (3 * 8) | 3;
    pub const USER_DATA_SELECTOR: u16 = (4 * 8) | 3;
    pub const TSS_SELECTOR: u16 = TSS_INDEX as u16 * 8;

    pub fn new() -> Self {
        Self([
            GdtEntry::NULL,
            GdtEntry::KERNEL_CODE64,
            GdtEntry::KERNEL_DATA64,
            GdtEntry::USER_CODE64,
            GdtEntry::USER_DATA64,
            GdtEntry::USER_CODE32,
            GdtEntry::USER_DATA32,
            GdtEntry::NULL, // TSS descriptor low
            GdtEntry::NULL, // TSS descriptor high
        ])
    }

    pub fn set_tss(&mut self, tss: &Tss) {
        let base = tss as *const Tss as u64;
        let limit = size_of::<Tss>() as u32 - 1;
        let [low, high] = GdtEntry::new_tss(base, limit);
        self.0[TSS_INDEX] = low;
        self.0[TSS_INDEX + 1] = high;
    }

    /// Loads this GDT and its TSS selector on the calling CPU.
    ///
    /// # Safety
    /// `self` must outlive every future use of the selectors it installs
    /// (i.e. it must live in 'static per-CPU storage, never on a stack).
    #[cfg(target_os = "none")]
    pub unsafe fn load(&self) {
        use core::arch::asm;

        let len = (GDT_LEN * size_of::<GdtEntry>() - 1) as u16;
        let descriptor: (u16, u64) = (len, self.0.as_ptr() as u64);

        unsafe {
            asm!(
                "lgdt ({})",
                "mov %rax, %ds",
                "mov %rax, %es",
                "mov %rax, %ss",
                "ltr %cx",
                in(reg) &descriptor,
                in("ax") Self::KERNEL_DATA_SELECTOR,
                in("cx") Self::TSS_SELECTOR,
                options(att_syntax, nostack),
            );
        }
    }

    #[cfg(not(target_os = "none"))]
    pub unsafe fn load(&self) {}
}

impl Default for Gdt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_code_descriptor_marks_long_mode_and_executable() {
        let bits = GdtEntry::KERNEL_CODE64.bits();
        assert_eq!((bits >> 40) & 0xff, 0x9a);
        assert_eq!((bits >> 52) & 0xf, 0x2);
    }

    #[test]
    fn user_selectors_carry_ring_three() {
        assert_eq!(Gdt::USER_CODE_SELECTOR & 0x3, 3);
        assert_eq!(Gdt::USER_DATA_SELECTOR & 0x3, 3);
    }

    #[test]
    fn set_tss_fills_base_and_limit_across_two_slots() {
        let mut gdt = Gdt::new();
        let tss = Tss::new();
        gdt.set_tss(&tss);

        let low = gdt.0[TSS_INDEX].bits();
        let high = gdt.0[TSS_INDEX + 1].bits();

        let base_low = ((low >> 16) & 0x00ff_ffff) | ((low >> 32) & 0xff00_0000);
        let base_high = high & 0xffff_ffff;
        let base = base_low | (base_high << 32);
        assert_eq!(base, &tss as *const Tss as u64);

        let limit = (low & 0xffff) | ((low >> 32) & 0x000f_0000);
        assert_eq!(limit, size_of::<Tss>() as u64 - 1);
    }

    #[test]
    fn tss_rsp0_round_trips() {
        let mut tss = Tss::new();
        tss.set_rsp0(0xffff_8000_0001_0000);
        assert_eq!(tss.rsp[0], 0xffff_8000_0001_0000);
    }
}
