//! Task context switch (spec §4.D "Context switch": a stack-swap routine
//! that saves/restores callee-saved registers), using a register-argument
//! naked-asm `switch`/`call` pair rather than a push/pop-based form, since
//! it avoids touching the stack red zone across the switch.
//!
//! `new_user` synthesizes the iret frame spec.md §4.D and SPEC_FULL §6
//! describe ("via a synthetic iret frame placed at task creation"): the
//! new task's kernel stack is pre-populated so the first return from
//! `switch` lands on `iret`, not on ordinary `ret`.

use core::arch::naked_asm;

use crate::gdt::Gdt;

/// Callee-saved integer registers plus the saved stack/program counters,
/// exactly as `switch` below reads and writes them. This is the *kernel*
/// context (rsp/rip at the point of `schedule()`), distinct from the
/// interrupt frame a user task's trap entry builds.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskContext {
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    rbx: u64,
    rbp: u64,
    rsp: u64,
}

/// Interrupt-return frame the CPU expects on `iret`: `rip, cs, rflags, rsp,
/// ss`, pushed in that order (lowest address first) below a task's initial
/// stack pointer.
#[repr(C)]
struct IretFrame {
    rip: u64,
    cs: u64,
    rflags: u64,
    rsp: u64,
    ss: u64,
}

const RFLAGS_IF: u64 = 0x200;

impl TaskContext {
    pub const fn new() -> Self {
        Self {
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rbx: 0,
            rbp: 0,
            rsp: 0,
        }
    }

    /// Builds the context for a brand new kernel-only task: `switch` into
    /// it will `call` `entry(arg)` with a null return address, matching
    /// `do_call`'s `push %rbp; jmp *%rbx` trampoline.
    pub fn new_kernel(stack_top: usize, entry: unsafe extern "C" fn(usize) -> !, arg: usize) -> Self {
        let mut ctx = Self::new();
        ctx.rbp = 0; // null previous frame
        ctx.rbx = entry as u64;
        ctx.r12 = arg as u64;
        ctx.rsp = stack_top as u64;
        ctx
    }

    /// Builds the context for a new user task by writing a synthetic
    /// `iret` frame at the top of `kernel_stack_top` and pointing `switch`'s
    /// trampoline at `interrupt_exit` so the first resume `iret`s straight
    /// into user space at `(user_entry, user_stack)`.
    ///
    /// # Safety
    /// `kernel_stack_top` must be 16-byte aligned and have room below it for
    /// an `IretFrame` plus the trampoline's own spill slots.
    pub unsafe fn new_user(
        kernel_stack_top: usize,
        user_entry: usize,
        user_stack: usize,
        interrupt_exit: unsafe extern "C" fn() -> !,
    ) -> Self {
        let frame_addr = kernel_stack_top - core::mem::size_of::<IretFrame>();
        let frame = frame_addr as *mut IretFrame;
        unsafe {
            frame.write(IretFrame {
                rip: user_entry as u64,
                cs: Gdt::USER_CODE_SELECTOR as u64,
                rflags: RFLAGS_IF,
                rsp: user_stack as u64,
                ss: Gdt::USER_DATA_SELECTOR as u64,
            });
        }

        let mut ctx = Self::new();
        ctx.rbp = 0;
        ctx.rbx = interrupt_exit as u64;
        ctx.rsp = frame_addr as u64;
        ctx
    }

    pub fn stack_pointer(&self) -> usize {
        self.rsp as usize
    }

    /// The trampoline every `new_user` context's synthetic `rbx` points at:
    /// pops the `IretFrame` `new_user` wrote below `rsp` and `iret`s into
    /// user space. Unlike `new_kernel`'s `do_call`/`jmp`-style entry, a
    /// user task's first resume has to change privilege level, so it needs
    /// the real instruction rather than an ordinary jump.
    #[cfg(target_os = "none")]
    #[unsafe(naked)]
    pub unsafe extern "C" fn interrupt_exit() -> ! {
        naked_asm!("iretq", options(att_syntax));
    }

    #[cfg(not(target_os = "none"))]
    pub unsafe extern "C" fn interrupt_exit() -> ! {
        loop {}
    }

    /// Swaps the running CPU from `from`'s stack to `to`'s stack, saving
    /// callee-saved registers into `from` and restoring them from `to`.
    /// Returns into whatever `to.rsp` points at — either another `switch`
    /// call's return address, or a `do_call`/`iret` trampoline set up by
    /// `new_kernel`/`new_user`.
    ///
    /// # Safety
    /// `from` must be the context of the task currently executing on this
    /// stack; `to` must hold a valid, previously saved (or freshly
    /// constructed) context. Both must remain live until the switch
    /// returns control to `from`.
    #[cfg(target_os = "none")]
    #[unsafe(naked)]
    pub unsafe extern "C" fn switch(from: *mut Self, to: *mut Self) {
        naked_asm!(
            "mov %r12, 0x00(%rdi)",
            "mov %r13, 0x08(%rdi)",
            "mov %r14, 0x10(%rdi)",
            "mov %r15, 0x18(%rdi)",
            "mov %rbx, 0x20(%rdi)",
            "mov %rbp, 0x28(%rdi)",
            "mov %rsp, 0x30(%rdi)",
            "mov 0x00(%rsi), %r12",
            "mov 0x08(%rsi), %r13",
            "mov 0x10(%rsi), %r14",
            "mov 0x18(%rsi), %r15",
            "mov 0x20(%rsi), %rbx",
            "mov 0x28(%rsi), %rbp",
            "mov 0x30(%rsi), %rsp",
            "ret",
            options(att_syntax),
        );
    }

    #[cfg(not(target_os = "none"))]
    pub unsafe extern "C" fn switch(_from: *mut Self, _to: *mut Self) {}
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_kernel_points_rsp_at_the_given_stack() {
        unsafe extern "C" fn entry(_arg: usize) -> ! {
            loop {}
        }
        let ctx = TaskContext::new_kernel(0x8000, entry, 42);
        assert_eq!(ctx.stack_pointer(), 0x8000);
        assert_eq!(ctx.r12, 42);
        assert_eq!(ctx.rbx, entry as u64);
    }

    #[test]
    fn new_user_writes_a_valid_iret_frame_below_the_stack_top() {
        let mut stack = alloc::vec![0u8; 256];
        let stack_top = stack.as_mut_ptr() as usize + stack.len();
        unsafe extern "C" fn interrupt_exit() -> ! {
            loop {}
        }

        let ctx = unsafe { TaskContext::new_user(stack_top, 0x4000_0000, 0x7fff_0000, interrupt_exit) };

        let frame_addr = ctx.stack_pointer();
        assert!(frame_addr < stack_top);
        let frame = unsafe { &*(frame_addr as *const IretFrame) };
        assert_eq!(frame.rip, 0x4000_0000);
        assert_eq!(frame.rsp, 0x7fff_0000);
        assert_eq!(frame.cs, Gdt::USER_CODE_SELECTOR as u64);
        assert_eq!(frame.ss, Gdt::USER_DATA_SELECTOR as u64);
        assert_eq!(frame.rflags & RFLAGS_IF, RFLAGS_IF);
    }
}
