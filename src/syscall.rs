//! System call entry and dispatch (spec §6 "System call entry"): a
//! dispatch table indexed by syscall number, each entry declared with
//! `#[define_syscall(n)]` over a synchronous `Result<T, Errno>`/`Arc<Task>`
//! signature.
//!
//! Known calls (spec §6): `exit`, `log`, `mmap`, `munmap`, `thread`,
//! `ipc_call`, `ipc_reply`, `ipc_wait`, `ipc_reply_and_wait`.

use alloc::sync::Arc;

use rainbow_macros::define_syscall;
use rainbow_mm::address::{Addr as _, AddrOps as _, VAddr};
use rainbow_mm::page_table::Permission;
use rainbow_mm::paging::PAGE_SIZE;

use crate::ipc;
use crate::kernel_init::PMM;
use crate::task::{Priority, Task};

bitflags::bitflags! {
    /// `prot` argument bits (spec §6 `mmap`).
    #[derive(Debug, Clone, Copy)]
    pub struct MmapProt: u32 {
        const READ = 0x01;
        const WRITE = 0x02;
        const EXEC = 0x04;
    }
}

impl FromSyscallArg for MmapProt {
    fn from_arg(value: usize) -> Self {
        Self::from_bits_truncate(value as u32)
    }
}

/// One kernel error code space for syscall failures; negated into the
/// return register the way a POSIX-style `-errno` convention does.
pub type Errno = u32;

pub const EINVAL: Errno = 22;
pub const ENOMEM: Errno = 12;
pub const ESRCH: Errno = 3;

pub trait FromSyscallArg {
    fn from_arg(value: usize) -> Self;
}

impl FromSyscallArg for usize {
    fn from_arg(value: usize) -> Self {
        value
    }
}

impl FromSyscallArg for u64 {
    fn from_arg(value: usize) -> Self {
        value as u64
    }
}

impl FromSyscallArg for u32 {
    fn from_arg(value: usize) -> Self {
        value as u32
    }
}

impl FromSyscallArg for i32 {
    fn from_arg(value: usize) -> Self {
        value as i32
    }
}

impl FromSyscallArg for VAddr {
    fn from_arg(value: usize) -> Self {
        VAddr::from(value)
    }
}

impl FromSyscallArg for *mut u8 {
    fn from_arg(value: usize) -> Self {
        value as *mut u8
    }
}

impl FromSyscallArg for *const u8 {
    fn from_arg(value: usize) -> Self {
        value as *const u8
    }
}

/// Maps a syscall's `Result` into the `Option<usize>` the raw dispatch
/// table deals in: `Ok` encodes to the non-negative value; `Err` encodes to
/// `-(errno)` reinterpreted as `usize` (spec §7 "return a null / sentinel
/// to the caller" for recoverable errors).
pub trait SyscallRetVal {
    fn into_retval(self) -> Option<usize>;
}

impl SyscallRetVal for Result<usize, Errno> {
    fn into_retval(self) -> Option<usize> {
        Some(match self {
            Ok(v) => v,
            Err(e) => (-(e as i64)) as usize,
        })
    }
}

impl SyscallRetVal for Result<(), Errno> {
    fn into_retval(self) -> Option<usize> {
        Some(match self {
            Ok(()) => 0,
            Err(e) => (-(e as i64)) as usize,
        })
    }
}

/// A syscall registered by `#[define_syscall]`; statically placed in its
/// own linker section so the table below can name it directly without the
/// macro needing to know the full syscall list.
#[derive(Clone, Copy)]
pub struct RawSyscallHandler {
    pub no: usize,
    pub handler: fn(&Arc<Task>, [usize; 6]) -> Option<usize>,
    pub name: &'static str,
}

#[define_syscall(0)]
fn exit(code: u32) -> Result<(), Errno> {
    crate::task::scheduler::die(task.clone(), code);
    Ok(())
}

#[define_syscall(1)]
fn log(ptr: *const u8, len: usize) -> Result<(), Errno> {
    if ptr.is_null() || len > 4096 {
        return Err(EINVAL);
    }
    // SAFETY: bounded by the caller-declared length; a genuinely invalid
    // user pointer is the caller's bug, same contract as POSIX `write`.
    let bytes = unsafe { core::slice::from_raw_parts(ptr, len) };
    let text = core::str::from_utf8(bytes).map_err(|_| EINVAL)?;
    rainbow_log::println!("{}", text);
    let _ = task;
    Ok(())
}

/// Anonymous-only (spec.md's Non-goals exclude a VFS, so there is nothing
/// to back a file-mapped `mmap`); allocates fresh zeroed frames and maps
/// them into the caller's address space, growing its private mmap region
/// (spec §6 "Known calls"; no VMA list, so an unmapped hole is never
/// reused — see `DESIGN.md`).
#[define_syscall(2)]
fn mmap(len: usize, prot: MmapProt) -> Result<usize, Errno> {
    if len == 0 {
        return Err(EINVAL);
    }
    let len = (len + PAGE_SIZE - 1) / PAGE_SIZE * PAGE_SIZE;
    let permission = if prot.contains(MmapProt::WRITE) {
        Permission::UserDataRw
    } else {
        Permission::UserDataRo
    };

    let base = task.alloc_mmap_region(len);
    let mut pmm = PMM.lock();
    let mut table = task.page_table().lock();

    let mut virt = base;
    while virt < base + len {
        let frame = pmm.allocate_frames(1).ok_or(ENOMEM)?;
        table.map_page(&mut pmm, frame, virt, permission);
        virt = virt + PAGE_SIZE;
    }

    Ok(base.addr())
}

/// No unmap primitive exists yet in [`rainbow_mm::page_table::PageTable`]
/// (spec.md names the syscall but not page-table teardown); validates the
/// request and otherwise no-ops rather than silently leaking or faulting.
#[define_syscall(3)]
fn munmap(addr: VAddr, len: usize) -> Result<(), Errno> {
    let _ = task;
    if !addr.is_page_aligned() || len == 0 {
        return Err(EINVAL);
    }
    Ok(())
}

/// Spawns a new ring-3 task sharing the caller's address space (spec §6
/// `thread`): a fresh kernel stack backs the synthetic `iret` frame
/// `Task::new_user` writes, and the new task joins the calling CPU's ready
/// queue rather than running immediately.
#[define_syscall(4)]
fn thread(entry: VAddr, stack: VAddr) -> Result<usize, Errno> {
    if entry.addr() == 0 || stack.addr() == 0 {
        return Err(EINVAL);
    }

    let kernel_stack_top = {
        let mut pmm = PMM.lock();
        let frame = pmm
            .allocate_frames(crate::config::KERNEL_STACK_PAGES)
            .ok_or(ENOMEM)?;
        frame.addr() + crate::config::KERNEL_STACK_PAGES * PAGE_SIZE
    };

    // SAFETY: `kernel_stack_top` is a just-allocated frame range with no
    // other live references.
    let new_task = unsafe {
        Task::new_user(
            Priority::Normal,
            kernel_stack_top,
            task.page_table().clone(),
            entry,
            stack,
            rainbow_hal::context::TaskContext::interrupt_exit,
        )
    };
    let id = new_task.id();
    crate::task::scheduler::requeue(new_task);
    Ok(id as usize)
}

#[define_syscall(5)]
fn ipc_call(
    target: u64,
    msg_in: *const u8,
    len_in: usize,
    msg_out: *mut u8,
    cap_out: usize,
) -> Result<usize, Errno> {
    ipc::ipc_call(task, target, msg_in, len_in, msg_out, cap_out)
}

#[define_syscall(6)]
fn ipc_wait(buf: *mut u8, cap: usize) -> Result<usize, Errno> {
    ipc::ipc_wait(task, buf, cap)
}

#[define_syscall(7)]
fn ipc_reply(caller: u64, msg: *const u8, len: usize) -> Result<(), Errno> {
    ipc::ipc_reply(task, caller, msg, len)
}

#[define_syscall(8)]
fn ipc_reply_and_wait(
    caller: u64,
    msg: *const u8,
    len: usize,
    buf: *mut u8,
    cap: usize,
) -> Result<usize, Errno> {
    ipc::ipc_reply(task, caller, msg, len)?;
    ipc::ipc_wait(task, buf, cap)
}

/// All registered syscalls, indexed by their declared syscall number. Named
/// directly rather than discovered through the linker, since the full
/// syscall list is known and defined in this one file.
static SYSCALL_TABLE: [&RawSyscallHandler; 9] = [
    &_SYSCALL_ENTRY_000,
    &_SYSCALL_ENTRY_001,
    &_SYSCALL_ENTRY_002,
    &_SYSCALL_ENTRY_003,
    &_SYSCALL_ENTRY_004,
    &_SYSCALL_ENTRY_005,
    &_SYSCALL_ENTRY_006,
    &_SYSCALL_ENTRY_007,
    &_SYSCALL_ENTRY_008,
];

/// Dispatches one syscall gate entry (spec §6: "dispatch table indexed by
/// a register; arguments in the architectural six-register calling
/// convention"). `-ENOSYS` (encoded the same way individual handlers
/// encode errors) is returned for an out-of-range number.
pub fn dispatch(task: &Arc<Task>, no: usize, args: [usize; 6]) -> usize {
    const ENOSYS: Errno = 38;
    match SYSCALL_TABLE.iter().find(|entry| entry.no == no) {
        Some(entry) => (entry.handler)(task, args).unwrap_or(0),
        None => (-(ENOSYS as i64)) as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_task() -> Arc<Task> {
        use rainbow_hal::bootinfo::{FirmwareKind, MemoryDescriptorKind, RawMemoryDescriptor};

        rainbow_percpu::install_test_cpu(44);

        let raw = [RawMemoryDescriptor {
            kind: MemoryDescriptorKind::Available,
            flags: 0,
            address: 0x10_0000,
            size: 0x0F00_0000,
        }];
        let info = rainbow_hal::bootinfo::BootInfo {
            version: 1,
            firmware: FirmwareKind::Bios,
            memory_map: raw.as_ptr(),
            memory_map_len: raw.len(),
            initrd_address: 0,
            initrd_size: 0,
            framebuffer: None,
            acpi_rsdp: 0,
            modules: core::ptr::null(),
            modules_len: 0,
        };

        let mut pmm = rainbow_mm::pmm::Pmm::new();
        let descriptors: alloc::vec::Vec<_> = unsafe { info.memory_descriptors() }.collect();
        pmm.init(&descriptors);
        let page_table = rainbow_mm::page_table::PageTable::init_ia32(&mut pmm);
        Task::new_boot(0, Arc::new(rainbow_sync::Spin::new(page_table)))
    }

    #[test]
    fn unknown_syscall_number_returns_enosys() {
        let task = test_task();
        let ret = dispatch(&task, 511, [0; 6]);
        assert_eq!(ret as i64 as i32, -38);
    }

    #[test]
    fn log_syscall_rejects_oversized_buffer() {
        let task = test_task();
        let ret = dispatch(&task, 1, [0x1000, 5000, 0, 0, 0, 0]);
        assert_eq!(ret as i64 as i32, -(EINVAL as i64) as i32);
    }

    #[test]
    fn mmap_rejects_zero_length() {
        let task = test_task();
        let ret = dispatch(&task, 2, [0, MmapProt::READ.bits() as usize, 0, 0, 0, 0]);
        assert_eq!(ret as i64 as i32, -(EINVAL as i64) as i32);
    }

    #[test]
    fn munmap_rejects_misaligned_address() {
        let task = test_task();
        let ret = dispatch(&task, 3, [1, 4096, 0, 0, 0, 0]);
        assert_eq!(ret as i64 as i32, -(EINVAL as i64) as i32);
    }

    #[test]
    fn thread_rejects_a_null_entry() {
        let task = test_task();
        let ret = dispatch(&task, 4, [0, 0x7fff_0000, 0, 0, 0, 0]);
        assert_eq!(ret as i64 as i32, -(EINVAL as i64) as i32);
    }

    #[test]
    fn thread_spawns_a_schedulable_task_with_a_fresh_id() {
        let task = test_task();
        let ret = dispatch(&task, 4, [0x4000_0000, 0x7fff_0000, 0, 0, 0, 0]);
        assert!((ret as i64) >= 0, "expected a task id, got {ret:#x}");
        assert_ne!(ret as u64, task.id());
    }
}
