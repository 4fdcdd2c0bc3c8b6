//! Synchronous rendezvous IPC (spec §4.F). Endpoint = target task id;
//! message bytes are copied into/out of the 64-word virtual IPC register
//! array living in each TCB (`task::IPC_REGISTER_COUNT`).
//!
//! Follows the same suspend-on-a-wait-queue-then-schedule idiom used
//! throughout `task/*` (see `task::wait_queue`), applied to a rendezvous
//! instead of a generic blocking wait.

use alloc::sync::Arc;
use core::cmp::min;

use crate::syscall::{Errno, ESRCH};
use crate::task::wait_queue::WaitQueue;
use crate::task::{self, IpcState, Task, TaskState, IPC_REGISTER_COUNT};

/// Bytes backing the virtual IPC register file.
const REGISTER_BYTES: usize = IPC_REGISTER_COUNT * core::mem::size_of::<u64>();

/// Every blocked `ipc_call`/`ipc_wait` suspends here; a specific task is
/// targeted with `WaitQueue::wakeup`, never broadcast.
static IPC_WAIT: WaitQueue = WaitQueue::new();

fn registers_as_bytes(ipc: &IpcState) -> &[u8] {
    // SAFETY: `[u64; N]` has no padding and matches `REGISTER_BYTES` exactly.
    unsafe {
        core::slice::from_raw_parts(ipc.registers.as_ptr() as *const u8, REGISTER_BYTES)
    }
}

fn registers_as_bytes_mut(ipc: &mut IpcState) -> &mut [u8] {
    unsafe {
        core::slice::from_raw_parts_mut(ipc.registers.as_mut_ptr() as *mut u8, REGISTER_BYTES)
    }
}

/// Copies up to `REGISTER_BYTES` from a user pointer into `task`'s IPC
/// registers, returning the number of bytes copied.
///
/// # Safety
/// `src`/`len` must describe a valid, readable region in the caller's
/// address space (same contract as the `log` syscall).
unsafe fn copy_in(task: &Arc<Task>, src: *const u8, len: usize) -> usize {
    let len = min(len, REGISTER_BYTES);
    let mut ipc = task.ipc().lock();
    let dst = registers_as_bytes_mut(&mut ipc);
    if len > 0 {
        unsafe { core::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), len) };
    }
    len
}

/// Copies up to `cap` bytes of `task`'s IPC registers out to a user
/// pointer, returning the number of bytes copied.
///
/// # Safety
/// `dst`/`cap` must describe a valid, writable region in the caller's
/// address space.
unsafe fn copy_out(task: &Arc<Task>, dst: *mut u8, cap: usize) -> usize {
    let ipc = task.ipc().lock();
    let src = registers_as_bytes(&ipc);
    let len = min(cap, src.len());
    if len > 0 {
        unsafe { core::ptr::copy_nonoverlapping(src.as_ptr(), dst, len) };
    }
    len
}

/// `ipc_call` (spec §4.F): blocks `caller` until `target` replies, then
/// returns the number of reply bytes copied into `msg_out`.
pub fn ipc_call(
    caller: &Arc<Task>,
    target_id: u64,
    msg_in: *const u8,
    len_in: usize,
    msg_out: *mut u8,
    cap_out: usize,
) -> Result<usize, Errno> {
    let target = task::lookup(target_id).ok_or(ESRCH)?;

    // SAFETY: contract documented on `copy_in`; enforced the same way the
    // `log` syscall trusts its caller-declared length.
    unsafe { copy_in(caller, msg_in, len_in) };

    {
        let mut ipc = caller.ipc().lock();
        ipc.partner = Some(target_id);
    }
    {
        let mut target_ipc = target.ipc().lock();
        target_ipc.senders.push_back(caller.clone());
    }
    caller.set_state(TaskState::IpcSend);

    // Nudge a receiver that is already parked in `ipc_wait` with nothing to
    // dequeue — it loops back and re-checks its senders list on wake.
    if target.state() == TaskState::IpcReceive {
        IPC_WAIT.wakeup(&target);
    }

    IPC_WAIT.suspend(caller.clone(), TaskState::IpcSend);

    // SAFETY: see `copy_out`.
    Ok(unsafe { copy_out(caller, msg_out, cap_out) })
}

/// `ipc_wait` (spec §4.F): returns the next pending sender's message, or
/// blocks until one arrives.
pub fn ipc_wait(receiver: &Arc<Task>, buf: *mut u8, cap: usize) -> Result<usize, Errno> {
    loop {
        let sender = receiver.ipc().lock().senders.pop_front();
        match sender {
            Some(sender) => {
                // SAFETY: see `copy_out`.
                let len = unsafe { copy_out(&sender, buf, cap) };
                sender.set_state(TaskState::IpcReceive);
                return Ok(len);
            }
            None => {
                receiver.set_state(TaskState::IpcReceive);
                IPC_WAIT.suspend(receiver.clone(), TaskState::IpcReceive);
            }
        }
    }
}

/// `ipc_reply` (spec §4.F): copies `msg` into `caller`'s registers and
/// wakes it.
pub fn ipc_reply(_server: &Arc<Task>, caller_id: u64, msg: *const u8, len: usize) -> Result<(), Errno> {
    let caller = task::lookup(caller_id).ok_or(ESRCH)?;

    // SAFETY: see `copy_in`.
    unsafe { copy_in(&caller, msg, len) };

    caller.ipc().lock().partner = None;
    IPC_WAIT.wakeup(&caller);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rainbow_mm::address::{PAddr, PRange};
    use rainbow_mm::page_table::PageTable;
    use rainbow_mm::pmm::{MemoryDescriptor, MemoryKind, Pmm};
    use rainbow_sync::Spin;

    fn task() -> Arc<Task> {
        let mut pmm = Pmm::new();
        pmm.init(&[MemoryDescriptor {
            kind: MemoryKind::Available,
            range: PRange::new(PAddr::from_val(0x10_0000), PAddr::from_val(0x20_0000)),
        }]);
        let table = Arc::new(Spin::new(PageTable::init_long_mode(&mut pmm)));
        unsafe extern "C" fn entry(_: usize) -> ! {
            loop {}
        }
        Task::new_kernel(task::Priority::Normal, 0x8000, table, entry, 0)
    }

    #[test]
    fn ipc_wait_dequeues_a_sender_already_registered() {
        rainbow_percpu::install_test_cpu(20);
        let server = task();
        let client = task();

        client.ipc().lock().partner = Some(server.id());
        server.ipc().lock().senders.push_back(client.clone());
        client.set_state(TaskState::IpcSend);

        let mut buf = [0u8; 16];
        let msg = b"ping";
        unsafe { copy_in(&client, msg.as_ptr(), msg.len()) };

        let n = ipc_wait(&server, buf.as_mut_ptr(), buf.len()).unwrap();
        assert_eq!(n, msg.len());
        assert_eq!(&buf[..n], msg);
        assert_eq!(client.state(), TaskState::IpcReceive);
    }

    #[test]
    fn ipc_reply_copies_message_and_clears_partner() {
        rainbow_percpu::install_test_cpu(21);
        let client = task();
        client.ipc().lock().partner = Some(99);

        let server = task();
        let msg = b"pong!";
        ipc_reply(&server, client.id(), msg.as_ptr(), msg.len()).unwrap();

        assert!(client.ipc().lock().partner.is_none());
        let mut out = [0u8; 8];
        let n = unsafe { copy_out(&client, out.as_mut_ptr(), out.len()) };
        assert_eq!(n, out.len());
        assert_eq!(&out[..msg.len()], msg);
    }

    #[test]
    fn ipc_call_to_unknown_target_fails_with_esrch() {
        rainbow_percpu::install_test_cpu(22);
        let caller = task();
        let err = ipc_call(&caller, 0xDEAD_BEEF, core::ptr::null(), 0, core::ptr::null_mut(), 0)
            .unwrap_err();
        assert_eq!(err, ESRCH);
    }
}
