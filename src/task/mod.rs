//! Task control block and lifecycle (spec §3 "Task (TCB)", §4.D).
//!
//! Stack-backed TCB placement with a single-threaded-per-task model: no
//! separate `Process`/`Thread`/`Session`/`ProcessGroup` hierarchy — this
//! core's Non-goals exclude POSIX process semantics, so a `Task` here is
//! the unit of scheduling and address space both, with no process-group,
//! session, or signal layer above it.

pub(crate) mod futex;
pub(crate) mod mutex;
pub(crate) mod readyqueue;
pub(crate) mod scheduler;
pub(crate) mod semaphore;
pub(crate) mod wait_queue;

pub use futex::FutexTable;
pub use mutex::Mutex;
pub use readyqueue::ReadyQueue;
pub use scheduler::{schedule, Scheduler};
pub use semaphore::Semaphore;
pub use wait_queue::WaitQueue;

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use rainbow_hal::context::TaskContext;
use rainbow_mm::address::VAddr;
use rainbow_mm::page_table::PageTable;
use rainbow_sync::Spin;

/// Lifecycle states (spec §3 "States"). A task is "blocked" iff
/// `state as u8 >= Sleep as u8`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TaskState {
    Init = 0,
    Running = 1,
    Ready = 2,
    Sleep = 3,
    IpcSend = 4,
    IpcReceive = 5,
    Mutex = 6,
    Futex = 7,
    Zombie = 8,
}

impl TaskState {
    pub fn is_blocked(self) -> bool {
        self >= TaskState::Sleep
    }

    /// Back-pointer invariant (spec §8): every live task either has no
    /// queue (`Running`/`Init`) or is parked on exactly one. This crate
    /// models the queue identity implicitly (the queues are plain
    /// `VecDeque`s of `Arc<Task>`, not an intrusive back-pointer), so the
    /// invariant is checked via the state alone.
    pub fn has_queue(self) -> bool {
        !matches!(self, TaskState::Running | TaskState::Init)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    Idle = 0,
    Low = 1,
    Normal = 2,
    High = 3,
}

pub const PRIORITY_LEVELS: usize = 4;

/// Virtual IPC registers (spec §4.F): 64 machine words, copied directly
/// between sender and receiver TCBs on `ipc_call`/`ipc_reply`.
pub const IPC_REGISTER_COUNT: usize = 64;

pub(crate) struct IpcState {
    /// Other tasks waiting to `ipc_call` this task (this task is the
    /// server when it `ipc_wait`s).
    pub(crate) senders: alloc::collections::VecDeque<Arc<Task>>,
    /// While blocked in `IpcSend`/`IpcReceive`, the task id on the other
    /// end of the rendezvous.
    pub(crate) partner: Option<u64>,
    pub(crate) registers: [u64; IPC_REGISTER_COUNT],
}

impl IpcState {
    const fn new() -> Self {
        Self {
            senders: alloc::collections::VecDeque::new(),
            partner: None,
            registers: [0; IPC_REGISTER_COUNT],
        }
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

/// Global task-by-id registry, so IPC endpoints (spec §4.F: "identified by
/// an endpoint token = target task id") can be resolved without threading
/// a reference through every caller. Holds only `Weak` references: a dead
/// task drops out on its own once its last strong `Arc` is released.
static TASK_TABLE: Spin<BTreeMap<u64, Weak<Task>>> = Spin::new(BTreeMap::new());

/// Looks up a live task by id (spec §4.F IPC target resolution).
pub fn lookup(id: u64) -> Option<Arc<Task>> {
    TASK_TABLE.lock().get(&id).and_then(Weak::upgrade)
}

fn register(task: &Arc<Task>) {
    TASK_TABLE.lock().insert(task.id, Arc::downgrade(task));
}

/// Task control block (spec §3). Lives inside an `Arc` once past creation
/// so the scheduler, wait queues, and IPC partners can all hold a
/// reference without a single owner.
pub struct Task {
    id: u64,
    priority: Priority,
    state: Spin<TaskState>,
    context: Spin<TaskContext>,
    page_table: Arc<Spin<PageTable>>,
    /// Top of this task's kernel stack; also where the TCB for task 0 is
    /// placed in-place (spec §4.D "Initialisation").
    kernel_stack_top: usize,
    /// Monotonic-ns deadline set by `sleep`; only meaningful in state Sleep.
    sleep_deadline: AtomicU64,
    user_stack: Option<(VAddr, VAddr)>,
    /// TLS base for user tasks, loaded into FS/GS on context switch.
    tls_base: AtomicUsize,
    /// Next free address in this task's anonymous `mmap` region, grown
    /// monotonically (spec §6 `mmap`/`munmap`; no VMA bookkeeping, so an
    /// unmapped hole is never reused — acceptable for a core this small,
    /// see `DESIGN.md`).
    mmap_bump: AtomicUsize,
    ipc: Spin<IpcState>,
    /// Opaque FPU/SSE save area; format is architecture-defined (`fxsave`
    /// layout on x86_64), saved/restored only around a context switch.
    fpu_save: Spin<[u8; 512]>,
    exit_code: AtomicU32,
}

impl Task {
    /// Builds task 0 in place over the boot stack (spec §4.D
    /// "Initialisation"): `this` is placed at the base of the *current*
    /// stack, already running, with the current page table adopted.
    pub fn new_boot(kernel_stack_top: usize, page_table: Arc<Spin<PageTable>>) -> Arc<Self> {
        let task = Arc::new(Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            priority: Priority::Normal,
            state: Spin::new(TaskState::Running),
            context: Spin::new(TaskContext::new()),
            page_table,
            kernel_stack_top,
            sleep_deadline: AtomicU64::new(0),
            user_stack: None,
            tls_base: AtomicUsize::new(0),
            mmap_bump: AtomicUsize::new(crate::config::VMA_MMAP_BASE),
            ipc: Spin::new(IpcState::new()),
            fpu_save: Spin::new([0; 512]),
            exit_code: AtomicU32::new(0),
        });
        register(&task);
        task
    }

    /// Builds a new kernel-only task (spec §4.D synthetic context, no user
    /// half): `entry(arg)` runs the first time this task is scheduled.
    pub fn new_kernel(
        priority: Priority,
        kernel_stack_top: usize,
        page_table: Arc<Spin<PageTable>>,
        entry: unsafe extern "C" fn(usize) -> !,
        arg: usize,
    ) -> Arc<Self> {
        let context = TaskContext::new_kernel(kernel_stack_top, entry, arg);
        let task = Arc::new(Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            priority,
            state: Spin::new(TaskState::Init),
            context: Spin::new(context),
            page_table,
            kernel_stack_top,
            sleep_deadline: AtomicU64::new(0),
            user_stack: None,
            tls_base: AtomicUsize::new(0),
            mmap_bump: AtomicUsize::new(crate::config::VMA_MMAP_BASE),
            ipc: Spin::new(IpcState::new()),
            fpu_save: Spin::new([0; 512]),
            exit_code: AtomicU32::new(0),
        });
        register(&task);
        task
    }

    /// Builds a new user task via a synthetic iret frame (spec §4.D, §6
    /// supplement `Task::new_user`).
    ///
    /// # Safety
    /// `kernel_stack_top` must be a freshly allocated, 16-byte aligned
    /// kernel stack with no other live references.
    pub unsafe fn new_user(
        priority: Priority,
        kernel_stack_top: usize,
        page_table: Arc<Spin<PageTable>>,
        user_entry: VAddr,
        user_stack: VAddr,
        interrupt_exit: unsafe extern "C" fn() -> !,
    ) -> Arc<Self> {
        let context = unsafe {
            TaskContext::new_user(
                kernel_stack_top,
                usize::from(user_entry),
                usize::from(user_stack),
                interrupt_exit,
            )
        };
        let task = Arc::new(Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            priority,
            state: Spin::new(TaskState::Init),
            context: Spin::new(context),
            page_table,
            kernel_stack_top,
            sleep_deadline: AtomicU64::new(0),
            user_stack: Some((user_stack, user_stack)),
            tls_base: AtomicUsize::new(0),
            mmap_bump: AtomicUsize::new(crate::config::VMA_MMAP_BASE),
            ipc: Spin::new(IpcState::new()),
            fpu_save: Spin::new([0; 512]),
            exit_code: AtomicU32::new(0),
        });
        register(&task);
        task
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }

    pub fn page_table(&self) -> &Arc<Spin<PageTable>> {
        &self.page_table
    }

    pub fn kernel_stack_top(&self) -> usize {
        self.kernel_stack_top
    }

    pub fn sleep_deadline(&self) -> u64 {
        self.sleep_deadline.load(Ordering::Relaxed)
    }

    pub fn set_sleep_deadline(&self, deadline_ns: u64) {
        self.sleep_deadline.store(deadline_ns, Ordering::Relaxed);
    }

    pub fn tls_base(&self) -> usize {
        self.tls_base.load(Ordering::Relaxed)
    }

    pub fn set_tls_base(&self, base: usize) {
        self.tls_base.store(base, Ordering::Relaxed);
    }

    /// Reserves `len` bytes (already page-rounded by the caller) in this
    /// task's anonymous mmap region and returns the base address.
    pub fn alloc_mmap_region(&self, len: usize) -> VAddr {
        let base = self.mmap_bump.fetch_add(len, Ordering::Relaxed);
        VAddr::from(base)
    }

    pub fn exit_code(&self) -> u32 {
        self.exit_code.load(Ordering::Relaxed)
    }

    pub fn set_exit_code(&self, code: u32) {
        self.exit_code.store(code, Ordering::Relaxed);
    }

    /// # Safety
    /// Caller must hold the BKL (context-switch time) or otherwise
    /// guarantee exclusive access to the context for the duration of use.
    pub fn context(&self) -> &Spin<TaskContext> {
        &self.context
    }

    pub(crate) fn ipc(&self) -> &Spin<IpcState> {
        &self.ipc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_table() -> Arc<Spin<PageTable>> {
        let mut pmm = rainbow_mm::pmm::Pmm::new();
        pmm.init(&[rainbow_mm::pmm::MemoryDescriptor {
            kind: rainbow_mm::pmm::MemoryKind::Available,
            range: rainbow_mm::address::PRange::new(
                rainbow_mm::address::PAddr::from_val(0x0010_0000),
                rainbow_mm::address::PAddr::from_val(0x0110_0000),
            ),
        }]);
        Arc::new(Spin::new(PageTable::init_long_mode(&mut pmm)))
    }

    #[test]
    fn boot_task_starts_running_with_no_queue() {
        rainbow_percpu::install_test_cpu(0);
        let task = Task::new_boot(0x1000, dummy_table());
        assert_eq!(task.state(), TaskState::Running);
        assert!(!task.state().has_queue());
    }

    #[test]
    fn blocked_states_are_ordered_past_sleep() {
        assert!(TaskState::Sleep.is_blocked());
        assert!(TaskState::Zombie.is_blocked());
        assert!(!TaskState::Running.is_blocked());
        assert!(!TaskState::Ready.is_blocked());
    }

    #[test]
    fn every_non_running_init_state_has_a_queue() {
        for state in [
            TaskState::Ready,
            TaskState::Sleep,
            TaskState::IpcSend,
            TaskState::IpcReceive,
            TaskState::Mutex,
            TaskState::Futex,
            TaskState::Zombie,
        ] {
            assert!(state.has_queue());
        }
        assert!(!TaskState::Running.has_queue());
        assert!(!TaskState::Init.has_queue());
    }
}
