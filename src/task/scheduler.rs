//! Scheduling decision and context switch (spec §4.D): push the current
//! task back onto its ready bucket, pop the next one (keeping current if
//! the ready queues are empty), then a TSS-`rsp0`/CR3 switch before
//! `TaskContext::switch`.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use rainbow_hal::context::TaskContext;
use rainbow_percpu::PerCpu;
use rainbow_sync::Spin;

use super::readyqueue::ReadyQueue;
use super::wait_queue::WaitQueue;
use super::{Task, TaskState};

/// Upper bound on logical CPUs this kernel schedules across (spec §4.G does
/// not name a number; this mirrors common small-SMP hobby-kernel limits).
pub const MAX_CPUS: usize = 64;

static READY_QUEUES: [Spin<ReadyQueue>; MAX_CPUS] = {
    const INIT: Spin<ReadyQueue> = Spin::new(ReadyQueue::new());
    [INIT; MAX_CPUS]
};

static IDLE_TASKS: [Spin<Option<Arc<Task>>>; MAX_CPUS] = {
    const INIT: Spin<Option<Arc<Task>>> = Spin::new(None);
    [INIT; MAX_CPUS]
};

/// Tasks blocked in `sleep` (spec §4.D "Sleep").
static SLEEPING: WaitQueue = WaitQueue::new();

/// Tasks that have `die`d, awaiting destruction by the next `schedule` on
/// another task (spec §4.D "Die").
static ZOMBIES: Spin<VecDeque<Arc<Task>>> = Spin::new(VecDeque::new());

/// Monotonic nanosecond counter advanced by the timer ISR (`kernel_init`
/// wires this to `rainbow_hal::clock`); `sleep`/`wakeup_until` read it
/// through `now_ns` so this module stays architecture-free and host-testable.
static CLOCK_NS: AtomicU64 = AtomicU64::new(0);

pub fn now_ns() -> u64 {
    CLOCK_NS.load(Ordering::Relaxed)
}

/// Advances the monotonic clock; called from the timer ISR with each tick.
pub fn advance_clock(delta_ns: u64) {
    CLOCK_NS.fetch_add(delta_ns, Ordering::Relaxed);
}

fn cpu_index() -> usize {
    let id = PerCpu::current().id as usize;
    assert!(id < MAX_CPUS, "CPU id {id} exceeds MAX_CPUS");
    id
}

fn current_task() -> Arc<Task> {
    let ptr = PerCpu::current().current_task.load(Ordering::Acquire) as *const Task;
    assert!(!ptr.is_null(), "schedule() called before a current task was installed");
    // SAFETY: `set_current_task` always stores a pointer obtained from
    // `Arc::into_raw`, and the referenced task stays alive for as long as it
    // is installed (the scheduler always holds a strong reference on its
    // behalf until it is replaced).
    let task = unsafe { Arc::from_raw(ptr) };
    let clone = task.clone();
    core::mem::forget(task);
    clone
}

fn set_current_task(task: Arc<Task>) {
    let cpu = PerCpu::current();
    let old = cpu
        .current_task
        .swap(Arc::into_raw(task) as *mut (), Ordering::AcqRel);
    if !old.is_null() {
        // SAFETY: every non-null value ever stored came from `Arc::into_raw`
        // on a task this slot owned a reference to.
        drop(unsafe { Arc::from_raw(old as *const Task) });
    }
}

/// Installs `task` as this CPU's current task without going through a
/// `schedule()` decision; used once at boot (task 0) and once per AP after
/// SMP bring-up adopts its assigned task (spec §4.D "Initialisation", §4.G
/// step "AP entry").
pub fn install_current(task: Arc<Task>) {
    set_current_task(task);
}

/// Registers `task` as this CPU's idle task (spec §4.D "Idle loop").
pub fn install_idle_task(task: Arc<Task>) {
    *IDLE_TASKS[cpu_index()].lock() = Some(task);
}

/// Pushes an already-parked task back onto some CPU's ready queue. Used by
/// wait queues / mutex / semaphore / futex wakeups. This kernel does not
/// track task affinity, so a woken task simply rejoins the waking CPU's
/// ready queue.
pub(crate) fn requeue(task: Arc<Task>) {
    READY_QUEUES[cpu_index()].lock().queue(task);
}

#[cfg(test)]
pub(crate) fn init_test_scheduler() {
    READY_QUEUES[cpu_index()].lock();
}

/// The schedule decision (spec §4.D "Schedule decision").
///
/// # Safety contract
/// Must be called with interrupts disabled and the BKL held, per spec §5 —
/// this module does not itself assert that (the BKL lives in the top-level
/// kernel crate, not here), callers are responsible for the discipline.
pub fn schedule() {
    let cpu_idx = cpu_index();
    let current = current_task();

    if current.state() == TaskState::Running {
        READY_QUEUES[cpu_idx].lock().queue(current.clone());
    }

    let next = READY_QUEUES[cpu_idx].lock().pop();
    let next = match next {
        Some(task) => task,
        None if current.state() == TaskState::Running => current.clone(),
        None => IDLE_TASKS[cpu_idx]
            .lock()
            .clone()
            .expect("no ready task and no idle task installed for this CPU"),
    };

    next.set_state(TaskState::Running);

    let switched = !Arc::ptr_eq(&current, &next);
    if switched {
        set_current_task(next.clone());
    }

    reap_zombies(&current);

    // Ordering per spec §4.D: only after the next task is picked do we move
    // expired sleepers onto the ready queue, so a task that just called
    // `sleep` cannot be immediately re-picked by this same decision.
    SLEEPING.wakeup_until(now_ns());

    if switched {
        // SAFETY: both tasks are kept alive by the `Arc`s above for the
        // duration of the switch; the BKL (held by the caller) prevents any
        // other CPU from touching either task's context concurrently.
        unsafe {
            let from: *mut TaskContext = current.context().as_ptr();
            let to: *mut TaskContext = next.context().as_ptr();
            TaskContext::switch(from, to);
        }
    }
}

/// Destroys every zombie except `dying` itself (spec §4.D "Die": "destroys
/// all zombies except the one that just died").
fn reap_zombies(dying: &Arc<Task>) {
    let mut zombies = ZOMBIES.lock();
    zombies.retain(|z| Arc::ptr_eq(z, dying));
}

/// Computes a deadline and suspends the current task until it (spec §4.D
/// "Sleep").
pub fn sleep(current: Arc<Task>, duration_ns: u64) {
    current.set_sleep_deadline(now_ns() + duration_ns);
    SLEEPING.suspend(current, TaskState::Sleep);
}

/// Marks `current` a zombie and schedules away from it (spec §4.D "Die").
pub fn die(current: Arc<Task>, exit_code: u32) {
    current.set_exit_code(exit_code);
    current.set_state(TaskState::Zombie);
    ZOMBIES.lock().push_back(current);
    schedule();
}

/// Forces a reschedule (spec §4.D "Yield").
pub fn yield_now() {
    schedule();
}

pub struct Scheduler;

#[cfg(test)]
mod tests {
    use super::*;
    use rainbow_mm::address::{PAddr, PRange};
    use rainbow_mm::page_table::PageTable;
    use rainbow_mm::pmm::{MemoryDescriptor, MemoryKind, Pmm};
    use rainbow_sync::Spin as RSpin;

    fn table() -> Arc<RSpin<PageTable>> {
        let mut pmm = Pmm::new();
        pmm.init(&[MemoryDescriptor {
            kind: MemoryKind::Available,
            range: PRange::new(PAddr::from_val(0x10_0000), PAddr::from_val(0x20_0000)),
        }]);
        Arc::new(RSpin::new(PageTable::init_long_mode(&mut pmm)))
    }

    unsafe extern "C" fn entry(_: usize) -> ! {
        loop {}
    }

    #[test]
    fn schedule_requeues_current_and_picks_ready_task() {
        let cpu = rainbow_percpu::install_test_cpu(10);
        let _ = cpu;

        let boot = Task::new_boot(0x9000, table());
        install_current(boot.clone());

        let ready = Task::new_kernel(super::super::Priority::High, 0x9000, table(), entry, 0);
        let ready_id = ready.id();
        READY_QUEUES[10].lock().queue(ready);

        schedule();

        assert_eq!(current_task().id(), ready_id);
        assert_eq!(boot.state(), TaskState::Ready);
    }

    #[test]
    fn schedule_keeps_current_when_ready_queue_empty() {
        rainbow_percpu::install_test_cpu(11);
        let boot = Task::new_boot(0x9000, table());
        install_current(boot.clone());

        schedule();

        assert_eq!(current_task().id(), boot.id());
        assert_eq!(boot.state(), TaskState::Running);
    }

    #[test]
    fn schedule_falls_back_to_idle_when_current_is_blocked_and_queue_empty() {
        rainbow_percpu::install_test_cpu(12);
        let boot = Task::new_boot(0x9000, table());
        install_current(boot.clone());
        boot.set_state(TaskState::Sleep);

        let idle = Task::new_kernel(super::super::Priority::Idle, 0x9000, table(), entry, 0);
        let idle_id = idle.id();
        install_idle_task(idle);

        schedule();

        assert_eq!(current_task().id(), idle_id);
    }

    #[test]
    fn die_moves_task_to_zombies_and_schedules_away() {
        rainbow_percpu::install_test_cpu(13);
        let boot = Task::new_boot(0x9000, table());
        install_current(boot.clone());

        let idle = Task::new_kernel(super::super::Priority::Idle, 0x9000, table(), entry, 0);
        install_idle_task(idle);

        die(boot.clone(), 7);

        assert_eq!(boot.state(), TaskState::Zombie);
        assert_eq!(boot.exit_code(), 7);
    }
}
