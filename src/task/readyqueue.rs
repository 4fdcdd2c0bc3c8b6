//! Ready queue (spec §4.D: "exposes `queue(task)`, `pop() -> task?`
//! returning the highest-priority FIFO front").
//!
//! A `VecDeque<Arc<Task>>` per priority bucket (spec §3 "`{Idle < Low <
//! Normal < High}`"), popped high-to-low, FIFO within a bucket.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use super::{Priority, Task, TaskState, PRIORITY_LEVELS};

pub struct ReadyQueue {
    buckets: [VecDeque<Arc<Task>>; PRIORITY_LEVELS],
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            buckets: [
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
            ],
        }
    }

    /// Appends `task` to its priority bucket and marks it `Ready`.
    pub fn queue(&mut self, task: Arc<Task>) {
        task.set_state(TaskState::Ready);
        self.buckets[task.priority() as usize].push_back(task);
    }

    /// Pops the highest-priority FIFO front, if any.
    pub fn pop(&mut self) -> Option<Arc<Task>> {
        for bucket in self.buckets.iter_mut().rev() {
            if let Some(task) = bucket.pop_front() {
                return Some(task);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(VecDeque::is_empty)
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rainbow_mm::address::{PAddr, PRange};
    use rainbow_mm::page_table::PageTable;
    use rainbow_mm::pmm::{MemoryDescriptor, MemoryKind, Pmm};
    use rainbow_sync::Spin;

    fn task(priority: Priority) -> Arc<Task> {
        let mut pmm = Pmm::new();
        pmm.init(&[MemoryDescriptor {
            kind: MemoryKind::Available,
            range: PRange::new(PAddr::from_val(0x10_0000), PAddr::from_val(0x20_0000)),
        }]);
        let table = Arc::new(Spin::new(PageTable::init_long_mode(&mut pmm)));
        unsafe extern "C" fn entry(_: usize) -> ! {
            loop {}
        }
        Task::new_kernel(priority, 0x8000, table, entry, 0)
    }

    #[test]
    fn pop_returns_highest_priority_bucket_first() {
        rainbow_percpu::install_test_cpu(0);
        let mut rq = ReadyQueue::new();
        rq.queue(task(Priority::Low));
        rq.queue(task(Priority::High));
        rq.queue(task(Priority::Normal));

        assert_eq!(rq.pop().unwrap().priority(), Priority::High);
        assert_eq!(rq.pop().unwrap().priority(), Priority::Normal);
        assert_eq!(rq.pop().unwrap().priority(), Priority::Low);
        assert!(rq.pop().is_none());
    }

    #[test]
    fn same_priority_tasks_stay_fifo() {
        rainbow_percpu::install_test_cpu(1);
        let mut rq = ReadyQueue::new();
        let a = task(Priority::Normal);
        let b = task(Priority::Normal);
        let a_id = a.id();
        let b_id = b.id();
        rq.queue(a);
        rq.queue(b);

        assert_eq!(rq.pop().unwrap().id(), a_id);
        assert_eq!(rq.pop().unwrap().id(), b_id);
    }

    #[test]
    fn queue_marks_the_task_ready() {
        rainbow_percpu::install_test_cpu(2);
        let mut rq = ReadyQueue::new();
        let t = task(Priority::Idle);
        rq.queue(t.clone());
        assert_eq!(t.state(), TaskState::Ready);
    }
}
