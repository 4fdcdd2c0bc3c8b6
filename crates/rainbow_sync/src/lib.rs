#![cfg_attr(not(test), no_std)]

//! Spinning primitives shared by every other kernel crate: a plain
//! non-recursive [`Spin`] and the recursive [`Bkl`] (big kernel lock).
//!
//! Higher-level blocking primitives (wait queues, mutexes, semaphores) need
//! to suspend the *current task*, so they live above this crate, next to
//! the scheduler (`kernel::task`), not here — this crate stays a leaf,
//! spinning-only dependency the whole workspace can sit on.

mod bkl;
mod spin;

pub use bkl::Bkl;
pub use spin::{interrupts_enabled, Spin, SpinGuard};
