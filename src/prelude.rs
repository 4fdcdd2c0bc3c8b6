//! Common imports for the rest of this crate: `alloc` collections and
//! `Arc`/`Spin`, reached for everywhere else in this tree.

pub(crate) use alloc::boxed::Box;
pub(crate) use alloc::string::String;
pub(crate) use alloc::sync::Arc;
pub(crate) use alloc::vec::Vec;
pub(crate) use alloc::{vec, format};

pub(crate) use rainbow_sync::Spin;

pub(crate) use crate::task::{Priority, Task, TaskState};
