#![cfg_attr(target_os = "none", no_std)]

//! x86 hardware abstraction layer (spec §4.D, §4.G, §4.H, §6): GDT/TSS,
//! IDT + interrupt controllers, the preemption timer, the monotonic clock,
//! SMP bring-up, task context switching, and the loader boot-handoff record.
//!
//! Targets x86 exclusively (ia32 / PAE / long mode) — see `DESIGN.md` for
//! the file-by-file grounding ledger.

extern crate alloc;

pub mod bootinfo;
pub mod context;
pub mod controller;
pub mod cpu;
pub mod clock;
pub mod gdt;
pub mod idt;
pub mod smp;
pub mod timer;
