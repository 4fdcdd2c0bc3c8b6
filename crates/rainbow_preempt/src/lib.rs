#![no_std]

use core::sync::atomic::{compiler_fence, Ordering};
use rainbow_percpu::PerCpu;

#[inline(always)]
pub fn disable() {
    PerCpu::current().preempt_count.fetch_add(1, Ordering::Relaxed);
    compiler_fence(Ordering::AcqRel);
}

#[inline(always)]
pub fn enable() {
    compiler_fence(Ordering::AcqRel);
    PerCpu::current().preempt_count.fetch_sub(1, Ordering::Relaxed);
}

#[inline(always)]
pub fn count() -> usize {
    PerCpu::current().preempt_count.load(Ordering::Relaxed)
}

#[macro_export]
macro_rules! assert_preempt_enabled {
    () => {{
        assert_eq!($crate::count(), 0, "Preemption is not enabled",);
    }};

    ($msg:literal) => {{
        assert_eq!($crate::count(), 0, "{}: Preemption is not enabled", $msg,);
    }};
}

#[macro_export]
macro_rules! assert_preempt_disabled {
    () => {{
        assert_ne!($crate::count(), 0, "Preemption is not disabled",);
    }};

    ($msg:literal) => {{
        assert_ne!($crate::count(), 0, "{}: Preemption is not disabled", $msg,);
    }};
}

#[macro_export]
macro_rules! assert_preempt_count_eq {
    ($n:expr) => {{
        assert_eq!(
            $crate::count(),
            $n,
            "Preemption count does not equal to {}",
            $n,
        );
    }};

    ($n:expr, $msg:literal) => {{
        assert_eq!(
            $crate::count(),
            $n,
            "{}: Preemption count does not equal to {}",
            $msg,
            $n,
        );
    }};
}

#[unsafe(no_mangle)]
pub extern "C" fn r_preempt_disable() {
    disable();
}

#[unsafe(no_mangle)]
pub extern "C" fn r_preempt_enable() {
    enable();
}

#[unsafe(no_mangle)]
pub extern "C" fn r_preempt_count() -> usize {
    count()
}
