//! Fatal error reporting (spec §7 "Fatal (unrecoverable)... Policy: log and
//! halt." and "any kernel fatality logs `Fatal:` with the cause... and
//! halts the offending CPU; other CPUs continue until they touch the dead
//! state.").
//!
//! No stack unwinding: this core halts the offending CPU only, rather than
//! walking frames with something like `unwinding`'s `_Unwind_Backtrace`
//! (see `DESIGN.md`).

/// Logs `Fatal: <message>` then halts this CPU forever (spec §7).
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        rainbow_log::println_fatal!("{}", format_args!($($arg)*));
        $crate::panic::halt_this_cpu()
    }};
}

/// Disables interrupts and parks this CPU. Other CPUs are unaffected (spec
/// §7's "other CPUs continue until they touch the dead state").
pub fn halt_this_cpu() -> ! {
    rainbow_hal::cpu::halt_forever()
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic_handler(info: &core::panic::PanicInfo) -> ! {
    rainbow_log::println_fatal!("<<<<<<<<<< 8< CUT HERE 8< <<<<<<<<<<");
    rainbow_log::println_fatal!("{}", info);
    halt_this_cpu()
}
