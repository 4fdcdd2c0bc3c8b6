#![cfg_attr(target_os = "none", no_std)]

use core::fmt::{self, Write};

use alloc::sync::Arc;
use rainbow_sync::Spin;

extern crate alloc;

pub trait ConsoleWrite: Send + Sync {
    fn write(&self, s: &str);
}

struct Console {
    console: Option<Arc<dyn ConsoleWrite>>,
}

static CONSOLE: Spin<Console> = Spin::new(Console::new());

impl Console {
    const fn new() -> Self {
        Self { console: None }
    }
}

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(console) = self.console.as_ref() {
            console.write(s);
        }
        Ok(())
    }
}

pub fn set_console(console: Arc<dyn ConsoleWrite>) {
    CONSOLE.lock().console.replace(console);
}

#[doc(hidden)]
pub fn do_print(args: fmt::Arguments) {
    let _ = CONSOLE.lock().write_fmt(args);
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::do_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n")
    };
    ($($arg:tt)*) => {
        $crate::print!("{}\n", format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println_warn {
    ($($arg:tt)*) => {
        $crate::println!("[kernel: warn] {}", format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println_debug {
    ($($arg:tt)*) => {
        $crate::println!("[kernel:debug] {}", format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println_info {
    ($($arg:tt)*) => {
        $crate::println!("[kernel: info] {}", format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println_fatal {
    () => {
        $crate::println!("[kernel:fatal] ")
    };
    ($($arg:tt)*) => {
        $crate::println!("[kernel:fatal] {}", format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println_trace {
    ($feat:literal) => {
        #[deny(unexpected_cfgs)]
        {
            #[cfg(feature = $feat)]
            $crate::println!("[kernel:trace] ")
        }
    };
    ($feat:literal, $($arg:tt)*) => {{
        #[deny(unexpected_cfgs)]
        {
            #[cfg(feature = $feat)]
            $crate::println!("[kernel:trace] {}", format_args!($($arg)*))
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use std::sync::Mutex;

    struct Capture(Mutex<String>);

    impl ConsoleWrite for Capture {
        fn write(&self, s: &str) {
            self.0.lock().unwrap().push_str(s);
        }
    }

    #[test]
    fn println_reaches_the_installed_console() {
        rainbow_percpu::install_test_cpu(0);
        let capture = Arc::new(Capture(Mutex::new(String::new())));
        set_console(capture.clone());
        println!("hello {}", 42);
        assert_eq!(capture.0.lock().unwrap().as_str(), "hello 42\n");
    }
}
