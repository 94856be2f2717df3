// Console and log backend for the badgeload kernel
// Everything goes to the UART; the log facade is routed through here too

use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use crate::uart::Uart;

// === CONSOLE MACROS ===

#[macro_export]
macro_rules! console_print {
    ($($arg:tt)*) => {{
        $crate::console::print(format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! console_println {
    () => {
        $crate::console_print!("\n")
    };
    ($($arg:tt)*) => {{
        $crate::console_print!($($arg)*);
        $crate::console_print!("\n");
    }};
}

// Global UART instance
pub static UART: Mutex<Uart> = Mutex::new(Uart::new());

// A trap can interrupt a print on the same hart; the holder never gets to
// unlock, so contended output goes straight to the device
pub fn print(args: fmt::Arguments) {
    match UART.try_lock() {
        Some(mut uart) => {
            let _ = uart.write_fmt(args);
        }
        None => emergency_print(args),
    }
}

pub fn putchar(ch: u8) {
    match UART.try_lock() {
        Some(uart) => uart.putchar(ch),
        None => Uart::new().putchar(ch),
    }
}

/// Write without touching the console lock
pub fn emergency_print(args: fmt::Arguments) {
    let _ = Uart::new().write_fmt(args);
}

// === LOG BACKEND ===

struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            console_println!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

#[cfg(feature = "production")]
const MAX_LEVEL: LevelFilter = LevelFilter::Info;
#[cfg(not(feature = "production"))]
const MAX_LEVEL: LevelFilter = LevelFilter::Debug;

pub fn init_logging() -> Result<(), &'static str> {
    log::set_logger(&LOGGER).map_err(|_| "logger already installed")?;
    log::set_max_level(MAX_LEVEL);
    Ok(())
}
