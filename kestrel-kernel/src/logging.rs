use core::fmt::{Result, Write};

use log::{LevelFilter, Metadata, Record};

/// COM1.
pub mod serial {
    use x86_64::instructions::port::Port;

    pub const COM1: u16 = 0x3f8;
    const LINE_STATUS: u16 = COM1 + 5;
    const DATA_READY: u8 = 0x01;

    pub fn write_bytes(bytes: &[u8]) {
        let mut port = Port::new(COM1);
        for &byte in bytes {
            unsafe { port.write(byte) };
        }
    }

    pub fn has_input() -> bool {
        let mut status: Port<u8> = Port::new(LINE_STATUS);
        unsafe { status.read() & DATA_READY != 0 }
    }

    pub fn read_byte() -> Option<u8> {
        if !has_input() {
            return None;
        }
        let mut port: Port<u8> = Port::new(COM1);
        Some(unsafe { port.read() })
    }
}

struct SerialPortWriter;

impl Write for SerialPortWriter {
    fn write_str(&mut self, s: &str) -> Result {
        serial::write_bytes(s.as_bytes());
        Ok(())
    }
}

pub fn _print(args: ::core::fmt::Arguments) {
    let _ = SerialPortWriter.write_fmt(args);
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::logging::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => { $crate::print!("\n") };
    ($fmt:expr) => {
        {
            $crate::print!($fmt);
            $crate::print!("\n");
        }
    };
    ($fmt:expr, $($arg:tt)*) => {
        {
            $crate::print!($fmt, $($arg)*);
            $crate::print!("\n");
        }
    };
}

/// Serial logger; each record is prefixed with its source location and the
/// current tick.
pub struct Logger;

static LOGGER: Logger = Logger;

/// Installs the serial logger. Safe to call more than once.
pub fn init(level: LevelFilter) {
    _print(format_args!("\x1b[0m"));
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!(
                "[{:>6}] [{}:{}] {}: {}",
                crate::time::ticks(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}
