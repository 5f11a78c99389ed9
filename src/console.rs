//! Kernel console output: a single global sink serving `println!`/`print!`
//! and panic messages. The actual character device (VGA text mode, a UART,
//! ...) is out of scope and plugged in through [`ConsoleDevice`];
//! the core only ever writes through this module.

use core::fmt;

use crate::devices::ConsoleDevice;
use crate::lock::spinlock::Spinlock;

struct ConsoleSink {
    device: Option<&'static dyn ConsoleDevice>,
}

static CONSOLE: Spinlock<ConsoleSink> =
    Spinlock::new("console", ConsoleSink { device: None });

/// Installs the concrete console device. Called once during boot, before
/// the first `println!`.
pub fn set_device(device: &'static dyn ConsoleDevice) {
    CONSOLE.lock().device = Some(device);
}

/// Writes a single byte to the installed device, or drops it silently if
/// none is installed yet. Used by the `/dev/console` ramfs node so a
/// `write(2)` to it goes through the same sink as `println!`.
pub fn putchar_raw(c: u8) {
    if let Some(dev) = CONSOLE.lock().device {
        dev.putchar(c);
    }
}

struct Writer;

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let sink = CONSOLE.lock();
        if let Some(dev) = sink.device {
            for b in s.bytes() {
                dev.putchar(b);
            }
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments<'_>) {
    use fmt::Write;
    let _ = Writer.write_fmt(args);
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::console::_print(core::format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", core::format_args!($($arg)*)));
}
