//! Panic handling ("panics are unrecoverable by design"). A
//! kernel panic prints the message and location, then halts the CPU —
//! there is nowhere else to unwind to with no process isolation between
//! kernel code and the rest of the kernel.

use core::panic::PanicInfo;
use cfg_if::cfg_if;

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    crate::println!("kernel panic: {}", info);
    halt()
}

#[cfg(not(test))]
fn halt() -> ! {
    cfg_if! {
        if #[cfg(target_arch = "x86")] {
            use core::arch::asm;
            loop {
                unsafe { asm!("cli", "hlt", options(nomem, nostack)) };
            }
        } else {
            loop {}
        }
    }
}
