//! EFLAGS / `cli`/`sti` wrappers used by the spinlock's push_cli discipline.
//! On non-x86 hosts (unit tests), these fall back to a software flag so the
//! lock-depth bookkeeping in [`crate::lock::spinlock`] is still exercisable.

#[cfg(all(target_arch = "x86", not(test)))]
mod hw {
    use core::arch::asm;

    pub fn interrupts_enabled() -> bool {
        let flags: u32;
        unsafe {
            asm!("pushfd", "pop {0}", out(reg) flags, options(nomem, preserves_flags));
        }
        flags & (1 << 9) != 0
    }

    pub fn disable_interrupts() {
        unsafe { asm!("cli", options(nomem, nostack)) };
    }

    pub fn enable_interrupts() {
        unsafe { asm!("sti", options(nomem, nostack)) };
    }
}

#[cfg(not(all(target_arch = "x86", not(test))))]
mod hw {
    use core::sync::atomic::{AtomicBool, Ordering};

    static SOFT_FLAG: AtomicBool = AtomicBool::new(true);

    pub fn interrupts_enabled() -> bool {
        SOFT_FLAG.load(Ordering::Relaxed)
    }

    pub fn disable_interrupts() {
        SOFT_FLAG.store(false, Ordering::Relaxed);
    }

    pub fn enable_interrupts() {
        SOFT_FLAG.store(true, Ordering::Relaxed);
    }
}

pub use hw::{disable_interrupts, enable_interrupts, interrupts_enabled};
