//! Interrupt/exception/syscall dispatch. The assembly boundary pushes a
//! [`TrapFrame`] and calls [`dispatch`]; everything past that point is
//! ordinary Rust. Collapsed to one dispatcher since this kernel only ever
//! traps from user mode or a nested interrupt, never from a second
//! privilege level of its own.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch::x86::idt::{self, VEC_KEYBOARD, VEC_MOUSE, VEC_SYSCALL, VEC_TIMER};
use crate::arch::x86::TrapFrame;
use crate::devices::InterruptController;
use crate::proc::scheduler;

/// Address of the common trap-return trampoline (`trapret`, defined in the
/// `global_asm!` block below). A freshly loaded process's saved context
/// resumes here via `swtch`'s `ret` — the first context switch into a new
/// process returns through the trap path.
pub static TRAP_RETURN_ADDR: AtomicU32 = AtomicU32::new(0);

/// The platform's PIC/APIC driver, installed exactly once during boot.
/// Traps arriving before that call still reach `acknowledge`, which just
/// skips the EOI while the cell is empty.
static INTERRUPT_CONTROLLER: spin::Once<&'static dyn InterruptController> = spin::Once::new();

/// Installs the platform's PIC/APIC driver. Calling this a second time is a
/// no-op (boot-time singletons install once); the first call wins.
pub fn set_interrupt_controller(ic: &'static dyn InterruptController) {
    INTERRUPT_CONTROLLER.call_once(|| ic);
}

/// Installs every gate this kernel uses and records [`TRAP_RETURN_ADDR`].
/// Must run after [`crate::arch::x86::gdt::init`] and before
/// [`idt::load`].
///
/// # Safety
/// Must be called exactly once during boot.
pub unsafe fn init() {
    unsafe {
        install_gates();
        TRAP_RETURN_ADDR.store(trapret_addr(), Ordering::Relaxed);
    }
}

#[cfg(all(target_arch = "x86", not(test)))]
unsafe fn install_gates() {
    extern "C" {
        fn vec_divide_error();
        fn vec_breakpoint();
        fn vec_invalid_opcode();
        fn vec_double_fault();
        fn vec_general_protection();
        fn vec_page_fault();
        fn vec_timer();
        fn vec_keyboard();
        fn vec_mouse();
        fn vec_syscall();
    }
    unsafe {
        idt::set_gate(0, vec_divide_error as u32, 0);
        idt::set_gate(3, vec_breakpoint as u32, 0);
        idt::set_gate(6, vec_invalid_opcode as u32, 0);
        idt::set_gate(8, vec_double_fault as u32, 0);
        idt::set_gate(13, vec_general_protection as u32, 0);
        idt::set_gate(14, vec_page_fault as u32, 0);
        idt::set_gate(VEC_TIMER, vec_timer as u32, 0);
        idt::set_gate(VEC_KEYBOARD, vec_keyboard as u32, 0);
        idt::set_gate(VEC_MOUSE, vec_mouse as u32, 0);
        idt::set_trap_gate(VEC_SYSCALL, vec_syscall as u32, 3);
    }
}

#[cfg(not(all(target_arch = "x86", not(test))))]
unsafe fn install_gates() {}

#[cfg(all(target_arch = "x86", not(test)))]
fn trapret_addr() -> u32 {
    extern "C" {
        fn trapret();
    }
    trapret as u32
}

#[cfg(not(all(target_arch = "x86", not(test))))]
fn trapret_addr() -> u32 {
    0
}

/// Called by the assembly trap stub with interrupts disabled, a full
/// [`TrapFrame`] on the stack, and `tf.trapno` set to the vector taken.
/// Returns normally; the stub restores registers and `iret`s using
/// whatever `tf` now holds, so a syscall handler mutates `tf.eax` to set
/// the return value.
#[no_mangle]
pub extern "C" fn dispatch(tf: &mut TrapFrame) {
    match tf.trapno {
        t if t == VEC_SYSCALL as u32 => {
            tf.eax = crate::syscall::dispatch(tf) as u32;
        }
        t if t == VEC_TIMER as u32 => {
            crate::proc::tick();
            acknowledge(0);
            scheduler::yield_now();
        }
        t if t == VEC_KEYBOARD as u32 => {
            acknowledge(1);
        }
        t if t == VEC_MOUSE as u32 => {
            acknowledge(12);
        }
        _ => panic!("unhandled trap {} (err={:#x}, eip={:#x})", tf.trapno, tf.err, tf.eip),
    }

    if scheduler::should_exit() {
        crate::proc::exit(0);
    }
}

fn acknowledge(irq: u8) {
    if let Some(ic) = INTERRUPT_CONTROLLER.get() {
        ic.acknowledge(irq);
    }
}

// Common trap entry/exit plus one small stub per installed vector: each
// stub pushes an error code (0 where the CPU doesn't push one) and its
// vector number, then falls into `alltraps`. `alltraps` finishes building
// the `TrapFrame`, calls `dispatch`, and `trapret` undoes it and `iret`s.
#[cfg(all(target_arch = "x86", not(test)))]
core::arch::global_asm!(
    r#"
.macro TRAPHANDLER name vec
.global \name
\name:
    push 0
    push \vec
    jmp alltraps
.endm

.macro TRAPHANDLER_ERRCODE name vec
.global \name
\name:
    push \vec
    jmp alltraps
.endm

TRAPHANDLER vec_divide_error, 0
TRAPHANDLER vec_breakpoint, 3
TRAPHANDLER vec_invalid_opcode, 6
TRAPHANDLER_ERRCODE vec_double_fault, 8
TRAPHANDLER_ERRCODE vec_general_protection, 13
TRAPHANDLER_ERRCODE vec_page_fault, 14
TRAPHANDLER vec_timer, 0x20
TRAPHANDLER vec_keyboard, 0x21
TRAPHANDLER vec_mouse, 0x2C
TRAPHANDLER vec_syscall, 0x80

alltraps:
    push ds
    push es
    push fs
    push gs
    pushad

    mov ax, 0x10
    mov ds, ax
    mov es, ax

    push esp
    call dispatch
    add esp, 4

trapret:
    popad
    pop gs
    pop fs
    pop es
    pop ds
    add esp, 8
    iretd
"#
);
