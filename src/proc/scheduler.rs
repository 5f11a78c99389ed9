//! The scheduler loop and the `sched`/`yield_now` handoff.
//!
//! Holds the process-table lock across the `swtch` into and out of a
//! thread rather than releasing it around the call — the usual xv6-family
//! idiom this module reproduces directly, since on a single logical CPU
//! exactly one of {scheduler, some thread} is ever actually executing at
//! a time, so the lock's "held" bit can safely outlive the stack frame
//! that set it.

use super::{ProcState, ProcTable, ThreadState, PTABLE};
use crate::arch::x86::{context, gdt, paging, regs};
use crate::lock::RawLock;
use crate::param::MAX_PROCESSES;

impl ProcTable {
    /// Priority-biased round robin: among all `Ready` threads, picks the
    /// highest priority; ties go to whichever comes first after
    /// `last_scheduled` in table order, so repeated scheduling rounds cycle
    /// fairly instead of always favoring low-index slots.
    fn pick_ready(&mut self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for offset in 1..=MAX_PROCESSES {
            let idx = (self.last_scheduled + offset) % MAX_PROCESSES;
            if self.procs[idx].thread.state != ThreadState::Ready {
                continue;
            }
            match best {
                None => best = Some(idx),
                Some(b) if self.procs[idx].priority > self.procs[b].priority => best = Some(idx),
                _ => {}
            }
        }
        if let Some(idx) = best {
            self.last_scheduled = idx;
        }
        best
    }
}

/// Runs forever, picking the next `Ready` thread and switching into it.
/// Never returns; called once from the boot path after `proc::init`.
///
/// # Safety
/// Must run on the boot stack, with interrupts configured but not
/// necessarily enabled, and must never be called re-entrantly.
pub unsafe fn scheduler() -> ! {
    loop {
        PTABLE.raw.acquire();
        let found = unsafe {
            let pt = &mut *PTABLE.get_mut_unchecked();
            match pt.pick_ready() {
                Some(idx) => {
                    pt.current = Some(idx);
                    pt.procs[idx].thread.state = ThreadState::Running;
                    gdt::set_kernel_stack(pt.procs[idx].thread.kstack_top() as u32);
                    if let Some(pgdir) = pt.procs[idx].pagedir {
                        paging::switch_pgdir(pgdir);
                    }
                    let sched_ctx: *mut context::Context = &mut pt.scheduler_context;
                    let thread_ctx: *const context::Context = &pt.procs[idx].thread.context;
                    // SAFETY: both contexts belong to live threads/the
                    // scheduler; interrupts are disabled (we hold the raw
                    // lock, which asserts as much) across the switch.
                    context::swtch(sched_ctx, thread_ctx);
                    // Resumed here once the thread calls `sched` again
                    // (via yield/sleep/exit). `pt` is the same table; the
                    // thread may have changed state (Ready/Sleeping/Zombie)
                    // by the time control returns.
                    pt.current = None;
                    true
                }
                None => false,
            }
        };
        PTABLE.raw.release();

        if !found {
            // No one is runnable: idle with interrupts enabled so a timer
            // or device IRQ can make progress.
            idle_wait();
        }
    }
}

#[cfg(all(target_arch = "x86", not(test)))]
fn idle_wait() {
    unsafe {
        regs::enable_interrupts();
        core::arch::asm!("hlt", options(nomem, nostack));
    }
}

#[cfg(not(all(target_arch = "x86", not(test))))]
fn idle_wait() {}

/// Hands control from the current thread back to the scheduler loop. The
/// caller must already hold `PTABLE`'s raw lock (not a `Guard` — this call
/// crosses a stack switch, which RAII guards cannot survive) and the
/// current thread's state must already reflect why it's yielding
/// (`Ready`, `Sleeping`, `Stopped`, ...).
///
/// # Safety
/// `pt.current_index` must be `Some`; interrupts must be disabled.
pub(super) unsafe fn sched(pt: &mut ProcTable) {
    let idx = pt.current.expect("sched: no current thread");
    debug_assert!(
        !regs::interrupts_enabled(),
        "sched: interrupts must be disabled across a context switch"
    );
    debug_assert_ne!(
        pt.procs[idx].thread.state,
        ThreadState::Running,
        "sched: thread must have set a non-Running state before yielding"
    );
    let old_ctx: *mut context::Context = &mut pt.procs[idx].thread.context;
    let new_ctx: *const context::Context = &pt.scheduler_context;
    unsafe { context::swtch(old_ctx, new_ctx) };
}

/// Voluntarily gives up the CPU (`Running -> Ready`). Called by
/// the `yield` syscall and by the timer interrupt handler on every tick
/// (involuntary preemption).
pub fn yield_now() {
    PTABLE.raw.acquire();
    unsafe {
        let pt = &mut *PTABLE.get_mut_unchecked();
        let idx = pt.current.expect("yield_now: no current thread");
        pt.procs[idx].thread.state = ThreadState::Ready;
        sched(pt);
    }
    PTABLE.raw.release();
}

/// True if the current thread's process has been killed and the caller
/// should self-exit at its next safe point (`kill`).
pub fn should_exit() -> bool {
    let pt = PTABLE.lock();
    match pt.current_index() {
        Some(idx) => pt.process(idx).killed || pt.process(idx).state == ProcState::Zombie,
        None => false,
    }
}
