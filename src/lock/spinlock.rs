//! Interrupt-disabling spinlocks.
//!
//! On a uniprocessor kernel, mutual exclusion versus interrupts *is* mutual
//! exclusion: acquiring disables interrupts before spinning, and release
//! re-enables them only once the outermost paired disable unwinds. The
//! `push_cli`/`pop_cli` nesting counter stands in for a per-hart counter
//! since this kernel schedules on exactly one logical CPU.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{Lock, RawLock};
use crate::arch::x86::regs;

pub type Spinlock<T> = Lock<RawSpinlock, T>;
pub type SpinlockGuard<'a, T> = super::Guard<'a, RawSpinlock, T>;

/// The only CPU this kernel schedules on. Tracks the push_cli nesting
/// depth and whether interrupts were enabled before the outermost
/// disable.
pub struct CpuState {
    /// Number of nested `push_cli` calls not yet matched by `pop_cli`.
    depth: AtomicUsize,
    /// Whether interrupts were enabled before the outermost `push_cli`.
    was_enabled: AtomicBool,
}

static CPU: CpuState = CpuState {
    depth: AtomicUsize::new(0),
    was_enabled: AtomicBool::new(false),
};

/// Disables interrupts, remembering the pre-existing state on the
/// outermost call. Nested calls are reference-counted by `pop_cli`.
pub fn push_cli() {
    let enabled = regs::interrupts_enabled();
    regs::disable_interrupts();
    if CPU.depth.load(Ordering::Relaxed) == 0 {
        CPU.was_enabled.store(enabled, Ordering::Relaxed);
    }
    CPU.depth.fetch_add(1, Ordering::Relaxed);
}

/// Undoes one `push_cli`. Only re-enables interrupts once the outermost
/// pair has unwound, and only if they were enabled beforehand.
pub fn pop_cli() {
    assert!(
        !regs::interrupts_enabled(),
        "pop_cli: interrupts were enabled"
    );
    let depth = CPU.depth.load(Ordering::Relaxed);
    assert!(depth >= 1, "pop_cli: unmatched with push_cli");
    let depth = depth - 1;
    CPU.depth.store(depth, Ordering::Relaxed);
    if depth == 0 && CPU.was_enabled.load(Ordering::Relaxed) {
        regs::enable_interrupts();
    }
}

/// Current `push_cli` nesting depth, exposed for the lock-discipline
/// property test (`depth_after == depth_before` across any
/// acquire/release pair).
pub fn cli_depth() -> usize {
    CPU.depth.load(Ordering::Relaxed)
}

/// Mutual-exclusion lock that busy-waits with interrupts disabled.
pub struct RawSpinlock {
    name: &'static str,
    /// `true` while held. On a uniprocessor kernel this plus `push_cli`
    /// fully establishes exclusion; the atomic exists so `holding` is
    /// race-free against an interrupt handler that might (incorrectly)
    /// probe it.
    locked: AtomicBool,
    /// File/line of the current holder's acquire site, for panic messages.
    /// Debug-only bookkeeping; never read for correctness.
    site: AtomicUsize,
}

impl RawSpinlock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
            site: AtomicUsize::new(0),
        }
    }

    #[track_caller]
    pub fn note_site(&self) {
        self.site
            .store(core::panic::Location::caller().line() as usize, Ordering::Relaxed);
    }

    /// Line number of the current holder's acquire site (0 if never
    /// recorded). Debug aid only.
    pub fn site(&self) -> usize {
        self.site.load(Ordering::Relaxed)
    }
}

impl RawLock for RawSpinlock {
    #[track_caller]
    fn acquire(&self) {
        push_cli();
        assert!(!self.locked.load(Ordering::Relaxed), "acquire {}: already held", self.name);
        self.locked.store(true, Ordering::Release);
        self.note_site();
    }

    fn release(&self) {
        assert!(self.locked.load(Ordering::Relaxed), "release {}: not held", self.name);
        self.locked.store(false, Ordering::Release);
        pop_cli();
    }

    fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl<T> Spinlock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Lock::from_raw(RawSpinlock::new(name), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_push_pop_restores_depth() {
        // cli_depth is global, so snapshot before/after rather than
        // assuming a pristine 0 (other tests in this binary may interleave
        // when run with more than one thread; run single-threaded here).
        let before = cli_depth();
        push_cli();
        push_cli();
        push_cli();
        assert_eq!(cli_depth(), before + 3);
        pop_cli();
        pop_cli();
        pop_cli();
        assert_eq!(cli_depth(), before);
    }

    #[test]
    fn acquire_release_pairs_restore_depth() {
        static LOCK: Spinlock<u32> = Spinlock::new("test", 0);
        let before = cli_depth();
        {
            let mut g = LOCK.lock();
            *g += 1;
        }
        assert_eq!(cli_depth(), before);
    }

    #[test]
    #[should_panic(expected = "already held")]
    fn reentrant_acquire_panics() {
        static LOCK: Spinlock<u32> = Spinlock::new("reentrant", 0);
        let _g1 = LOCK.lock();
        let _g2 = LOCK.lock();
    }
}
