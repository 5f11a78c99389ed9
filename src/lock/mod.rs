//! Generic lock scaffolding shared by [`spinlock`] and [`sleeplock`].
//!
//! A `Lock<L, T>` pairs a `RawLock` (the acquisition strategy) with the data
//! it protects, RAII-guarded the usual way: `lock` blocks (or spins) until
//! acquired and returns a `Guard` that releases on drop.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

pub mod sleeplock;
pub mod spinlock;

/// The acquisition/release strategy for a [`Lock`]. Implementors must
/// ensure `acquire` does not return until exclusive access is established,
/// and that `release` is only ever called by the current holder.
pub trait RawLock {
    fn acquire(&self);
    fn release(&self);
    fn holding(&self) -> bool;
}

/// A `T` protected by a `RawLock` implementation `L`.
pub struct Lock<L: RawLock, T> {
    pub(crate) raw: L,
    data: UnsafeCell<T>,
}

unsafe impl<L: RawLock + Send, T: Send> Sync for Lock<L, T> {}

impl<L: RawLock, T> Lock<L, T> {
    pub const fn from_raw(raw: L, data: T) -> Self {
        Self {
            raw,
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> Guard<'_, L, T> {
        self.raw.acquire();
        Guard { lock: self }
    }

    /// Returns whether the current execution context already holds this
    /// lock. Used by re-entrancy assertions.
    pub fn holding(&self) -> bool {
        self.raw.holding()
    }

    /// Escape hatch for code that must touch the data without going
    /// through the normal acquire protocol (debug dumps that must not wedge
    /// a stuck machine further). Caller is responsible for safety.
    pub unsafe fn get_mut_unchecked(&self) -> *mut T {
        self.data.get()
    }
}

pub struct Guard<'a, L: RawLock, T> {
    lock: &'a Lock<L, T>,
}

impl<L: RawLock, T> Deref for Guard<'_, L, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<L: RawLock, T> DerefMut for Guard<'_, L, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<L: RawLock, T> Drop for Guard<'_, L, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
    }
}

impl<L: RawLock, T> Guard<'_, L, T> {
    /// Releases the lock, runs `f`, then re-acquires it. Used by
    /// `sleep(chan, lock)`: `lock` must not be held while the
    /// thread is blocked, but the caller's stack frame still names the
    /// guard afterward.
    pub fn reacquire_after<R>(&mut self, f: impl FnOnce() -> R) -> R {
        self.lock.raw.release();
        let r = f();
        self.lock.raw.acquire();
        r
    }

    /// Blocks the calling thread on `chan`, releasing this guard's lock for
    /// the duration and re-acquiring it before returning. The process table
    /// lock is taken and held across the release/block/park sequence so a
    /// concurrent `wakeup` cannot observe the thread before it is actually
    /// marked asleep — see [`crate::proc::sleep::WaitChannel::sleep`].
    pub fn sleep(&mut self, chan: usize) {
        crate::proc::begin_sleep(chan);
        self.lock.raw.release();
        crate::proc::park();
        self.lock.raw.acquire();
    }
}
