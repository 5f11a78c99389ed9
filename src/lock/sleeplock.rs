//! Sleeplocks: blocking mutexes built on a spinlock plus sleep/wakeup.
//! Holders may legally block on I/O while owning a sleeplock; they may not
//! legally acquire a spinlock while holding one.

use super::spinlock::Spinlock;
use super::{Lock, RawLock};
use crate::proc::sleep::WaitChannel;

pub type Sleeplock<T> = Lock<RawSleeplock, T>;
pub type SleeplockGuard<'a, T> = super::Guard<'a, RawSleeplock, T>;

pub struct RawSleeplock {
    /// PID of the holder, or `-1` if unlocked. Protected by the inner
    /// spinlock, not by itself.
    holder: Spinlock<i32>,
    chan: WaitChannel,
    name: &'static str,
}

impl RawSleeplock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            holder: Spinlock::new("sleeplock.holder", -1),
            chan: WaitChannel::new(),
            name,
        }
    }
}

impl RawLock for RawSleeplock {
    fn acquire(&self) {
        let mut guard = self.holder.lock();
        while *guard != -1 {
            self.chan.sleep(&mut guard);
        }
        *guard = crate::proc::current_pid().unwrap_or(-1);
    }

    fn release(&self) {
        let mut guard = self.holder.lock();
        assert!(*guard != -1, "release {}: not held", self.name);
        *guard = -1;
        self.chan.wakeup();
    }

    fn holding(&self) -> bool {
        *self.holder.lock() == crate::proc::current_pid().unwrap_or(-1)
    }
}

impl<T> Sleeplock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Lock::from_raw(RawSleeplock::new(name), data)
    }
}
