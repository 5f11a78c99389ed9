//! Kernel error kinds and their propagation rule.
//!
//! Recoverable failures flow back through `Result`/`?` and, at the syscall
//! boundary, become a negative errno (`Error::errno`). Invariant violations
//! (lock re-entry, a mismatched `pop_cli`, freeing an untaken heap block,
//! the scheduler called from an interrupt handler, an MBR signature
//! mismatch, a full buffer cache) are not representable as `Error` — they
//! call `panic!` directly. Panics are unrecoverable here; there is no
//! process isolation to unwind into.

/// Negative errno values returned to user space from the syscall layer.
/// (`open` returning 0 is a distinct, separate convention handled in
/// `fs::file`, not here.)
pub mod errno {
    pub const EIO: i32 = -5;
    pub const EINVARG: i32 = -22;
    pub const ENOMEM: i32 = -12;
    pub const ENOENT: i32 = -2;
    pub const EROFS: i32 = -30;
    pub const ENOSYS: i32 = -38;
    pub const EAGAIN: i32 = -11;
    pub const EEXIST: i32 = -17;
    pub const ENOEXEC: i32 = -8;
    pub const ECHILD: i32 = -10;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Underlying device failure. Surfaces to user, does not crash the
    /// kernel.
    Io,
    /// Bad syscall argument; the syscall layer converts this to an errno.
    InvalidArgument,
    /// Allocation failure. During a syscall this becomes `-ENOMEM`; during
    /// boot it is fatal (the caller should panic, not propagate).
    OutOfMemory,
    /// A path could not be parsed.
    BadPath,
    /// VFS lookup failure.
    NotFound,
    /// The filesystem refuses a mutating operation.
    ReadOnly,
    /// The filesystem or inode does not implement the requested operation.
    Unsupported,
    /// Resource temporarily unavailable; caller should retry.
    Again,
    /// e.g. a duplicate mount prefix.
    InstanceTaken,
    /// ELF/FAT/MBR parse failure.
    InvalidFormat,
}

pub type KResult<T> = Result<T, Error>;

impl Error {
    /// Maps this error to the negative errno constant a syscall handler
    /// stores in the trap frame's EAX.
    pub const fn errno(self) -> i32 {
        use errno::*;
        match self {
            Error::Io => EIO,
            Error::InvalidArgument => EINVARG,
            Error::OutOfMemory => ENOMEM,
            Error::BadPath | Error::NotFound => ENOENT,
            Error::ReadOnly => EROFS,
            Error::Unsupported => ENOSYS,
            Error::Again => EAGAIN,
            Error::InstanceTaken => EEXIST,
            Error::InvalidFormat => ENOEXEC,
        }
    }
}
