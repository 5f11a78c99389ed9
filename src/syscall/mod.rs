//! System call entry point and numeric ABI. `dispatch` is called once per
//! `int 0x80` by [`crate::trap`], with a full [`TrapFrame`] available. The
//! syscall vector is a trap gate, so interrupts stay enabled across the
//! call (a handler can be preempted mid-syscall — e.g. while blocked behind
//! a sleeplock); handlers (`read`, `waitpid`, `sleep`) may also put the
//! calling thread to sleep before returning.
//!
//! The numeric values below are the repo's stable ABI: userland
//! binaries are built against these exact numbers, so they are not
//! reassignable for tidiness.

pub mod file;
pub mod mem;
pub mod proc;

use arrayvec::ArrayString;

use crate::arch::x86::paging::{self, PageDirectory};
use crate::arch::x86::TrapFrame;
use crate::error::{Error, KResult};
use crate::param::MAXPATH;

pub const SYS_PRINT: i32 = 1;
pub const SYS_OPEN: i32 = 2;
pub const SYS_MALLOC: i32 = 3;
pub const SYS_CALLOC: i32 = 4;
pub const SYS_REALLOC: i32 = 5;
pub const SYS_FREE: i32 = 6;
pub const SYS_READ: i32 = 8;
pub const SYS_GET_PROGRAM_ARGUMENTS: i32 = 11;
pub const SYS_CREATE_PROCESS: i32 = 12;
pub const SYS_FORK: i32 = 13;
pub const SYS_EXEC: i32 = 14;
pub const SYS_WAITPID: i32 = 15;
pub const SYS_EXIT: i32 = 16;
pub const SYS_SLEEP: i32 = 17;
pub const SYS_YIELD: i32 = 18;
pub const SYS_MEMSTAT: i32 = 19;
pub const SYS_PS: i32 = 20;
pub const SYS_CLOSE: i32 = 21;
pub const SYS_LSEEK: i32 = 22;
pub const SYS_FSTAT: i32 = 23;
pub const SYS_WRITE: i32 = 24;
pub const SYS_REBOOT: i32 = 25;
pub const SYS_SHUTDOWN: i32 = 26;
pub const SYS_GETCWD: i32 = 31;
pub const SYS_CHDIR: i32 = 32;
pub const SYS_GETDENTS: i32 = 33;
pub const SYS_IOCTL: i32 = 34;

/// Dispatches on `tf.syscall_num` (EAX) and returns the value to store
/// back in EAX. Any [`Error`] a handler returns becomes a negative errno
/// here, at the one place user space actually observes it.
pub fn dispatch(tf: &mut TrapFrame) -> i32 {
    let result: KResult<i32> = match tf.syscall_num() {
        SYS_PRINT => proc::sys_print(tf),
        SYS_OPEN => file::sys_open(tf),
        SYS_MALLOC => mem::sys_malloc(tf),
        SYS_CALLOC => mem::sys_calloc(tf),
        SYS_REALLOC => mem::sys_realloc(tf),
        SYS_FREE => mem::sys_free(tf),
        SYS_READ => file::sys_read(tf),
        SYS_GET_PROGRAM_ARGUMENTS => proc::sys_get_program_arguments(tf),
        SYS_CREATE_PROCESS => proc::sys_create_process(tf),
        SYS_FORK => proc::sys_fork(tf),
        SYS_EXEC => proc::sys_exec(tf),
        SYS_WAITPID => proc::sys_waitpid(),
        SYS_EXIT => proc::sys_exit(tf),
        SYS_SLEEP => proc::sys_sleep(tf),
        SYS_YIELD => proc::sys_yield(),
        SYS_MEMSTAT => proc::sys_memstat(),
        SYS_PS => proc::sys_ps(),
        SYS_CLOSE => file::sys_close(tf),
        SYS_LSEEK => file::sys_lseek(tf),
        SYS_FSTAT => file::sys_fstat(tf),
        SYS_WRITE => file::sys_write(tf),
        SYS_REBOOT => proc::sys_reboot(),
        SYS_SHUTDOWN => proc::sys_shutdown(),
        SYS_GETCWD => file::sys_getcwd(tf),
        SYS_CHDIR => file::sys_chdir(tf),
        SYS_GETDENTS => file::sys_getdents(tf),
        SYS_IOCTL => file::sys_ioctl(tf),
        other => {
            crate::println!("syscall: unknown call number {}", other);
            Err(Error::Unsupported)
        }
    };
    match result {
        Ok(value) => value,
        Err(e) => e.errno(),
    }
}

/// The calling process's page directory, for translating its user
/// pointers. Every syscall handler that touches user memory starts here.
pub(super) fn current_pagedir() -> KResult<*mut PageDirectory> {
    let pt = crate::proc::PTABLE.lock();
    let idx = pt.current_index().ok_or(Error::InvalidArgument)?;
    pt.process(idx).pagedir.ok_or(Error::InvalidArgument)
}

/// Copies `len` bytes from the calling process's address space at `va`
/// into a kernel buffer. Any translation failure surfaces as
/// `Error::InvalidArgument`.
pub(super) fn copy_from_user(va: u32, dst: &mut [u8]) -> KResult<()> {
    let pgdir = current_pagedir()?;
    paging::copy_from_user(unsafe { &mut *pgdir }, va as usize, dst)
}

pub(super) fn copy_to_user(va: u32, src: &[u8]) -> KResult<()> {
    let pgdir = current_pagedir()?;
    paging::copy_to_user(unsafe { &mut *pgdir }, va as usize, src)
}

/// Copies a NUL-terminated path string out of user space, one page-safe
/// byte at a time, bounded to `MAXPATH`.
pub(super) fn copy_path_from_user(va: u32) -> KResult<ArrayString<MAXPATH>> {
    let mut path = ArrayString::new();
    for i in 0..MAXPATH {
        let mut byte = [0u8; 1];
        copy_from_user(va + i as u32, &mut byte)?;
        if byte[0] == 0 {
            return Ok(path);
        }
        path.try_push(byte[0] as char).map_err(|_| Error::InvalidArgument)?;
    }
    Err(Error::InvalidArgument)
}
