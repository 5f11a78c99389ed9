//! Process lifecycle and miscellaneous syscalls: `print,
//! get_program_arguments, create_process, fork, exec, waitpid, exit, sleep,
//! yield, memstat, ps, reboot, shutdown`.

use arrayvec::ArrayString;

use crate::arch::x86::TrapFrame;
use crate::error::{Error, KResult};
use crate::fs::{self, OpenFlags};
use crate::kalloc;
use crate::lock::spinlock::Spinlock;
use crate::param::{MAXARG, MAXPATH, MAX_EXEC_IMAGE};
use crate::proc::{self, PTABLE};

/// Holds one executable image while it's being parsed and mapped. A
/// process table slot occupies this for the duration of `load_and_run`
/// below; concurrent `exec`/`create_process` calls serialize on it rather
/// than each wanting their own 64 KiB of static storage.
static EXEC_SCRATCH: Spinlock<[u8; MAX_EXEC_IMAGE]> = Spinlock::new("exec-scratch", [0u8; MAX_EXEC_IMAGE]);

fn read_whole_file(path: &str) -> KResult<(usize, crate::lock::spinlock::SpinlockGuard<'static, [u8; MAX_EXEC_IMAGE]>)> {
    let fti = fs::open(path, OpenFlags::RDONLY)?;
    let close_on_drop = scopeguard::guard(fti, |fti| {
        fs::file::table().close(fti);
    });
    let mut scratch = EXEC_SCRATCH.lock();
    let mut total = 0usize;
    loop {
        if total >= scratch.len() {
            break;
        }
        let n = fs::file::table().read(*close_on_drop, &mut scratch[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok((total, scratch))
}

/// Reads argv out of user space: `argv` points to an array of `u32`
/// pointers, NUL-terminated with a zero entry, each pointing at a
/// NUL-terminated string (the usual C `char **argv` layout).
fn read_argv(argv: u32) -> KResult<arrayvec::ArrayVec<ArrayString<MAXPATH>, MAXARG>> {
    let mut out = arrayvec::ArrayVec::new();
    if argv == 0 {
        return Ok(out);
    }
    for i in 0..MAXARG as u32 {
        let mut ptr_bytes = [0u8; 4];
        super::copy_from_user(argv + i * 4, &mut ptr_bytes)?;
        let ptr = u32::from_le_bytes(ptr_bytes);
        if ptr == 0 {
            break;
        }
        let s = super::copy_path_from_user(ptr)?;
        out.try_push(s).map_err(|_| Error::InvalidArgument)?;
    }
    Ok(out)
}

fn argv_as_str_refs(args: &arrayvec::ArrayVec<ArrayString<MAXPATH>, MAXARG>) -> arrayvec::ArrayVec<&str, MAXARG> {
    let mut out = arrayvec::ArrayVec::new();
    for s in args.iter() {
        out.push(s.as_str());
    }
    out
}

pub fn sys_print(tf: &TrapFrame) -> KResult<i32> {
    let s = super::copy_path_from_user(tf.arg(0))?;
    crate::print!("{}", s.as_str());
    Ok(0)
}

/// Copies the calling process's saved argument strings back to user space
/// as a NUL-separated blob, returning the count of strings written.
pub fn sys_get_program_arguments(tf: &TrapFrame) -> KResult<i32> {
    let pt = PTABLE.lock();
    let idx = pt.current_index().ok_or(Error::InvalidArgument)?;
    let args = pt.process(idx).args.clone();
    drop(pt);

    let mut cursor = tf.arg(0);
    let limit = tf.arg(0) + tf.arg(1);
    for arg in args.iter() {
        let bytes = arg.as_bytes();
        if cursor + bytes.len() as u32 + 1 > limit {
            return Err(Error::InvalidArgument);
        }
        super::copy_to_user(cursor, bytes)?;
        super::copy_to_user(cursor + bytes.len() as u32, &[0u8])?;
        cursor += bytes.len() as u32 + 1;
    }
    Ok(args.len() as i32)
}

/// Spawns a new process from the executable at the user-supplied path
/// (`create_process`), distinct from `fork`: the new process has
/// no relation to the caller's address space.
pub fn sys_create_process(tf: &TrapFrame) -> KResult<i32> {
    let path = super::copy_path_from_user(tf.arg(0))?;
    let args = read_argv(tf.arg(1))?;
    let (len, scratch) = read_whole_file(path.as_str())?;
    let refs = argv_as_str_refs(&args);
    let pid = proc::process_load(path.as_str(), &scratch[..len], &refs)?;
    Ok(pid)
}

pub fn sys_fork(tf: &TrapFrame) -> KResult<i32> {
    proc::fork(tf)
}

/// Replaces the caller's image in place (`exec`). On success this
/// never returns to the calling trap frame's old eip — `proc::exec`
/// overwrites `tf` itself, and `dispatch` resumes the process through
/// whatever it now holds instead.
pub fn sys_exec(tf: &mut TrapFrame) -> KResult<i32> {
    let path = super::copy_path_from_user(tf.arg(0))?;
    let args = read_argv(tf.arg(1))?;
    let (len, scratch) = read_whole_file(path.as_str())?;
    let refs = argv_as_str_refs(&args);
    proc::exec(tf, &scratch[..len], &refs)?;
    Ok(0)
}

pub fn sys_waitpid() -> KResult<i32> {
    let (pid, _code) = proc::wait()?;
    Ok(pid)
}

/// `exit` never returns to its caller, so there is no `i32` to hand back;
/// `dispatch` never stores a return value for this call.
pub fn sys_exit(tf: &TrapFrame) -> ! {
    proc::exit(tf.arg(0) as i32)
}

pub fn sys_sleep(tf: &TrapFrame) -> KResult<i32> {
    let ticks = tf.arg(0) as u64;
    let deadline = proc::ticks() + ticks;
    proc::sleep_until(deadline);
    Ok(0)
}

pub fn sys_yield() -> KResult<i32> {
    proc::scheduler::yield_now();
    Ok(0)
}

/// Packs free/total kernel heap blocks into EAX's two halves: free blocks
/// in the low 16 bits, total blocks in the high 16 (`memstat`: a
/// compact snapshot, exact layout left to the implementation).
pub fn sys_memstat() -> KResult<i32> {
    let free = kalloc::heap().free_blocks() as u32 & 0xFFFF;
    let total = (kalloc::heap().total_blocks() as u32 & 0xFFFF) << 16;
    Ok((total | free) as i32)
}

/// Prints a snapshot of the process table to the console (`ps`).
pub fn sys_ps() -> KResult<i32> {
    let pt = PTABLE.lock();
    let mut count = 0;
    for i in 0..crate::param::MAX_PROCESSES {
        let p = pt.process(i);
        if p.state == proc::ProcState::Empty {
            continue;
        }
        crate::println!("{:>5} {:>5} {:?} {}", p.pid, p.parent, p.state, p.name.as_str());
        count += 1;
    }
    Ok(count)
}

/// Neither reboot nor shutdown is implementable from this module: both
/// require platform-specific port I/O (ACPI, keyboard controller reset)
/// that belongs to the device layer, outside this crate's boundary. They
/// panic instead of silently returning success.
pub fn sys_reboot() -> KResult<i32> {
    panic!("reboot: no platform reset handler installed");
}

pub fn sys_shutdown() -> KResult<i32> {
    panic!("shutdown: no platform power-off handler installed");
}
