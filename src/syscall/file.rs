//! File-descriptor syscalls: `open, close, read, write,
//! lseek, fstat, ioctl, getdents, chdir, getcwd`. A user-visible fd is the
//! process's local slot index plus one — `open` returning 0 signals
//! failure, so fd 0 is never handed out.

use crate::arch::x86::TrapFrame;
use crate::error::{Error, KResult};
use crate::fs::inode::SeekWhence;
use crate::fs::{self, OpenFlags};
use crate::param::NOFILE;
use crate::proc::PTABLE;

const COPY_CHUNK: usize = 512;

fn fd_to_index(fd: u32) -> KResult<usize> {
    if fd == 0 || fd as usize > NOFILE {
        return Err(Error::InvalidArgument);
    }
    Ok(fd as usize - 1)
}

pub fn sys_open(tf: &TrapFrame) -> KResult<i32> {
    let path = super::copy_path_from_user(tf.arg(0))?;
    let flags = OpenFlags::from_bits_truncate(tf.arg(1));
    let fti = fs::open(path.as_str(), flags)?;

    let mut pt = PTABLE.lock();
    let idx = pt.current_index().ok_or(Error::InvalidArgument)?;
    let proc = pt.process_mut(idx);
    match proc.files.iter().position(Option::is_none) {
        Some(slot) => {
            proc.files[slot] = Some(fti);
            Ok(slot as i32 + 1)
        }
        None => {
            drop(pt);
            fs::file::table().close(fti);
            Err(Error::Again)
        }
    }
}

pub fn sys_close(tf: &TrapFrame) -> KResult<i32> {
    let idx = fd_to_index(tf.arg(0))?;
    let mut pt = PTABLE.lock();
    let pidx = pt.current_index().ok_or(Error::InvalidArgument)?;
    let fti = pt.process_mut(pidx).files[idx].take().ok_or(Error::InvalidArgument)?;
    drop(pt);
    fs::file::table().close(fti);
    Ok(0)
}

fn current_fti(idx: usize) -> KResult<fs::file::FileTableIndex> {
    let pt = PTABLE.lock();
    let pidx = pt.current_index().ok_or(Error::InvalidArgument)?;
    pt.process(pidx).files[idx].ok_or(Error::InvalidArgument)
}

pub fn sys_read(tf: &TrapFrame) -> KResult<i32> {
    let idx = fd_to_index(tf.arg(0))?;
    let user_buf = tf.arg(1);
    let count = tf.arg(2) as usize;
    let fti = current_fti(idx)?;

    let mut total = 0usize;
    let mut chunk = [0u8; COPY_CHUNK];
    while total < count {
        let want = core::cmp::min(COPY_CHUNK, count - total);
        let n = fs::file::table().read(fti, &mut chunk[..want])?;
        if n == 0 {
            break;
        }
        super::copy_to_user(user_buf + total as u32, &chunk[..n])?;
        total += n;
        if n < want {
            break;
        }
    }
    Ok(total as i32)
}

pub fn sys_write(tf: &TrapFrame) -> KResult<i32> {
    let idx = fd_to_index(tf.arg(0))?;
    let user_buf = tf.arg(1);
    let count = tf.arg(2) as usize;
    let fti = current_fti(idx)?;

    let mut total = 0usize;
    let mut chunk = [0u8; COPY_CHUNK];
    while total < count {
        let want = core::cmp::min(COPY_CHUNK, count - total);
        super::copy_from_user(user_buf + total as u32, &mut chunk[..want])?;
        let n = fs::file::table().write(fti, &chunk[..want])?;
        total += n;
        if n < want {
            break;
        }
    }
    Ok(total as i32)
}

pub fn sys_lseek(tf: &TrapFrame) -> KResult<i32> {
    let idx = fd_to_index(tf.arg(0))?;
    let offset = tf.arg(1) as i32 as i64;
    let whence = match tf.arg(2) {
        0 => SeekWhence::Start,
        1 => SeekWhence::Current,
        2 => SeekWhence::End,
        _ => return Err(Error::InvalidArgument),
    };
    let fti = current_fti(idx)?;
    let new_offset = fs::file::table().seek(fti, offset, whence)?;
    Ok(new_offset as i32)
}

/// On-the-wire layout for `fstat`'s output struct, matching the userland
/// ABI: an 8-byte size followed by a one-byte directory flag.
#[repr(C)]
struct StatAbi {
    size: u64,
    is_dir: u8,
}

pub fn sys_fstat(tf: &TrapFrame) -> KResult<i32> {
    let idx = fd_to_index(tf.arg(0))?;
    let fti = current_fti(idx)?;
    let stat = fs::file::table().stat(fti)?;
    let abi = StatAbi { size: stat.size, is_dir: stat.is_dir as u8 };
    let bytes = unsafe { core::slice::from_raw_parts(&abi as *const StatAbi as *const u8, core::mem::size_of::<StatAbi>()) };
    super::copy_to_user(tf.arg(1), bytes)?;
    Ok(0)
}

pub fn sys_ioctl(tf: &TrapFrame) -> KResult<i32> {
    let idx = fd_to_index(tf.arg(0))?;
    let fti = current_fti(idx)?;
    fs::file::table().ioctl(fti, tf.arg(1), tf.arg(2) as usize)
}

/// Directory enumeration is a capability no filesystem wired into this
/// kernel implements yet; missing capabilities return `Unsupported`.
pub fn sys_getdents(_tf: &TrapFrame) -> KResult<i32> {
    Err(Error::Unsupported)
}

pub fn sys_chdir(tf: &TrapFrame) -> KResult<i32> {
    let path = super::copy_path_from_user(tf.arg(0))?;
    let stat = fs::stat(path.as_str())?;
    if !stat.is_dir {
        return Err(Error::InvalidArgument);
    }
    let mut pt = PTABLE.lock();
    let idx = pt.current_index().ok_or(Error::InvalidArgument)?;
    let proc = pt.process_mut(idx);
    proc.cwd.clear();
    proc.cwd.try_push_str(path.as_str()).map_err(|_| Error::InvalidArgument)?;
    Ok(0)
}

pub fn sys_getcwd(tf: &TrapFrame) -> KResult<i32> {
    let pt = PTABLE.lock();
    let idx = pt.current_index().ok_or(Error::InvalidArgument)?;
    let cwd = pt.process(idx).cwd;
    drop(pt);

    let size = tf.arg(1) as usize;
    let bytes = cwd.as_bytes();
    if bytes.len() + 1 > size {
        return Err(Error::InvalidArgument);
    }
    super::copy_to_user(tf.arg(0), bytes)?;
    super::copy_to_user(tf.arg(0) + bytes.len() as u32, &[0u8])?;
    Ok(bytes.len() as i32)
}
