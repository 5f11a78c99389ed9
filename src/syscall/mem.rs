//! User heap syscalls: `malloc, calloc, realloc, free`. The
//! heap is the tail of the process's address space — `malloc` just grows
//! `proc.sz` via [`paging::alloc_user_vm`], never reused until the process
//! exits. There is no free list ("a user heap supplied by the
//! `malloc` syscall into an arena allocated by the kernel", not a general
//! allocator).

use crate::arch::x86::paging;
use crate::arch::x86::TrapFrame;
use crate::error::{Error, KResult};
use crate::proc::PTABLE;

fn grow_heap(size: u32) -> KResult<u32> {
    let mut pt = PTABLE.lock();
    let idx = pt.current_index().ok_or(Error::InvalidArgument)?;
    let proc = pt.process_mut(idx);
    let pgdir = proc.pagedir.ok_or(Error::InvalidArgument)?;
    let old_size = proc.sz;
    let new_size = old_size.checked_add(size as usize).ok_or(Error::InvalidArgument)?;
    let grown = paging::alloc_user_vm(unsafe { &mut *pgdir }, old_size, new_size)?;
    proc.sz = grown;
    Ok(old_size as u32)
}

/// Bytes are already zero: `alloc_user_vm` zeroes every page it hands out,
/// so `calloc` is just `malloc` under another name.
pub fn sys_malloc(tf: &TrapFrame) -> KResult<i32> {
    let base = grow_heap(tf.arg(0))?;
    Ok(base as i32)
}

pub fn sys_calloc(tf: &TrapFrame) -> KResult<i32> {
    let count = tf.arg(0);
    let size = tf.arg(1);
    let total = count.checked_mul(size).ok_or(Error::InvalidArgument)?;
    let base = grow_heap(total)?;
    Ok(base as i32)
}

/// Grows the heap and copies the old allocation's contents to the new
/// location. There is no shrink path and no in-place growth — every
/// `realloc` is a fresh allocation at the current break (bump
/// allocator, no free list to reuse space from).
pub fn sys_realloc(tf: &TrapFrame) -> KResult<i32> {
    let old_ptr = tf.arg(0);
    let old_size = tf.arg(1);
    let new_size = tf.arg(2);
    if new_size <= old_size {
        return Ok(old_ptr as i32);
    }
    let new_base = grow_heap(new_size - old_size)?;
    if old_ptr != 0 && old_size > 0 {
        let mut chunk = [0u8; 512];
        let mut copied = 0u32;
        while copied < old_size {
            let want = core::cmp::min(512, (old_size - copied) as usize);
            super::copy_from_user(old_ptr + copied, &mut chunk[..want])?;
            super::copy_to_user(new_base + copied, &chunk[..want])?;
            copied += want as u32;
        }
    }
    Ok(new_base as i32)
}

/// No-op: the bump allocator never reclaims heap space mid-lifetime. Pages
/// are returned to the kernel in bulk when the process exits
/// ([`crate::proc::exit`]'s `free_pgdir` call).
pub fn sys_free(_tf: &TrapFrame) -> KResult<i32> {
    Ok(0)
}
