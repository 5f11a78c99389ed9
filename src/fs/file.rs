//! Per-process file descriptor slots and the shared, refcounted open-file
//! table they index into. A process never owns a `File` directly, only an
//! index, so `fork` duplication is "copy the index array, bump
//! refcounts" rather than a deep clone.

use crate::error::{Error, KResult};
use crate::fs::inode::{InodeOps, SeekWhence};
use crate::lock::spinlock::Spinlock;
use crate::param::NFILE;

/// An index into the global open-file table. Stored in a process's fd
/// array (`Option<FileTableIndex>` per slot); `None` means the fd is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTableIndex(usize);

struct OpenFile {
    inode: &'static dyn InodeOps,
    offset: u64,
    readable: bool,
    writable: bool,
    refcount: usize,
}

struct FileTable {
    slots: [Option<OpenFile>; NFILE],
}

pub struct FileTableHandle {
    inner: Spinlock<FileTable>,
}

// A table of `None`s, const-initialized without relying on `Default`
// (trait objects aren't `Default`).
const NONE_SLOT: Option<OpenFile> = None;

static TABLE: FileTableHandle = FileTableHandle {
    inner: Spinlock::new("ftable", FileTable { slots: [NONE_SLOT; NFILE] }),
};

pub fn table() -> &'static FileTableHandle {
    &TABLE
}

impl FileTableHandle {
    /// Allocates a table entry for a freshly opened inode. Returns the
    /// index the caller stores in the process's fd array.
    pub fn alloc(&self, inode: &'static dyn InodeOps, readable: bool, writable: bool) -> KResult<FileTableIndex> {
        let mut table = self.inner.lock();
        let idx = table
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::Again)?;
        table.slots[idx] = Some(OpenFile { inode, offset: 0, readable, writable, refcount: 1 });
        Ok(FileTableIndex(idx))
    }

    /// Bumps the refcount on `fork`'s descriptor-array duplication.
    pub fn dup(&self, idx: FileTableIndex) {
        let mut table = self.inner.lock();
        if let Some(f) = &mut table.slots[idx.0] {
            f.refcount += 1;
        }
    }

    /// Drops one reference; frees the slot (calling the inode's `close`)
    /// once the refcount reaches zero.
    pub fn close(&self, idx: FileTableIndex) {
        let mut table = self.inner.lock();
        let free = if let Some(f) = &mut table.slots[idx.0] {
            f.refcount -= 1;
            f.refcount == 0
        } else {
            false
        };
        if free {
            let f = table.slots[idx.0].take().unwrap();
            f.inode.close();
        }
    }

    pub fn read(&self, idx: FileTableIndex, buf: &mut [u8]) -> KResult<usize> {
        let (inode, offset, readable) = {
            let table = self.inner.lock();
            let f = table.slots[idx.0].as_ref().ok_or(Error::InvalidArgument)?;
            (f.inode, f.offset, f.readable)
        };
        if !readable {
            return Err(Error::InvalidArgument);
        }
        let n = inode.read(offset, buf)?;
        let mut table = self.inner.lock();
        if let Some(f) = &mut table.slots[idx.0] {
            f.offset += n as u64;
        }
        Ok(n)
    }

    pub fn write(&self, idx: FileTableIndex, buf: &[u8]) -> KResult<usize> {
        let (inode, offset, writable) = {
            let table = self.inner.lock();
            let f = table.slots[idx.0].as_ref().ok_or(Error::InvalidArgument)?;
            (f.inode, f.offset, f.writable)
        };
        if !writable {
            return Err(Error::ReadOnly);
        }
        let n = inode.write(offset, buf)?;
        let mut table = self.inner.lock();
        if let Some(f) = &mut table.slots[idx.0] {
            f.offset += n as u64;
        }
        Ok(n)
    }

    pub fn seek(&self, idx: FileTableIndex, offset: i64, whence: SeekWhence) -> KResult<u64> {
        let mut table = self.inner.lock();
        let f = table.slots[idx.0].as_mut().ok_or(Error::InvalidArgument)?;
        let stat = f.inode.stat()?;
        let base = match whence {
            SeekWhence::Start => 0,
            SeekWhence::Current => f.offset,
            SeekWhence::End => stat.size,
        };
        let new_offset = base as i64 + offset;
        if new_offset < 0 {
            return Err(Error::InvalidArgument);
        }
        f.offset = new_offset as u64;
        Ok(f.offset)
    }

    pub fn stat(&self, idx: FileTableIndex) -> KResult<crate::fs::inode::Stat> {
        let table = self.inner.lock();
        let f = table.slots[idx.0].as_ref().ok_or(Error::InvalidArgument)?;
        f.inode.stat()
    }

    pub fn ioctl(&self, idx: FileTableIndex, cmd: u32, arg: usize) -> KResult<i32> {
        let table = self.inner.lock();
        let f = table.slots[idx.0].as_ref().ok_or(Error::InvalidArgument)?;
        f.inode.ioctl(cmd, arg)
    }
}

/// Count of live entries, exposed for `memstat`/debugging.
pub fn live_count() -> usize {
    let table = TABLE.inner.lock();
    table.slots.iter().filter(|s| s.is_some()).count()
}
