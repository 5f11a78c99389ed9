//! In-memory filesystem backing `/dev` and scratch trees like `/tmp`.
//! Every node is a `'static` object living in one of the fixed pools below
//! — no heap allocation, matching the kernel heap's own scope (large
//! long-lived allocations only). `create`/`mkdir` hand out slots from a
//! small scratch pool rather than allocating unboundedly; a full pool
//! returns `Error::Again`.

use arrayvec::{ArrayString, ArrayVec};

use crate::error::{Error, KResult};
use crate::fs::inode::{FsType, InodeOps, InodeType, Stat};
use crate::lock::spinlock::Spinlock;

const NAME_LEN: usize = 28;
const MAX_CHILDREN: usize = 16;
const MAX_FILE_BYTES: usize = 4096;
const SCRATCH_FILES: usize = 16;
const SCRATCH_DIRS: usize = 8;

/// A plain in-memory file: a length-prefixed fixed byte buffer.
pub struct RamFile {
    data: Spinlock<(usize, [u8; MAX_FILE_BYTES])>,
}

impl RamFile {
    const fn new() -> Self {
        Self { data: Spinlock::new("ramfile", (0, [0; MAX_FILE_BYTES])) }
    }
}

impl InodeOps for RamFile {
    fn inode_type(&self) -> InodeType {
        InodeType::File
    }

    fn fs_type(&self) -> FsType {
        FsType::Ramfs
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> KResult<usize> {
        let guard = self.data.lock();
        let (len, bytes) = &*guard;
        let offset = offset as usize;
        if offset >= *len {
            return Ok(0);
        }
        let n = core::cmp::min(buf.len(), len - offset);
        buf[..n].copy_from_slice(&bytes[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> KResult<usize> {
        let mut guard = self.data.lock();
        let offset = offset as usize;
        if offset + buf.len() > MAX_FILE_BYTES {
            return Err(Error::OutOfMemory);
        }
        let (len, bytes) = &mut *guard;
        bytes[offset..offset + buf.len()].copy_from_slice(buf);
        *len = core::cmp::max(*len, offset + buf.len());
        Ok(buf.len())
    }

    fn stat(&self) -> KResult<Stat> {
        let guard = self.data.lock();
        Ok(Stat { size: guard.0 as u64, is_dir: false })
    }
}

/// A directory: a fixed-capacity name -> inode map. `lookup` is a linear
/// scan, fine at this scale (`MAX_CHILDREN` = 16).
pub struct RamDir {
    children: Spinlock<ArrayVec<(ArrayString<NAME_LEN>, &'static dyn InodeOps), MAX_CHILDREN>>,
}

impl RamDir {
    const fn new() -> Self {
        Self { children: Spinlock::new("ramdir", ArrayVec::new_const()) }
    }

    /// Wires a statically-allocated child into this directory at boot.
    /// Panics (not `KResult`) because a full static table is a build-time
    /// misconfiguration, not a runtime condition.
    pub fn add_static_child(&self, name: &str, inode: &'static dyn InodeOps) {
        let mut children = self.children.lock();
        let name = ArrayString::from(name).expect("ramfs child name too long");
        children.try_push((name, inode)).expect("ramfs directory full");
    }
}

impl InodeOps for RamDir {
    fn inode_type(&self) -> InodeType {
        InodeType::Directory
    }

    fn fs_type(&self) -> FsType {
        FsType::Ramfs
    }

    fn stat(&self) -> KResult<Stat> {
        Ok(Stat { size: 0, is_dir: true })
    }

    fn lookup(&self, name: &str) -> KResult<&'static dyn InodeOps> {
        let children = self.children.lock();
        children
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, inode)| *inode)
            .ok_or(Error::NotFound)
    }

    fn create(&self, name: &str) -> KResult<&'static dyn InodeOps> {
        let mut children = self.children.lock();
        if children.iter().any(|(n, _)| n.as_str() == name) {
            return Err(Error::InstanceTaken);
        }
        let file = alloc_scratch_file()?;
        let name = ArrayString::from(name).map_err(|_| Error::BadPath)?;
        children.try_push((name, file)).map_err(|_| Error::Again)?;
        Ok(file)
    }

    fn mkdir(&self, name: &str) -> KResult<&'static dyn InodeOps> {
        let mut children = self.children.lock();
        if children.iter().any(|(n, _)| n.as_str() == name) {
            return Err(Error::InstanceTaken);
        }
        let dir = alloc_scratch_dir()?;
        let name = ArrayString::from(name).map_err(|_| Error::BadPath)?;
        children.try_push((name, dir)).map_err(|_| Error::Again)?;
        Ok(dir)
    }

    fn create_device(&self, name: &str, dev: &'static dyn InodeOps) -> KResult<()> {
        let mut children = self.children.lock();
        if children.iter().any(|(n, _)| n.as_str() == name) {
            return Err(Error::InstanceTaken);
        }
        let name = ArrayString::from(name).map_err(|_| Error::BadPath)?;
        children.try_push((name, dev)).map_err(|_| Error::Again)?;
        Ok(())
    }
}

/// A character device node, forwarding writes to the console sink. Reads
/// are unsupported until a keyboard ring buffer is wired in by the
/// platform init code.
pub struct ConsoleNode;

impl InodeOps for ConsoleNode {
    fn inode_type(&self) -> InodeType {
        InodeType::Device
    }

    fn fs_type(&self) -> FsType {
        FsType::Ramfs
    }

    fn write(&self, _offset: u64, buf: &[u8]) -> KResult<usize> {
        for &b in buf {
            crate::console::putchar_raw(b);
        }
        Ok(buf.len())
    }

    fn stat(&self) -> KResult<Stat> {
        Ok(Stat { size: 0, is_dir: false })
    }
}

// Files/dirs themselves live outside the lock (only the bitmap does) since
// `InodeOps` requires `Sync` and each slot's own internal spinlock already
// serializes its data.
static SCRATCH_FILE_SLOTS: [RamFile; SCRATCH_FILES] = [const { RamFile::new() }; SCRATCH_FILES];
static SCRATCH_FILE_USED: Spinlock<[bool; SCRATCH_FILES]> = Spinlock::new("ramfs-scratch-files", [false; SCRATCH_FILES]);
static SCRATCH_DIR_USED: Spinlock<[bool; SCRATCH_DIRS]> = Spinlock::new("ramfs-scratch-dirs", [false; SCRATCH_DIRS]);
static SCRATCH_DIR_SLOTS: [RamDir; SCRATCH_DIRS] = [const { RamDir::new() }; SCRATCH_DIRS];

fn alloc_scratch_file() -> KResult<&'static dyn InodeOps> {
    let mut used = SCRATCH_FILE_USED.lock();
    let idx = used.iter().position(|u| !u).ok_or(Error::Again)?;
    used[idx] = true;
    Ok(&SCRATCH_FILE_SLOTS[idx])
}

fn alloc_scratch_dir() -> KResult<&'static dyn InodeOps> {
    let mut used = SCRATCH_DIR_USED.lock();
    let idx = used.iter().position(|u| !u).ok_or(Error::Again)?;
    used[idx] = true;
    Ok(&SCRATCH_DIR_SLOTS[idx])
}

pub static ROOT: RamDir = RamDir::new();
pub static DEV: RamDir = RamDir::new();
pub static CONSOLE: ConsoleNode = ConsoleNode;

/// Wires the static `/` and `/dev` trees together. Called once from
/// `fs::init`.
pub fn init() {
    ROOT.add_static_child("dev", &DEV);
    DEV.add_static_child("console", &CONSOLE);
}
