//! Virtual file system: path parsing, the mount table, and the top-level
//! `open`/`read`/`write`/`close` entry points the syscall layer drives.
//! Generalizes a single always-mounted root into a longest-prefix mount
//! table so more than one filesystem can be wired in at once.

pub mod file;
pub mod inode;
pub mod ramfs;

use arrayvec::{ArrayString, ArrayVec};
use bitflags::bitflags;

use crate::error::{Error, KResult};
use crate::fs::file::FileTableIndex;
use crate::fs::inode::{FsType, InodeOps};
use crate::lock::spinlock::Spinlock;
use crate::param::{MAXPATH, MAX_MOUNTS};

bitflags! {
    /// `open` mode flags. Only the bits the core interprets
    /// itself; filesystem-specific flags are out of scope.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const RDONLY = 0;
        const WRONLY = 1 << 0;
        const RDWR   = 1 << 1;
        const CREATE = 1 << 2;
    }
}

struct MountPoint {
    prefix: ArrayString<MAXPATH>,
    disk: Option<u32>,
    fs_type: FsType,
    root: &'static dyn InodeOps,
}

struct MountTable {
    mounts: ArrayVec<MountPoint, MAX_MOUNTS>,
}

static MOUNTS: Spinlock<MountTable> = Spinlock::new("mount-table", MountTable { mounts: ArrayVec::new_const() });

/// Registers a mount point. Prefixes are matched longest-first on lookup,
/// so registration order does not matter.
pub fn fs_add_mount_point(prefix: &str, disk: Option<u32>, fs_type: FsType, root: &'static dyn InodeOps) -> KResult<()> {
    let mut table = MOUNTS.lock();
    if table.mounts.iter().any(|m| m.prefix.as_str() == prefix) {
        return Err(Error::InstanceTaken);
    }
    let prefix = ArrayString::from(prefix).map_err(|_| Error::BadPath)?;
    table
        .mounts
        .try_push(MountPoint { prefix, disk, fs_type, root })
        .map_err(|_| Error::Again)
}

/// A parsed path: either a direct drive-token reference (`0:/boot/x`) or an
/// ordinary absolute path resolved through the mount table.
enum ParsedPath<'a> {
    Drive(u32, &'a str),
    Absolute(&'a str),
}

fn parse_path(path: &str) -> KResult<ParsedPath<'_>> {
    if !path.starts_with('/') {
        if let Some(colon) = path.find(':') {
            let (digits, rest) = path.split_at(colon);
            let disk: u32 = digits.parse().map_err(|_| Error::BadPath)?;
            let rest = rest.strip_prefix(':').unwrap_or(rest);
            return Ok(ParsedPath::Drive(disk, rest));
        }
        return Err(Error::BadPath);
    }
    Ok(ParsedPath::Absolute(path))
}

/// Finds the mount whose prefix is the longest match for `path`, returning
/// the mount's root inode and the remaining path relative to it.
fn resolve_mount<'a>(path: &'a str) -> KResult<(&'static dyn InodeOps, &'a str)> {
    let table = MOUNTS.lock();
    let mut best: Option<(&MountPoint, usize)> = None;
    for mount in table.mounts.iter() {
        let prefix = mount.prefix.as_str();
        if path.starts_with(prefix) {
            if best.map(|(_, len)| prefix.len() > len).unwrap_or(true) {
                best = Some((mount, prefix.len()));
            }
        }
    }
    let (mount, len) = best.ok_or(Error::NotFound)?;
    Ok((mount.root, path[len..].trim_start_matches('/')))
}

fn resolve_drive(disk: u32, path: &str) -> KResult<(&'static dyn InodeOps, &str)> {
    let table = MOUNTS.lock();
    let mount = table
        .mounts
        .iter()
        .find(|m| m.disk == Some(disk))
        .ok_or(Error::NotFound)?;
    Ok((mount.root, path.trim_start_matches('/')))
}

/// Walks `rest` (slash-separated, no leading slash) from `root` via
/// repeated `lookup`. An empty `rest` resolves to `root` itself.
fn walk(root: &'static dyn InodeOps, rest: &str) -> KResult<&'static dyn InodeOps> {
    let mut current = root;
    for segment in rest.split('/').filter(|s| !s.is_empty()) {
        current = current.lookup(segment)?;
    }
    Ok(current)
}

/// Splits `rest` into (parent-relative-path, last-segment), for operations
/// that need to act on a directory entry rather than resolve through it
/// (`create`, `mkdir`).
fn split_last(rest: &str) -> KResult<(&str, &str)> {
    let trimmed = rest.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::BadPath);
    }
    match trimmed.rfind('/') {
        Some(idx) => Ok((&trimmed[..idx], &trimmed[idx + 1..])),
        None => Ok(("", trimmed)),
    }
}

fn resolve(path: &str) -> KResult<&'static dyn InodeOps> {
    match parse_path(path)? {
        ParsedPath::Drive(disk, rest) => {
            let (root, rest) = resolve_drive(disk, rest)?;
            walk(root, rest)
        }
        ParsedPath::Absolute(path) => {
            let (root, rest) = resolve_mount(path)?;
            walk(root, rest)
        }
    }
}

/// Resolves `path`, opening (or, with `OpenFlags::CREATE`, creating) the
/// inode, and allocates a slot in the global file table.
pub fn open(path: &str, flags: OpenFlags) -> KResult<FileTableIndex> {
    let inode = match resolve(path) {
        Ok(inode) => inode,
        Err(Error::NotFound) if flags.contains(OpenFlags::CREATE) => {
            let (root, rest) = match parse_path(path)? {
                ParsedPath::Drive(disk, rest) => resolve_drive(disk, rest)?,
                ParsedPath::Absolute(path) => resolve_mount(path)?,
            };
            let (parent_rest, name) = split_last(rest)?;
            let parent = walk(root, parent_rest)?;
            parent.create(name)?
        }
        Err(e) => return Err(e),
    };
    let writable = flags.contains(OpenFlags::WRONLY) || flags.contains(OpenFlags::RDWR);
    let readable = !flags.contains(OpenFlags::WRONLY);
    inode.open(flags.bits())?;
    file::table().alloc(inode, readable, writable)
}

/// Resolves `path` and returns its metadata, without opening a file
/// descriptor. Used by `chdir` to confirm the target is a directory.
pub fn stat(path: &str) -> KResult<crate::fs::inode::Stat> {
    resolve(path)?.stat()
}

/// Creates a directory at `path` (`mkdir`).
pub fn mkdir(path: &str) -> KResult<()> {
    let (root, rest) = match parse_path(path)? {
        ParsedPath::Drive(disk, rest) => resolve_drive(disk, rest)?,
        ParsedPath::Absolute(path) => resolve_mount(path)?,
    };
    let (parent_rest, name) = split_last(rest)?;
    let parent = walk(root, parent_rest)?;
    parent.mkdir(name)?;
    Ok(())
}

/// Wires the static `/` ramfs tree as the root mount and `/dev` as its
/// child. Called once from `kernel_init`, after the heap and before the
/// scheduler starts.
pub fn init() {
    ramfs::init();
    fs_add_mount_point("/", None, FsType::Ramfs, &ramfs::ROOT as &dyn InodeOps)
        .expect("root mount registration cannot fail at boot");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_token_parses_disk_and_rest() {
        match parse_path("0:/boot/kernel").unwrap() {
            ParsedPath::Drive(disk, rest) => {
                assert_eq!(disk, 0);
                assert_eq!(rest, "/boot/kernel");
            }
            _ => panic!("expected drive token"),
        }
    }

    #[test]
    fn absolute_path_without_drive_token() {
        match parse_path("/dev/console").unwrap() {
            ParsedPath::Absolute(p) => assert_eq!(p, "/dev/console"),
            _ => panic!("expected absolute path"),
        }
    }

    #[test]
    fn relative_path_without_colon_is_bad_path() {
        assert!(parse_path("foo/bar").is_err());
    }

    #[test]
    fn split_last_handles_single_segment() {
        assert_eq!(split_last("tmp").unwrap(), ("", "tmp"));
    }

    #[test]
    fn split_last_handles_nested_path() {
        assert_eq!(split_last("tmp/a/b").unwrap(), ("tmp/a", "b"));
    }

    #[test]
    fn split_last_rejects_empty() {
        assert_eq!(split_last(""), Err(Error::BadPath));
        assert_eq!(split_last("/"), Err(Error::BadPath));
    }
}
