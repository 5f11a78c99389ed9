//! Block buffer cache: a fixed pool of 512-byte sector buffers on an LRU
//! list, with prev/next LRU links stored as indices into a fixed array
//! rather than pointers, and the device abstracted behind the
//! [`crate::devices::DiskDevice`] trait object instead of a concrete disk
//! driver.
//!
//! Split into two locks (buffer-cache lock before any per-buffer
//! sleeplock): `CACHE` guards only bookkeeping (which slot holds which
//! block, LRU order, refcounts); `BUFFERS[i]`'s own sleeplock guards that
//! slot's 512-byte payload, so two threads blocked on disk I/O for two
//! different blocks never wait on each other.

use bitflags::bitflags;

use crate::devices::DiskDevice;
use crate::error::{Error, KResult};
use crate::lock::sleeplock::{Sleeplock, SleeplockGuard};
use crate::lock::spinlock::Spinlock;
use crate::param::{BSIZE, NBUF, NDEV};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    struct BufFlags: u8 {
        const VALID = 1 << 0;
        const DIRTY = 1 << 1;
    }
}

struct BufMeta {
    dev: u32,
    blockno: u32,
    flags: BufFlags,
    refcount: usize,
    prev: usize,
    next: usize,
}

impl BufMeta {
    const fn empty(index: usize) -> Self {
        Self { dev: 0, blockno: 0, flags: BufFlags::empty(), refcount: 0, prev: index, next: index }
    }
}

struct Cache {
    metas: [BufMeta; NBUF],
    /// Index of the most-recently-used slot; its `prev` link is the
    /// least-recently-used, the eviction candidate.
    head: usize,
}

impl Cache {
    /// A slot matches a cache hit either because it still holds valid data
    /// from a previous load, or because another thread's `bread` is in the
    /// middle of loading this exact block right now (`refcount > 0`, not
    /// yet `VALID`) — the second thread should wait on that load rather
    /// than start a redundant one.
    fn find(&self, dev: u32, blockno: u32) -> Option<usize> {
        self.metas
            .iter()
            .position(|m| m.dev == dev && m.blockno == blockno && (m.flags.contains(BufFlags::VALID) || m.refcount > 0))
    }

    fn evict_candidate(&self) -> Option<usize> {
        let mut idx = self.metas[self.head].prev;
        for _ in 0..NBUF {
            if self.metas[idx].refcount == 0 {
                return Some(idx);
            }
            idx = self.metas[idx].prev;
        }
        None
    }

    fn move_to_mru(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        let (prev, next) = (self.metas[idx].prev, self.metas[idx].next);
        self.metas[prev].next = next;
        self.metas[next].prev = prev;

        let old_head = self.head;
        let old_tail = self.metas[old_head].prev;
        self.metas[idx].next = old_head;
        self.metas[idx].prev = old_tail;
        self.metas[old_tail].next = idx;
        self.metas[old_head].prev = idx;
        self.head = idx;
    }
}

static CACHE: Spinlock<Cache> = Spinlock::new("bcache", {
    const EMPTY: BufMeta = BufMeta::empty(0);
    let mut metas = [EMPTY; NBUF];
    let mut i = 0;
    while i < NBUF {
        metas[i] = BufMeta::empty(i);
        i += 1;
    }
    Cache { metas, head: 0 }
});

static BUFFERS: [Sleeplock<[u8; BSIZE]>; NBUF] = [const { Sleeplock::new("buf", [0u8; BSIZE]) }; NBUF];

/// Wires a device index to a concrete driver. A buffer's `dev` field
/// indexes this table.
static DEVICES: Spinlock<[Option<&'static dyn DiskDevice>; NDEV]> = Spinlock::new("bio-devices", [None; NDEV]);

pub fn register_device(dev: u32, disk: &'static dyn DiskDevice) {
    DEVICES.lock()[dev as usize] = Some(disk);
}

fn device(dev: u32) -> KResult<&'static dyn DiskDevice> {
    DEVICES.lock().get(dev as usize).copied().flatten().ok_or(Error::Io)
}

/// A handle on a cached block, held for as long as the caller is reading
/// or writing it. Holds the slot's sleeplock, so no other thread can
/// observe a torn read. Dropping it without calling [`brelse`] would leak
/// the sleeplock forever; there is no `Drop` impl on purpose; [`brelse`]
/// is the only way to give one back.
pub struct BufGuard {
    index: usize,
    payload: SleeplockGuard<'static, [u8; BSIZE]>,
}

impl BufGuard {
    pub fn bytes(&self) -> &[u8; BSIZE] {
        &self.payload
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; BSIZE] {
        &mut self.payload
    }
}

/// Finds or loads the buffer for `(dev, blockno)`.
pub fn bread(dev: u32, blockno: u32) -> KResult<BufGuard> {
    let index = {
        let mut cache = CACHE.lock();
        if let Some(idx) = cache.find(dev, blockno) {
            cache.metas[idx].refcount += 1;
            cache.move_to_mru(idx);
            idx
        } else {
            let idx = cache.evict_candidate().ok_or(Error::Again)?;
            if cache.metas[idx].flags.contains(BufFlags::DIRTY) {
                let (old_dev, old_blockno) = (cache.metas[idx].dev, cache.metas[idx].blockno);
                drop(cache);
                let payload = *BUFFERS[idx].lock();
                device(old_dev)?.write_block(old_blockno, 1, &payload)?;
                cache = CACHE.lock();
                cache.metas[idx].flags.remove(BufFlags::DIRTY);
            }
            cache.metas[idx].dev = dev;
            cache.metas[idx].blockno = blockno;
            cache.metas[idx].flags = BufFlags::empty();
            cache.metas[idx].refcount = 1;
            cache.move_to_mru(idx);
            idx
        }
    };

    // Acquiring this can block — another thread may already be loading
    // this exact block (same `index`, refcount bumped, not yet VALID).
    let mut payload = BUFFERS[index].lock();
    let needs_load = !CACHE.lock().metas[index].flags.contains(BufFlags::VALID);
    if needs_load {
        device(dev)?.read_block(blockno, 1, &mut *payload)?;
        CACHE.lock().metas[index].flags.insert(BufFlags::VALID);
    }
    Ok(BufGuard { index, payload })
}

/// Marks `buf` dirty and writes it through to the device immediately
/// (synchronous for now).
pub fn bwrite(buf: &BufGuard) -> KResult<()> {
    let (dev, blockno) = {
        let mut cache = CACHE.lock();
        cache.metas[buf.index].flags.insert(BufFlags::DIRTY);
        (cache.metas[buf.index].dev, cache.metas[buf.index].blockno)
    };
    device(dev)?.write_block(blockno, 1, buf.bytes())?;
    CACHE.lock().metas[buf.index].flags.remove(BufFlags::DIRTY);
    Ok(())
}

/// Releases the reference taken by `bread`. Dropping `buf` here releases
/// its sleeplock and moves the slot to MRU.
pub fn brelse(buf: BufGuard) {
    let mut cache = CACHE.lock();
    cache.metas[buf.index].refcount -= 1;
    cache.move_to_mru(buf.index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct MemDisk {
        sectors: StdMutex<std::vec::Vec<[u8; BSIZE]>>,
    }

    impl DiskDevice for MemDisk {
        fn read_block(&self, lba: u32, _count: u32, buf: &mut [u8]) -> KResult<()> {
            let sectors = self.sectors.lock().unwrap();
            buf[..BSIZE].copy_from_slice(&sectors[lba as usize]);
            Ok(())
        }
        fn write_block(&self, lba: u32, _count: u32, buf: &[u8]) -> KResult<()> {
            let mut sectors = self.sectors.lock().unwrap();
            sectors[lba as usize].copy_from_slice(&buf[..BSIZE]);
            Ok(())
        }
        fn sector_size(&self) -> u32 {
            BSIZE as u32
        }
    }

    #[test]
    fn lru_links_form_a_full_cycle() {
        let cache = CACHE.lock();
        let mut idx = cache.head;
        let mut count = 0;
        loop {
            idx = cache.metas[idx].next;
            count += 1;
            if idx == cache.head || count > NBUF {
                break;
            }
        }
        assert_eq!(count, NBUF);
    }

    #[test]
    fn bread_bwrite_round_trip() {
        static DISK: MemDisk = MemDisk { sectors: StdMutex::new(std::vec::Vec::new()) };
        *DISK.sectors.lock().unwrap() = std::vec![[0u8; BSIZE]; 4];
        register_device(1, &DISK);

        let mut buf = bread(1, 2).unwrap();
        buf.bytes_mut()[0] = 0xAB;
        bwrite(&buf).unwrap();
        brelse(buf);

        let buf2 = bread(1, 2).unwrap();
        assert_eq!(buf2.bytes()[0], 0xAB);
        brelse(buf2);
    }
}
