//! Kernel heap: a fixed-region bitmap allocator for kernel objects.
//! Trades fragmentation for simplicity — this suffices because every
//! large, long-lived allocation happens early in boot and user memory is
//! otherwise managed through paging, not this allocator.
//!
//! One byte per 4 KiB block records `Free`/`Taken`, whether the block has a
//! successor in the same allocation (`HAS_NEXT`), and whether it's the
//! first block of an allocation (`IS_FIRST`). `alloc` rounds a request up
//! to block multiples and finds the first large-enough run of `Free`
//! blocks; `free` walks forward from the `IS_FIRST` block it's given until
//! `HAS_NEXT` is clear.

use bitflags::bitflags;

use crate::error::{Error, KResult};
use crate::lock::spinlock::Spinlock;
use crate::param::PAGE_SIZE;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    struct BlockFlags: u8 {
        const TAKEN    = 1 << 0;
        const HAS_NEXT = 1 << 1;
        const IS_FIRST = 1 << 2;
    }
}

/// How many block-table bytes the allocator needs for `region_size` bytes
/// of heap, not counting the table itself. Exposed so boot code can size
/// the reserved region correctly.
pub const fn table_len_for(region_size: usize) -> usize {
    region_size / PAGE_SIZE
}

struct HeapInner {
    /// Base address of the block table; `None` before `init`.
    table: Option<*mut BlockFlags>,
    blocks_base: usize,
    total_blocks: usize,
}

// SAFETY: access is always through the owning `Spinlock`.
unsafe impl Send for HeapInner {}

pub struct KernelHeap {
    inner: Spinlock<HeapInner>,
}

static HEAP: KernelHeap = KernelHeap {
    inner: Spinlock::new(
        "kheap",
        HeapInner {
            table: None,
            blocks_base: 0,
            total_blocks: 0,
        },
    ),
};

pub fn heap() -> &'static KernelHeap {
    &HEAP
}

impl KernelHeap {
    /// Lays the block table out at the start of `[base, base+size)` and
    /// treats the remainder as allocatable 4 KiB blocks.
    ///
    /// # Safety
    /// `base..base+size` must be unused, writable memory, and `init` must
    /// run exactly once.
    pub unsafe fn init(&self, base: usize, size: usize) {
        let mut inner = self.inner.lock();
        assert!(inner.table.is_none(), "kernel heap already initialized");

        let total_blocks = size / PAGE_SIZE;
        let table_bytes = total_blocks; // one byte per block
        let table_blocks = (table_bytes + PAGE_SIZE - 1) / PAGE_SIZE;
        let blocks_base = base + table_blocks * PAGE_SIZE;
        let usable_blocks = (size - table_blocks * PAGE_SIZE) / PAGE_SIZE;

        let table = base as *mut BlockFlags;
        unsafe {
            core::ptr::write_bytes(table, 0, total_blocks);
        }
        inner.table = Some(table);
        inner.blocks_base = blocks_base;
        inner.total_blocks = usable_blocks;
    }

    fn flags_slice<'a>(inner: &'a HeapInner) -> &'a [BlockFlags] {
        let table = inner.table.expect("kernel heap not initialized");
        unsafe { core::slice::from_raw_parts(table, inner.total_blocks) }
    }

    fn flags_slice_mut<'a>(inner: &'a mut HeapInner) -> &'a mut [BlockFlags] {
        let table = inner.table.expect("kernel heap not initialized");
        unsafe { core::slice::from_raw_parts_mut(table, inner.total_blocks) }
    }

    /// Allocates a run of blocks large enough for `bytes`, returning the
    /// physical address of the first block.
    pub fn alloc(&self, bytes: usize) -> KResult<usize> {
        let needed = (bytes + PAGE_SIZE - 1) / PAGE_SIZE;
        if needed == 0 {
            return Err(Error::InvalidArgument);
        }
        let mut inner = self.inner.lock();
        let blocks_base = inner.blocks_base;
        let flags = Self::flags_slice_mut(&mut inner);

        let mut run_start = None;
        let mut run_len = 0;
        for (i, f) in flags.iter().enumerate() {
            if !f.contains(BlockFlags::TAKEN) {
                if run_start.is_none() {
                    run_start = Some(i);
                }
                run_len += 1;
                if run_len == needed {
                    let start = run_start.unwrap();
                    for (offset, slot) in flags[start..start + needed].iter_mut().enumerate() {
                        *slot = BlockFlags::TAKEN
                            | if offset == 0 { BlockFlags::IS_FIRST } else { BlockFlags::empty() }
                            | if offset + 1 < needed { BlockFlags::HAS_NEXT } else { BlockFlags::empty() };
                    }
                    return Ok(blocks_base + start * PAGE_SIZE);
                }
            } else {
                run_start = None;
                run_len = 0;
            }
        }
        Err(Error::OutOfMemory)
    }

    /// Allocates exactly one 4 KiB block; the common case used by paging.
    pub fn alloc_page(&self) -> KResult<usize> {
        self.alloc(PAGE_SIZE)
    }

    /// Frees the run starting at `addr`, which must be a pointer
    /// previously returned by `alloc`/`alloc_page` — i.e. its block must be
    /// marked `IS_FIRST`. Freeing a non-taken block is an invariant
    /// violation and panics.
    pub fn free(&self, addr: usize) {
        let mut inner = self.inner.lock();
        let blocks_base = inner.blocks_base;
        assert!(addr >= blocks_base, "free: address below heap");
        let start = (addr - blocks_base) / PAGE_SIZE;
        let flags = Self::flags_slice_mut(&mut inner);
        assert!(start < flags.len(), "free: address past heap");
        assert!(
            flags[start].contains(BlockFlags::TAKEN) && flags[start].contains(BlockFlags::IS_FIRST),
            "free: not the first block of a live allocation"
        );

        let mut i = start;
        loop {
            let has_next = flags[i].contains(BlockFlags::HAS_NEXT);
            flags[i] = BlockFlags::empty();
            if !has_next {
                break;
            }
            i += 1;
        }
    }

    pub fn free_page(&self, addr: usize) {
        self.free(addr);
    }

    /// Number of free 4 KiB blocks, used by the `memstat` syscall.
    pub fn free_blocks(&self) -> usize {
        let inner = self.inner.lock();
        Self::flags_slice(&inner)
            .iter()
            .filter(|f| !f.contains(BlockFlags::TAKEN))
            .count()
    }

    pub fn total_blocks(&self) -> usize {
        self.inner.lock().total_blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{alloc_zeroed, Layout};

    fn fresh_heap(region_blocks: usize) -> (KernelHeap, *mut u8, usize) {
        let size = (region_blocks + 16) * PAGE_SIZE;
        let layout = Layout::from_size_align(size, PAGE_SIZE).unwrap();
        let base = unsafe { alloc_zeroed(layout) };
        let heap = KernelHeap {
            inner: Spinlock::new(
                "test-heap",
                HeapInner { table: None, blocks_base: 0, total_blocks: 0 },
            ),
        };
        unsafe { heap.init(base as usize, size) };
        (heap, base, size)
    }

    #[test]
    fn alloc_then_free_returns_exact_block() {
        let (heap, _base, _size) = fresh_heap(8);
        let a = heap.alloc_page().unwrap();
        let free_before = heap.free_blocks();
        heap.free_page(a);
        assert_eq!(heap.free_blocks(), free_before + 1);
    }

    #[test]
    fn alloc_finds_first_fit_run() {
        let (heap, _base, _size) = fresh_heap(8);
        let a = heap.alloc(PAGE_SIZE * 2).unwrap();
        let b = heap.alloc(PAGE_SIZE).unwrap();
        assert_eq!(b, a + 2 * PAGE_SIZE);
    }

    #[test]
    fn out_of_memory_when_region_exhausted() {
        let (heap, _base, size) = fresh_heap(2);
        let total = heap.total_blocks();
        assert!(heap.alloc(total * PAGE_SIZE).is_ok());
        assert_eq!(heap.alloc_page(), Err(Error::OutOfMemory));
        let _ = size;
    }

    #[test]
    #[should_panic(expected = "not the first block")]
    fn freeing_middle_of_a_run_panics() {
        let (heap, _base, _size) = fresh_heap(8);
        let a = heap.alloc(PAGE_SIZE * 3).unwrap();
        heap.free(a + PAGE_SIZE);
    }
}
