//! Compile-time kernel tunables. Kept as one small module so the sizing of
//! every fixed-capacity table in the kernel is visible in a single place.

/// Maximum number of live processes (PID slots 1..=MAX_PROCESSES).
pub const MAX_PROCESSES: usize = 64;

/// Open file descriptors per process.
pub const NOFILE: usize = 16;

/// Entries in the global open-file table (shared, refcounted).
pub const NFILE: usize = 256;

/// Buffers in the block cache.
pub const NBUF: usize = 64;

/// Sector size enforced by the block cache; larger disk sectors are split.
pub const BSIZE: usize = 512;

/// Max mount points.
pub const MAX_MOUNTS: usize = 16;

/// Max path length, including the NUL terminator.
pub const MAXPATH: usize = 128;

/// Max process name length (debugging / `ps`).
pub const MAXPROCNAME: usize = 16;

/// Max argv entries for `exec`.
pub const MAXARG: usize = 32;

/// Physical page size on x86 (non-PAE, 4 KiB pages).
pub const PAGE_SIZE: usize = 4096;

/// Registered disks.
pub const NDEV: usize = 4;

/// Root device index, used when a path has no `N:/` drive prefix and no
/// mount matches more specifically than `/`.
pub const ROOTDEV: u32 = 0;

/// Depth of the mouse and keyboard ring buffers the core drains on behalf
/// of the PS/2 drivers.
pub const INPUT_RING_LEN: usize = 64;

/// Pages reserved above a freshly loaded image for its initial user stack.
pub const USTACK_PAGES: usize = 2;

/// Largest executable image `exec`/`create_process` will read into the
/// kernel-side load buffer before mapping it into a process.
pub const MAX_EXEC_IMAGE: usize = 64 * 1024;

// These tunables feed page-granular arithmetic all over the paging and
// block-cache code; a non-power-of-two or a BSIZE bigger than a page would
// silently break that math rather than fail loudly at the call site.
static_assertions::const_assert!(PAGE_SIZE.is_power_of_two());
static_assertions::const_assert!(BSIZE <= PAGE_SIZE);
static_assertions::const_assert!(MAX_EXEC_IMAGE % PAGE_SIZE == 0);
