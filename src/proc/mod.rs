//! Process and thread table: lifecycle, pid allocation, parent/child
//! bookkeeping, and the sleep/wakeup rendezvous.
//!
//! The process table and the "currently running thread" are the same piece
//! of global mutable state, guarded by one spinlock (`PTABLE`). That lock
//! is deliberately held *across* the context switch in and out of the
//! scheduler (see [`scheduler::sched`]) — a well-known idiom, not an
//! oversight: on a single logical CPU only one execution context is ever
//! actually running, so the lock's "held" bit can legitimately outlive the
//! stack frame that acquired it.

pub mod scheduler;
pub mod sleep;

use arrayvec::{ArrayString, ArrayVec};

use crate::arch::x86::paging::{self, PageDirectory};
use crate::arch::x86::{context, Context, TrapFrame};
use crate::error::{Error, KResult};
use crate::fs::file::FileTableIndex;
use crate::lock::spinlock::Spinlock;
use crate::lock::RawLock;
use crate::param::{MAXARG, MAXPATH, MAXPROCNAME, MAX_PROCESSES, NOFILE, PAGE_SIZE, USTACK_PAGES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Empty,
    Loading,
    Running,
    Zombie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Unused,
    Running,
    Ready,
    Sleeping,
    Blocked,
    Stopped,
    Paused,
}

/// Kernel stack size: 2 pages.
pub const KSTACK_PAGES: usize = 2;
pub const KSTACK_SIZE: usize = KSTACK_PAGES * crate::param::PAGE_SIZE;

/// The `fxsave`/`fxrstor` area: 512 bytes, 16-byte aligned. One canonical
/// thread type, no separate task/thread split.
#[repr(align(16))]
#[derive(Clone, Copy)]
pub struct FpuState {
    pub bytes: [u8; 512],
}

impl FpuState {
    const fn new() -> Self {
        Self { bytes: [0; 512] }
    }
}

/// A process's single thread of execution.
pub struct Thread {
    pub state: ThreadState,
    /// Saved registers and stack pointer `swtch` resumes into. For a
    /// not-yet-run thread, `context.esp` points just below a `TrapFrame`
    /// written onto the top of `kstack` (see `process_load`/`fork`), so the
    /// first switch into it runs straight through `trapret` into user mode.
    pub context: Context,
    /// Base virtual address of the kernel stack.
    pub kstack: usize,
    /// Channel this thread is sleeping on, or `None` if not asleep.
    pub chan: Option<usize>,
    /// Tick at which a timed sleep should wake regardless of `wakeup`, or
    /// `None` for an indefinite sleep.
    pub wake_tick: Option<u64>,
    pub fpu: FpuState,
}

impl Thread {
    const fn unused() -> Self {
        Self {
            state: ThreadState::Unused,
            context: Context { edi: 0, esi: 0, ebx: 0, ebp: 0, eip: 0, esp: 0 },
            kstack: 0,
            chan: None,
            wake_tick: None,
            fpu: FpuState::new(),
        }
    }

    pub fn kstack_top(&self) -> usize {
        self.kstack + KSTACK_SIZE
    }
}

/// A process: a page directory, a file-descriptor table, and its one
/// thread.
pub struct Process {
    pub state: ProcState,
    pub pid: i32,
    /// 0 means no parent (the init/idle process).
    pub parent: i32,
    pub name: ArrayString<MAXPROCNAME>,
    pub priority: i32,
    pub exit_code: i32,
    pub killed: bool,
    pub pagedir: Option<*mut PageDirectory>,
    pub cwd: ArrayString<MAXPATH>,
    /// Index into the global open-file table per slot, or `None` if the fd
    /// is free. Refcounting lives on the file-table entry itself.
    pub files: [Option<FileTableIndex>; NOFILE],
    /// Size of the user image + heap, in bytes; drives `alloc_user_vm`.
    pub sz: usize,
    /// Argument strings the process was started or last `exec`'d with,
    /// fetched back by the `get_program_arguments` syscall.
    pub args: ArrayVec<ArrayString<MAXPATH>, MAXARG>,
    pub thread: Thread,
}

// Raw pointers to page directories cross thread "ownership" only inside
// the ptable lock's critical sections.
unsafe impl Send for Process {}

impl Process {
    const fn empty() -> Self {
        Self {
            state: ProcState::Empty,
            pid: 0,
            parent: 0,
            name: ArrayString::new_const(),
            priority: 1,
            exit_code: 0,
            killed: false,
            pagedir: None,
            cwd: ArrayString::new_const(),
            files: [None; NOFILE],
            sz: 0,
            args: ArrayVec::new_const(),
            thread: Thread::unused(),
        }
    }
}

pub struct ProcTable {
    procs: [Process; MAX_PROCESSES],
    /// Index into `procs` of the thread currently running, or `None` when
    /// the scheduler itself has control.
    current: Option<usize>,
    next_pid: i32,
    ticks: u64,
    /// Saved context the scheduler resumes into when a thread yields the
    /// CPU back.
    scheduler_context: Context,
    /// Index scanned last by the round-robin picker, for fairness (FIFO
    /// within a priority band).
    last_scheduled: usize,
}

impl ProcTable {
    const fn new() -> Self {
        const EMPTY: Process = Process::empty();
        Self {
            procs: [EMPTY; MAX_PROCESSES],
            current: None,
            next_pid: 1,
            ticks: 0,
            scheduler_context: Context { edi: 0, esi: 0, ebx: 0, ebp: 0, eip: 0, esp: 0 },
            last_scheduled: MAX_PROCESSES - 1,
        }
    }

    fn alloc_pid(&mut self) -> i32 {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    fn find_empty_slot(&self) -> Option<usize> {
        self.procs.iter().position(|p| p.state == ProcState::Empty)
    }

    fn find_by_pid(&self, pid: i32) -> Option<usize> {
        self.procs.iter().position(|p| p.pid == pid && p.state != ProcState::Empty)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn process(&self, idx: usize) -> &Process {
        &self.procs[idx]
    }

    pub fn process_mut(&mut self, idx: usize) -> &mut Process {
        &mut self.procs[idx]
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

pub static PTABLE: Spinlock<ProcTable> = Spinlock::new("ptable", ProcTable::new());

/// Must be called once during boot, before the scheduler loop starts.
pub unsafe fn init() {
    // Slots start `Empty`; nothing else to do until the first spawn.
}

/// PID of the calling thread, or `None` if called outside any thread's
/// context (boot code, the idle scheduler loop itself).
pub fn current_pid() -> Option<i32> {
    let pt = PTABLE.lock();
    pt.current_index().map(|idx| pt.process(idx).pid)
}

/// Allocates a new process slot, a kernel stack, and a page directory
/// holding only the kernel mapping. Used by both `process_load` (first
/// process / spawn) and as the first half of `fork`.
fn alloc_process(name: &str, parent: i32, priority: i32) -> KResult<usize> {
    let kstack_pa = crate::kalloc::heap().alloc(KSTACK_SIZE)?;
    let pgdir = match crate::arch::x86::paging::new_pagedir() {
        Ok(pd) => pd,
        Err(e) => {
            crate::kalloc::heap().free(kstack_pa);
            return Err(e);
        }
    };

    let mut pt = PTABLE.lock();
    let idx = match pt.find_empty_slot() {
        Some(i) => i,
        None => {
            drop(pt);
            crate::kalloc::heap().free(kstack_pa);
            crate::arch::x86::paging::free_pgdir(pgdir, 0);
            return Err(Error::Again);
        }
    };
    let pid = pt.alloc_pid();
    let proc = &mut pt.procs[idx];
    *proc = Process::empty();
    proc.state = ProcState::Loading;
    proc.pid = pid;
    proc.parent = parent;
    proc.priority = priority;
    let _ = proc.name.try_push_str(name);
    let _ = proc.cwd.try_push_str("/");
    proc.pagedir = Some(pgdir);
    proc.thread.kstack = crate::arch::x86::paging::p2v(kstack_pa);
    // thread.state stays Unused here: the scheduler only ever looks at
    // Ready threads, and this slot's context/trap frame aren't built yet.
    // The caller (process_load / fork) seeds both and flips it to Ready.
    Ok(idx)
}

/// Maps `image` (ELF, or, if it doesn't parse as one, a flat binary loaded
/// at address 0) into `pgdir`, reserving `USTACK_PAGES` above it for the
/// initial user stack. Returns (entry point, stack top, total size).
fn load_image(pgdir: &mut PageDirectory, image: &[u8]) -> KResult<(u32, u32, usize)> {
    let entry = match crate::elf::parse_header(image) {
        Ok(header) => {
            let mut sz = 0usize;
            crate::elf::for_each_load_segment(image, &header, |ph| {
                let seg_end = ph.vaddr as usize + ph.memsz as usize;
                sz = paging::alloc_user_vm(pgdir, sz, seg_end)?;
                let file_bytes = &image[ph.offset as usize..ph.offset as usize + ph.filesz as usize];
                paging::copy_to_user(pgdir, ph.vaddr as usize, file_bytes)
            })?;
            (header.entry, sz)
        }
        Err(_) => {
            let sz = paging::alloc_user_vm(pgdir, 0, image.len())?;
            paging::copy_to_user(pgdir, 0, image)?;
            (0, sz)
        }
    };
    let (entry_point, base_sz) = entry;
    let stack_top = paging::alloc_user_vm(pgdir, base_sz, base_sz + USTACK_PAGES * PAGE_SIZE)?;
    Ok((entry_point, stack_top as u32, stack_top))
}

fn build_trapframe(entry_point: u32, user_stack_top: u32) -> TrapFrame {
    let mut tf = TrapFrame::default();
    tf.cs = crate::arch::x86::gdt::USER_CODE_SEL as u32;
    tf.ds = crate::arch::x86::gdt::USER_DATA_SEL as u32;
    tf.es = tf.ds;
    tf.fs = tf.ds;
    tf.gs = tf.ds;
    tf.ss = tf.ds;
    tf.eip = entry_point;
    tf.esp = user_stack_top;
    tf.eflags = 0x200; // IF=1: interrupts enabled on return to user mode
    tf
}

/// Loads `image` as a freshly-built process image (`create_process`; also
/// the init process's entry into the table). The actual ELF/flat parsing
/// and user-stack setup live in [`crate::elf`] and
/// [`crate::arch::x86::paging`]; this function owns the process-table
/// bookkeeping around that step.
pub fn process_load(name: &str, image: &[u8], args: &[&str]) -> KResult<i32> {
    let idx = alloc_process(name, 0, 1)?;
    let pgdir = PTABLE.lock().procs[idx].pagedir.expect("process_load: no pagedir");

    match load_image(unsafe { &mut *pgdir }, image) {
        Ok((entry_point, user_stack_top, image_size)) => {
            let mut pt = PTABLE.lock();
            let proc = &mut pt.procs[idx];
            proc.sz = image_size;
            for a in args.iter().take(MAXARG) {
                let mut s = ArrayString::new();
                let _ = s.try_push_str(a);
                let _ = proc.args.try_push(s);
            }
            let tf = build_trapframe(entry_point, user_stack_top);
            let kstack_top = proc.thread.kstack_top();
            let trapret = crate::trap::TRAP_RETURN_ADDR.load(core::sync::atomic::Ordering::Relaxed);
            // SAFETY: this slot's kstack was just allocated by
            // alloc_process and isn't referenced by any other thread yet.
            proc.thread.context = unsafe { context::seed_kernel_stack(kstack_top, tf, trapret) };
            proc.thread.state = ThreadState::Ready;
            proc.state = ProcState::Running;
            Ok(proc.pid)
        }
        Err(e) => {
            let mut pt = PTABLE.lock();
            if let Some(pgdir) = pt.procs[idx].pagedir.take() {
                paging::free_pgdir(pgdir, 0);
            }
            pt.procs[idx] = Process::empty();
            Err(e)
        }
    }
}

/// Replaces the calling process's address space in place with `image`
/// (`exec`), keeping its pid, open files, and parent. Builds the new
/// address space fully before tearing down the old one, so a load failure
/// (bad ELF, out of memory) leaves the caller running its previous image
/// instead of half-torn-down, matching the classic exec failure contract.
///
/// `tf` is the caller's live, on-stack trap frame — the same one the
/// syscall stub will `iret` through when `dispatch` returns. Overwriting it
/// in place is what makes `exec` take effect: there is no separate copy to
/// reconcile it with.
pub fn exec(tf: &mut TrapFrame, image: &[u8], args: &[&str]) -> KResult<()> {
    let new_pgdir = paging::new_pagedir()?;
    let (entry_point, user_stack_top, image_size) = match load_image(unsafe { &mut *new_pgdir }, image) {
        Ok(v) => v,
        Err(e) => {
            paging::free_pgdir(new_pgdir, 0);
            return Err(e);
        }
    };

    let mut pt = PTABLE.lock();
    let idx = pt.current_index().ok_or(Error::InvalidArgument)?;
    let old_pgdir = pt.procs[idx].pagedir.take();
    let old_sz = pt.procs[idx].sz;

    pt.procs[idx].pagedir = Some(new_pgdir);
    pt.procs[idx].sz = image_size;
    pt.procs[idx].args.clear();
    for a in args.iter().take(MAXARG) {
        let mut s = ArrayString::new();
        let _ = s.try_push_str(a);
        let _ = pt.procs[idx].args.try_push(s);
    }
    *tf = build_trapframe(entry_point, user_stack_top);
    paging::switch_pgdir(pt.procs[idx].pagedir.unwrap());
    drop(pt);

    if let Some(old) = old_pgdir {
        paging::free_pgdir(old, old_sz);
    }
    Ok(())
}

/// Duplicates the caller into a new process. Returns the child's PID to
/// the parent; the child observes 0 through its own trap-frame return
/// value once scheduled.
///
/// `parent_tf` is the caller's live trap frame — the image the child's own
/// first trap frame is copied from, since a forked child resumes in user
/// mode exactly where its parent was about to.
pub fn fork(parent_tf: &TrapFrame) -> KResult<i32> {
    let (parent_idx, parent_pid, size, name, priority) = {
        let pt = PTABLE.lock();
        let idx = pt.current_index().ok_or(Error::Again)?;
        let p = pt.process(idx);
        (idx, p.pid, p.sz, p.name, p.priority)
    };

    let child_idx = alloc_process(name.as_str(), parent_pid, priority)?;

    let mut pt = PTABLE.lock();
    let parent_pgdir = pt.procs[parent_idx].pagedir.expect("fork: parent has no pagedir");
    let child_pgdir = crate::arch::x86::paging::clone_pgdir(unsafe { &mut *parent_pgdir }, size)?;
    // Free the placeholder directory allocated by `alloc_process` in favor
    // of the cloned one.
    let placeholder = pt.procs[child_idx].pagedir.take().unwrap();
    crate::arch::x86::paging::free_pgdir(placeholder, 0);
    pt.procs[child_idx].pagedir = Some(child_pgdir);
    pt.procs[child_idx].sz = size;

    let mut child_tf = *parent_tf;
    child_tf.set_return_value(0);
    let kstack_top = pt.procs[child_idx].thread.kstack_top();
    let trapret = crate::trap::TRAP_RETURN_ADDR.load(core::sync::atomic::Ordering::Relaxed);
    // SAFETY: this slot's kstack was just allocated by alloc_process and
    // isn't referenced by any other thread yet.
    pt.procs[child_idx].thread.context = unsafe { context::seed_kernel_stack(kstack_top, child_tf, trapret) };

    let parent_files = pt.procs[parent_idx].files;
    for (slot, parent_slot) in pt.procs[child_idx].files.iter_mut().zip(parent_files.iter()) {
        if let Some(fti) = parent_slot {
            crate::fs::file::table().dup(*fti);
            *slot = Some(*fti);
        }
    }
    pt.procs[child_idx].cwd = pt.procs[parent_idx].cwd;
    pt.procs[child_idx].args = pt.procs[parent_idx].args.clone();
    pt.procs[child_idx].thread.state = ThreadState::Ready;
    pt.procs[child_idx].state = ProcState::Running;

    Ok(pt.procs[child_idx].pid)
}

/// Tears down the caller's address space and open files, marks it a
/// zombie, and wakes any parent blocked in `wait`.
pub fn exit(code: i32) -> ! {
    let mut pt = PTABLE.lock();
    let idx = pt.current_index().expect("exit: no current thread");

    for slot in pt.procs[idx].files.iter_mut() {
        if let Some(fti) = slot.take() {
            crate::fs::file::table().close(fti);
        }
    }
    if let Some(pgdir) = pt.procs[idx].pagedir.take() {
        let sz = pt.procs[idx].sz;
        crate::arch::x86::paging::free_pgdir(pgdir, sz);
    }
    pt.procs[idx].exit_code = code;
    pt.procs[idx].thread.state = ThreadState::Stopped;
    pt.procs[idx].state = ProcState::Zombie;

    drop(pt);
    WAIT_CHANNEL.wakeup();

    PTABLE.raw.acquire();
    unsafe {
        let pt = &mut *PTABLE.get_mut_unchecked();
        scheduler::sched(pt);
    }
    unreachable!("exit: scheduler resumed a zombie thread");
}

/// Sets the asynchronous `killed` flag; the target observes it at its
/// next scheduling point or return-to-user boundary and self-exits.
pub fn kill(pid: i32) -> KResult<()> {
    let mut pt = PTABLE.lock();
    let idx = pt.find_by_pid(pid).ok_or(Error::NotFound)?;
    pt.procs[idx].killed = true;
    if pt.procs[idx].thread.state == ThreadState::Sleeping {
        pt.procs[idx].thread.state = ThreadState::Ready;
    }
    Ok(())
}

/// Blocks the caller until a child becomes a zombie, reaps it, and returns
/// its PID and exit code. Equivalent to `waitpid(-1, ...)`.
///
/// This does not go through [`crate::lock::Guard::sleep`]: the condition
/// being waited on (a child's `ProcState`) is itself protected by
/// `PTABLE`, so there is no separate lock to release and re-acquire. We
/// manage the raw lock by hand instead, exactly as the scheduler handoff
/// does.
pub fn wait() -> KResult<(i32, i32)> {
    let wait_chan = &WAIT_CHANNEL as *const sleep::WaitChannel as usize;
    loop {
        PTABLE.raw.acquire();
        let outcome = unsafe {
            let pt = &mut *PTABLE.get_mut_unchecked();
            let caller_idx = pt.current.expect("wait: no current thread");
            let caller_pid = pt.procs[caller_idx].pid;

            let mut have_children = false;
            let mut reaped = None;
            for i in 0..MAX_PROCESSES {
                if pt.procs[i].parent == caller_pid && pt.procs[i].state != ProcState::Empty {
                    have_children = true;
                    if pt.procs[i].state == ProcState::Zombie {
                        reaped = Some(i);
                        break;
                    }
                }
            }

            if let Some(i) = reaped {
                let pid = pt.procs[i].pid;
                let code = pt.procs[i].exit_code;
                pt.procs[i] = Process::empty();
                Some(Ok((pid, code)))
            } else if !have_children {
                Some(Err(Error::Unsupported)) // no children to wait for
            } else {
                pt.procs[caller_idx].thread.chan = Some(wait_chan);
                pt.procs[caller_idx].thread.state = ThreadState::Sleeping;
                scheduler::sched(pt);
                pt.procs[caller_idx].thread.chan = None;
                None
            }
        };
        PTABLE.raw.release();
        if let Some(result) = outcome {
            return result;
        }
    }
}

static WAIT_CHANNEL: sleep::WaitChannel = sleep::WaitChannel::new();

/// Called by [`crate::lock::Guard::sleep`]: marks the current thread
/// asleep on `chan` while still holding `PTABLE`'s raw lock, so a
/// concurrent `wakeup` cannot race ahead of this thread actually going to
/// sleep.
pub(crate) fn begin_sleep(chan: usize) {
    PTABLE.raw.acquire();
    unsafe {
        let pt = &mut *PTABLE.get_mut_unchecked();
        let idx = pt.current_index().expect("sleep: no current thread");
        pt.procs[idx].thread.chan = Some(chan);
        pt.procs[idx].thread.state = ThreadState::Sleeping;
    }
}

/// Enters the scheduler, releasing `PTABLE`'s raw lock on the way
/// (mirrors the scheduler's own `sched()`/handoff convention).
pub(crate) fn park() {
    unsafe {
        let pt = &mut *PTABLE.get_mut_unchecked();
        scheduler::sched(pt);
    }
    PTABLE.raw.release();
}

/// Moves every `Sleeping` thread waiting on `chan` to `Ready`. Safe to
/// call from an interrupt handler.
pub(crate) fn wakeup(chan: usize) {
    let mut pt = PTABLE.lock();
    for proc in pt.procs.iter_mut() {
        if proc.thread.state == ThreadState::Sleeping && proc.thread.chan == Some(chan) {
            proc.thread.state = ThreadState::Ready;
            proc.thread.chan = None;
        }
    }
}

/// Advances the tick counter and wakes any timed sleepers whose deadline
/// has arrived. Called once per timer interrupt.
pub fn tick() {
    let mut pt = PTABLE.lock();
    pt.ticks += 1;
    let now = pt.ticks;
    for proc in pt.procs.iter_mut() {
        if proc.thread.state == ThreadState::Sleeping {
            if let Some(deadline) = proc.thread.wake_tick {
                if now >= deadline {
                    proc.thread.state = ThreadState::Ready;
                    proc.thread.chan = None;
                    proc.thread.wake_tick = None;
                }
            }
        }
    }
}

pub fn ticks() -> u64 {
    PTABLE.lock().ticks()
}

/// Puts the calling thread to sleep until `ticks()` reaches `deadline`.
pub fn sleep_until(deadline: u64) {
    let mut pt = PTABLE.lock();
    let idx = pt.current_index().expect("sleep_until: no current thread");
    pt.procs[idx].thread.wake_tick = Some(deadline);
    let chan = &pt.procs[idx].thread as *const Thread as usize;
    drop(pt);
    begin_sleep(chan);
    park();
}
