//! Kernel execution substrate for a small 32-bit x86 monolithic OS.
//!
//! This crate owns the subsystems a user program needs to exist at all:
//! physical/virtual memory, the process/thread table and scheduler, the
//! trap and system-call path, the virtual file system, and the
//! synchronization primitives tying them together. Device drivers, the GUI,
//! the on-disk FAT16 format and the user-space C library are external
//! collaborators; this crate only depends on the small trait boundary they
//! must implement (see [`devices`]).
//!
//! Init order (see `DESIGN.md`): heap -> paging -> trap table -> timer ->
//! VFS -> disk -> scheduler. Every code path after `scheduler` starts is
//! either an interrupt handler, a kernel task running on behalf of a
//! process, or the scheduler itself.
#![cfg_attr(not(test), no_std)]
#![allow(clippy::missing_safety_doc)]

#[cfg(test)]
extern crate std;

pub mod arch;
pub mod bio;
pub mod console;
pub mod devices;
pub mod elf;
pub mod error;
pub mod fs;
pub mod kalloc;
pub mod lock;
pub mod mbr;
pub mod memlayout;
pub mod panic;
pub mod param;
pub mod proc;
pub mod string;
pub mod syscall;
pub mod trap;

pub use error::{Error, KResult};

/// Kernel-wide bring-up sequence. Each stage is idempotent at most once;
/// calling this twice is a bug and will panic via the double-init guards
/// inside each subsystem.
///
/// # Safety
/// Must be called exactly once, before interrupts are enabled, with the
/// boot memory map and kernel image already in place 
pub unsafe fn kernel_init(
    heap_base: usize,
    heap_size: usize,
    kernel_phys_base: usize,
    kernel_phys_size: usize,
) {
    unsafe {
        kalloc::heap().init(heap_base, heap_size);
        arch::x86::paging::init_kernel_pagedir(kernel_phys_base, kernel_phys_size);
        arch::x86::gdt::init();
        arch::x86::idt::load();
        trap::init();
        fs::init();
        proc::init();
    }
}
