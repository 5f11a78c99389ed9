//! Global Descriptor Table and Task State Segment. The only field the rest
//! of the kernel touches directly is `esp0` — the scheduler rewrites it on
//! every context switch so the next trap from user mode lands on the new
//! thread's kernel stack.

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SegAccess: u8 {
        const PRESENT   = 1 << 7;
        const DPL_RING3 = 0b0110_0000;
        const CODE_DATA = 1 << 4;
        const EXECUTABLE = 1 << 3;
        const READWRITE = 1 << 1;
        const ACCESSED  = 1 << 0;
        const TSS_TYPE  = 0b1001; // 32-bit TSS, available
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Default)]
pub struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    flags_limit_high: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn new(base: u32, limit: u32, access: u8, flags: u8) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            flags_limit_high: (flags & 0xF0) | (((limit >> 16) & 0x0F) as u8),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }

    const fn null() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

/// x86 32-bit Task State Segment. Only `esp0`/`ss0` (the ring-0 stack
/// pointer to load on a privilege-level change) are meaningfully used by
/// this kernel; the I/O bitmap is disabled (offset points past the limit).
#[repr(C, packed)]
#[derive(Clone, Copy, Default)]
pub struct Tss {
    pub link: u32,
    pub esp0: u32,
    pub ss0: u32,
    _reserved: [u32; 23],
    pub iomap_base: u16,
}

/// Segment selector indices, fixed by convention across the kernel (used
/// both here and by the trap stub that reloads segment registers).
pub const KERNEL_CODE_SEL: u16 = 0x08;
pub const KERNEL_DATA_SEL: u16 = 0x10;
pub const USER_CODE_SEL: u16 = 0x18 | 3;
pub const USER_DATA_SEL: u16 = 0x20 | 3;
pub const TSS_SEL: u16 = 0x28;

const GDT_ENTRIES: usize = 6;

pub struct Gdt {
    entries: [GdtEntry; GDT_ENTRIES],
    tss: Tss,
}

static mut GDT: Gdt = Gdt {
    entries: [GdtEntry::null(); GDT_ENTRIES],
    tss: Tss {
        link: 0,
        esp0: 0,
        ss0: 0,
        _reserved: [0; 23],
        iomap_base: core::mem::size_of::<Tss>() as u16,
    },
};

#[repr(C, packed)]
struct DtPointer {
    limit: u16,
    base: u32,
}

/// Builds the flat GDT (kernel/user code+data covering all 4GiB, plus the
/// TSS descriptor) and loads it. Must run once, before the first `iret` to
/// user mode.
///
/// # Safety
/// Must be called exactly once during boot, before interrupts are enabled.
pub unsafe fn init() {
    unsafe {
        let tss_base = core::ptr::addr_of!(GDT.tss) as u32;
        let tss_limit = (core::mem::size_of::<Tss>() - 1) as u32;

        GDT.entries[0] = GdtEntry::null();
        GDT.entries[1] = GdtEntry::new(0, 0xFFFFF, 0x9A, 0xC0); // kernel code
        GDT.entries[2] = GdtEntry::new(0, 0xFFFFF, 0x92, 0xC0); // kernel data
        GDT.entries[3] = GdtEntry::new(0, 0xFFFFF, 0xFA, 0xC0); // user code
        GDT.entries[4] = GdtEntry::new(0, 0xFFFFF, 0xF2, 0xC0); // user data
        GDT.entries[5] = GdtEntry::new(tss_base, tss_limit, 0x89, 0x00); // TSS

        load_gdt();
        load_tss();
    }
}

/// Rewrites `esp0` in the live TSS. Called by the scheduler on every
/// context switch so a trap from the newly-running thread's
/// user mode lands on its own kernel stack.
pub fn set_kernel_stack(esp0: u32) {
    unsafe {
        GDT.tss.esp0 = esp0;
        GDT.tss.ss0 = KERNEL_DATA_SEL as u32;
    }
}

#[cfg(all(target_arch = "x86", not(test)))]
unsafe fn load_gdt() {
    use core::arch::asm;
    unsafe {
        let ptr = DtPointer {
            limit: (core::mem::size_of::<[GdtEntry; GDT_ENTRIES]>() - 1) as u16,
            base: core::ptr::addr_of!(GDT.entries) as u32,
        };
        asm!("lgdt [{0}]", in(reg) &ptr, options(readonly, nostack));
    }
}

#[cfg(all(target_arch = "x86", not(test)))]
unsafe fn load_tss() {
    use core::arch::asm;
    unsafe { asm!("ltr {0:x}", in(reg) TSS_SEL, options(nostack)) };
}

#[cfg(not(all(target_arch = "x86", not(test))))]
unsafe fn load_gdt() {}
#[cfg(not(all(target_arch = "x86", not(test))))]
unsafe fn load_tss() {}
