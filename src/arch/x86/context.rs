//! Saved callee-saved registers for a kernel-to-kernel context switch, plus
//! the stack pointer `swtch` needs to actually move execution onto the
//! target thread's own kernel stack: the x86 ABI's callee-saved set
//! (`ebx`, `esi`, `edi`, `ebp`), the return address, and `esp`.

use super::TrapFrame;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    pub edi: u32,
    pub esi: u32,
    pub ebx: u32,
    pub ebp: u32,
    /// Return address `swtch` will `ret` to in the newly-resumed thread.
    pub eip: u32,
    /// Stack pointer to resume on. `swtch` writes `eip` to `*esp` right
    /// before `ret`, so whatever this points at must have room for that one
    /// word and, immediately above it, whatever `eip` expects to find on
    /// the stack (a `TrapFrame`, for `trapret`).
    pub esp: u32,
}

/// Writes `tf` onto the top of the kernel stack ending at `kstack_top`,
/// reserving one word below it for the return address `swtch` installs, and
/// returns the `Context` that resumes there: loading it switches onto this
/// stack and jumps to `eip` with `tf` sitting exactly where `trapret`
/// expects to find it.
///
/// # Safety
/// `kstack_top` must be the top of a kernel stack not otherwise in use, at
/// least `size_of::<TrapFrame>() + 4` bytes into which this call may write.
pub unsafe fn seed_kernel_stack(kstack_top: usize, tf: TrapFrame, eip: u32) -> Context {
    let tf_addr = kstack_top - core::mem::size_of::<TrapFrame>();
    unsafe { core::ptr::write(tf_addr as *mut TrapFrame, tf) };
    let esp = (tf_addr - 4) as u32;
    Context { edi: 0, esi: 0, ebx: 0, ebp: 0, eip, esp }
}

extern "C" {
    /// Saves the caller's callee-saved registers and stack pointer into
    /// `*old`, switches onto the stack described by `*new`, and returns into
    /// whatever `new.eip` points at there. Defined in the `global_asm!`
    /// block below; declared here so the rest of the kernel can call it
    /// without caring where the body lives.
    ///
    /// # Safety
    /// Both pointers must point at live `Context` values; `old` is
    /// overwritten completely. Interrupts must be disabled across the call
    /// and the caller must hold the scheduler lock.
    pub fn swtch(old: *mut Context, new: *const Context);
}

#[cfg(all(target_arch = "x86", not(test)))]
core::arch::global_asm!(
    r#"
.global swtch
swtch:
    mov eax, [esp + 4]   # old
    mov edx, [esp + 8]   # new

    mov [eax + 0], edi
    mov [eax + 4], esi
    mov [eax + 8], ebx
    mov [eax + 12], ebp
    mov ecx, [esp]
    mov [eax + 16], ecx  # return address
    mov [eax + 20], esp  # caller's own stack pointer

    mov edi, [edx + 0]
    mov esi, [edx + 4]
    mov ebx, [edx + 8]
    mov ebp, [edx + 12]
    mov ecx, [edx + 16]  # new return address
    mov esp, [edx + 20]  # switch onto the new thread's stack
    mov [esp], ecx       # new return address, on the new stack now

    ret
"#
);
