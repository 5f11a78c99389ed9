//! Architecture-specific glue. This kernel targets 32-bit x86 only, with
//! no SMP and no 64-bit addressing; everything
//! hardware-facing lives under [`x86`] and is compiled only for
//! `target_arch = "x86"`. Pure data types that do not touch hardware
//! (`TrapFrame`, `Context`, `PteFlags`) are also usable from host unit
//! tests.

pub mod x86;
