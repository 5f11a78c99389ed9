//! ELF32 parsing feeding `process_load`, which reads the file from the VFS
//! and loads it either as ELF or as a flat binary. Only what loading a
//! statically linked executable needs: the file header and loadable
//! (`PT_LOAD`) program headers. Section headers, relocation, and dynamic
//! linking are out of scope (no dynamic linker).

use crate::error::{Error, KResult};

const EI_MAG: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ET_EXEC: u16 = 2;
const PT_LOAD: u32 = 1;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfHeader {
    pub entry: u32,
    pub phoff: u32,
    pub phnum: u16,
    pub phentsize: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub offset: u32,
    pub vaddr: u32,
    pub filesz: u32,
    pub memsz: u32,
    pub writable: bool,
}

fn u16_at(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}

fn u32_at(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

/// Parses the 52-byte ELF32 file header. Rejects anything that isn't a
/// 32-bit, little-endian, executable ELF (flat binary is the fallback for
/// anything else, handled by the caller, not here).
pub fn parse_header(image: &[u8]) -> KResult<ElfHeader> {
    if image.len() < EHDR_SIZE {
        return Err(Error::InvalidFormat);
    }
    if image[0..4] != EI_MAG || image[4] != ELFCLASS32 {
        return Err(Error::InvalidFormat);
    }
    let e_type = u16_at(image, 16);
    if e_type != ET_EXEC {
        return Err(Error::InvalidFormat);
    }
    Ok(ElfHeader {
        entry: u32_at(image, 24),
        phoff: u32_at(image, 28),
        phnum: u16_at(image, 44),
        phentsize: u16_at(image, 42),
    })
}

/// Returns the `idx`th program header. Only `PT_LOAD` segments matter to
/// the loader; others (`PT_NULL`, `PT_NOTE`, ...) are returned as-is and the
/// caller filters on `p_type`.
pub fn program_header(image: &[u8], header: &ElfHeader, idx: u16) -> KResult<ProgramHeader> {
    if idx >= header.phnum {
        return Err(Error::InvalidArgument);
    }
    let entsize = header.phentsize as usize;
    if entsize < PHDR_SIZE {
        return Err(Error::InvalidFormat);
    }
    let base = header.phoff as usize + idx as usize * entsize;
    if base + PHDR_SIZE > image.len() {
        return Err(Error::InvalidFormat);
    }
    let flags = u32_at(image, base + 24);
    Ok(ProgramHeader {
        p_type: u32_at(image, base),
        offset: u32_at(image, base + 4),
        vaddr: u32_at(image, base + 8),
        filesz: u32_at(image, base + 16),
        memsz: u32_at(image, base + 20),
        writable: flags & 0x2 != 0,
    })
}

/// Iterates the `PT_LOAD` segments of `image`, calling `f(segment)` for
/// each. The caller (`process_load`) maps user pages and copies segment
/// bytes; this module only knows how to read the format.
pub fn for_each_load_segment(image: &[u8], header: &ElfHeader, mut f: impl FnMut(ProgramHeader) -> KResult<()>) -> KResult<()> {
    for idx in 0..header.phnum {
        let ph = program_header(image, header, idx)?;
        if ph.p_type == PT_LOAD {
            f(ph)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_image(entry: u32, segments: &[(u32, u32, u32, u32)]) -> std::vec::Vec<u8> {
        let phoff = EHDR_SIZE as u32;
        let mut image = std::vec![0u8; EHDR_SIZE + segments.len() * PHDR_SIZE];
        image[0..4].copy_from_slice(&EI_MAG);
        image[4] = ELFCLASS32;
        image[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        image[24..28].copy_from_slice(&entry.to_le_bytes());
        image[28..32].copy_from_slice(&phoff.to_le_bytes());
        image[42..44].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        image[44..46].copy_from_slice(&(segments.len() as u16).to_le_bytes());

        for (i, &(vaddr, offset, filesz, memsz)) in segments.iter().enumerate() {
            let base = EHDR_SIZE + i * PHDR_SIZE;
            image[base..base + 4].copy_from_slice(&PT_LOAD.to_le_bytes());
            image[base + 4..base + 8].copy_from_slice(&offset.to_le_bytes());
            image[base + 8..base + 12].copy_from_slice(&vaddr.to_le_bytes());
            image[base + 16..base + 20].copy_from_slice(&filesz.to_le_bytes());
            image[base + 20..base + 24].copy_from_slice(&memsz.to_le_bytes());
            image[base + 24..base + 28].copy_from_slice(&2u32.to_le_bytes());
        }
        image
    }

    #[test]
    fn parses_entry_point_and_phnum() {
        let image = build_image(0x0040_0000, &[(0x0040_0000, 0, 4096, 4096)]);
        let header = parse_header(&image).unwrap();
        assert_eq!(header.entry, 0x0040_0000);
        assert_eq!(header.phnum, 1);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut image = build_image(0, &[]);
        image[0] = 0;
        assert_eq!(parse_header(&image), Err(Error::InvalidFormat));
    }

    #[test]
    fn iterates_only_load_segments() {
        let image = build_image(0x1000, &[(0x1000, 0, 16, 16), (0x2000, 16, 32, 64)]);
        let header = parse_header(&image).unwrap();
        let mut seen = std::vec::Vec::new();
        for_each_load_segment(&image, &header, |ph| {
            seen.push(ph.vaddr);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, std::vec![0x1000, 0x2000]);
    }
}
