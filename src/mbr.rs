//! Master boot record parsing: the only on-disk format the core
//! handles directly. 446 bytes of bootstrap code (ignored), four 16-byte
//! partition entries, and a 2-byte `0xAA55` signature.

use crate::error::{Error, KResult};

const SECTOR_SIZE: usize = 512;
const PARTITION_TABLE_OFFSET: usize = 446;
const PARTITION_ENTRY_SIZE: usize = 16;
const PARTITION_COUNT: usize = 4;
const SIGNATURE_OFFSET: usize = 510;
const SIGNATURE: u16 = 0xAA55;

/// Partition type recognized by this core; others are logged and skipped.
pub const PARTITION_TYPE_FAT16_LBA: u8 = 0x0E;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    pub bootable: bool,
    pub partition_type: u8,
    pub lba_start: u32,
    pub sector_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterBootRecord {
    pub partitions: [Option<PartitionEntry>; PARTITION_COUNT],
}

fn parse_entry(sector: &[u8], i: usize) -> Option<PartitionEntry> {
    let base = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
    let entry = &sector[base..base + PARTITION_ENTRY_SIZE];
    let partition_type = entry[4];
    if partition_type == 0 {
        return None;
    }
    Some(PartitionEntry {
        bootable: entry[0] == 0x80,
        partition_type,
        lba_start: u32::from_le_bytes(entry[8..12].try_into().unwrap()),
        sector_count: u32::from_le_bytes(entry[12..16].try_into().unwrap()),
    })
}

/// Parses a 512-byte MBR sector. A missing `0xAA55` signature is treated
/// as an invariant violation, not a recoverable `Error` — callers that
/// read an untrusted/removable disk should check the signature themselves
/// before calling this.
pub fn parse(sector: &[u8]) -> KResult<MasterBootRecord> {
    if sector.len() < SECTOR_SIZE {
        return Err(Error::InvalidFormat);
    }
    let signature = u16::from_le_bytes([sector[SIGNATURE_OFFSET], sector[SIGNATURE_OFFSET + 1]]);
    assert_eq!(signature, SIGNATURE, "mbr: bad boot signature {:#06x}", signature);

    let partitions = array_macro::array![i => parse_entry(sector, i); PARTITION_COUNT];
    Ok(MasterBootRecord { partitions })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector_with(partitions: &[(u8, u8, u32, u32)]) -> [u8; SECTOR_SIZE] {
        let mut sector = [0u8; SECTOR_SIZE];
        for (i, &(status, ptype, lba, count)) in partitions.iter().enumerate() {
            let base = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
            sector[base] = status;
            sector[base + 4] = ptype;
            sector[base + 8..base + 12].copy_from_slice(&lba.to_le_bytes());
            sector[base + 12..base + 16].copy_from_slice(&count.to_le_bytes());
        }
        sector[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2].copy_from_slice(&SIGNATURE.to_le_bytes());
        sector
    }

    #[test]
    fn parses_a_single_fat16_partition() {
        let sector = sector_with(&[(0x80, PARTITION_TYPE_FAT16_LBA, 2048, 1_000_000)]);
        let mbr = parse(&sector).unwrap();
        let p0 = mbr.partitions[0].unwrap();
        assert!(p0.bootable);
        assert_eq!(p0.partition_type, PARTITION_TYPE_FAT16_LBA);
        assert_eq!(p0.lba_start, 2048);
        assert_eq!(p0.sector_count, 1_000_000);
        assert!(mbr.partitions[1..].iter().all(Option::is_none));
    }

    #[test]
    fn zero_type_entries_are_absent() {
        let sector = sector_with(&[(0, 0, 0, 0)]);
        let mbr = parse(&sector).unwrap();
        assert!(mbr.partitions[0].is_none());
    }

    #[test]
    fn truncated_sector_is_invalid_format() {
        let short = [0u8; 64];
        assert_eq!(parse(&short), Err(Error::InvalidFormat));
    }

    #[test]
    #[should_panic(expected = "bad boot signature")]
    fn missing_signature_panics() {
        let sector = [0u8; SECTOR_SIZE];
        let _ = parse(&sector);
    }
}
