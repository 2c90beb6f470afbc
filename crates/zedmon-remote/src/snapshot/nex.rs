//! `.nex` (ZX Spectrum Next) snapshot parsing.
//!
//! Only the per-bank load map, SP and PC matter to the debugger; the NEX
//! loader stub initializes everything else on real hardware, so no other
//! register leaves the file. Loading-screen blocks are skipped by size.

use zedmon_dzrp::registers::Reg;

use super::{split_bank16, SnapshotError, SnapshotImage};

const HEADER_LEN: usize = 512;
const BANK16_LEN: usize = 2 * 0x2000;
/// Bank table capacity in the header.
const MAX_BANKS: usize = 112;

/// 16 KiB banks load in this canonical order; the header's table is indexed
/// by bank number, not load order.
fn load_order() -> impl Iterator<Item = usize> {
    [5usize, 2, 0, 1, 3, 4, 6, 7]
        .into_iter()
        .chain(8..MAX_BANKS)
}

pub fn parse(data: &[u8]) -> Result<SnapshotImage, SnapshotError> {
    let header = data.get(..HEADER_LEN).ok_or(SnapshotError::Truncated)?;
    if &header[0..4] != b"Next" {
        return Err(SnapshotError::BadMagic);
    }
    let version = std::str::from_utf8(&header[4..8]).unwrap_or("");
    if !version.starts_with("V1") {
        return Err(SnapshotError::UnsupportedVersion(version.to_string()));
    }

    let load_screen = header[10];
    let border = header[11] & 0x07;
    let sp = u16::from_le_bytes([header[12], header[13]]);
    let pc = u16::from_le_bytes([header[14], header[15]]);
    let bank_table = &header[18..18 + MAX_BANKS];

    // Skip loading-screen blocks. The palette precedes layer-2 and LoRes
    // screens unless the no-palette flag is set.
    let mut offset = HEADER_LEN;
    if load_screen & 0b0000_0101 != 0 && load_screen & 0b1000_0000 == 0 {
        offset += 512;
    }
    if load_screen & 0b0000_0001 != 0 {
        offset += 49152; // Layer 2
    }
    if load_screen & 0b0000_0010 != 0 {
        offset += 6912; // ULA
    }
    if load_screen & 0b0000_0100 != 0 {
        offset += 12288; // LoRes
    }
    if load_screen & 0b0000_1000 != 0 {
        offset += 12288; // Timex HiRes
    }
    if load_screen & 0b0001_0000 != 0 {
        offset += 12288; // Timex HiCol
    }

    let mut banks = Vec::new();
    for bank16 in load_order() {
        if bank_table[bank16] == 0 {
            continue;
        }
        let chunk = data
            .get(offset..offset + BANK16_LEN)
            .ok_or(SnapshotError::Truncated)?;
        banks.extend(split_bank16(bank16 as u8, chunk));
        offset += BANK16_LEN;
    }

    // SP first so the stack exists before PC moves; 0 means "not set".
    let mut regs = Vec::with_capacity(2);
    if sp != 0 {
        regs.push((Reg::Sp, sp));
    }
    if pc != 0 {
        regs.push((Reg::Pc, pc));
    }

    Ok(SnapshotImage {
        banks,
        regs,
        border: Some(border),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(sp: u16, pc: u16, present: &[usize]) -> Vec<u8> {
        let mut h = vec![0u8; HEADER_LEN];
        h[0..4].copy_from_slice(b"Next");
        h[4..8].copy_from_slice(b"V1.2");
        h[9] = present.len() as u8;
        h[11] = 4; // border
        h[12..14].copy_from_slice(&sp.to_le_bytes());
        h[14..16].copy_from_slice(&pc.to_le_bytes());
        for bank in present {
            h[18 + bank] = 1;
        }
        h
    }

    #[test]
    fn nex_loads_banks_in_canonical_order() {
        let mut data = header(0xFF00, 0x8000, &[0, 2, 5]);
        // Load order is 5, 2, 0 for these banks.
        data.extend_from_slice(&vec![0x55u8; BANK16_LEN]);
        data.extend_from_slice(&vec![0x22u8; BANK16_LEN]);
        data.extend_from_slice(&vec![0x00u8; BANK16_LEN]);

        let image = parse(&data).unwrap();
        let order: Vec<u8> = image.banks.iter().map(|b| b.bank).collect();
        assert_eq!(order, [10, 11, 4, 5, 0, 1]);
        assert_eq!(image.banks[0].data[0], 0x55);
        assert_eq!(image.banks[2].data[0], 0x22);

        assert_eq!(image.regs, [(Reg::Sp, 0xFF00), (Reg::Pc, 0x8000)]);
        assert_eq!(image.border, Some(4));
    }

    #[test]
    fn nex_skips_loading_screen_blocks() {
        let mut data = header(0xFF00, 0x8000, &[5]);
        data[10] = 0b0000_0001; // Layer 2 screen with palette
        data.extend_from_slice(&vec![0u8; 512 + 49152]);
        data.extend_from_slice(&vec![0xAAu8; BANK16_LEN]);

        let image = parse(&data).unwrap();
        assert_eq!(image.banks.len(), 2);
        assert_eq!(image.banks[0].data[0], 0xAA);
    }

    #[test]
    fn nex_zero_pc_is_not_applied() {
        let data = header(0, 0, &[]);
        let image = parse(&data).unwrap();
        assert!(image.regs.is_empty());
        assert!(image.banks.is_empty());
    }

    #[test]
    fn nex_rejects_wrong_magic_and_version() {
        let mut data = header(0, 0, &[]);
        data[0] = b'X';
        assert!(matches!(parse(&data), Err(SnapshotError::BadMagic)));

        let mut data = header(0, 0, &[]);
        data[4..8].copy_from_slice(b"V2.0");
        assert!(matches!(
            parse(&data),
            Err(SnapshotError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn nex_truncated_bank_data_is_rejected() {
        let mut data = header(0, 0, &[5]);
        data.extend_from_slice(&[0u8; 100]);
        assert!(matches!(parse(&data), Err(SnapshotError::Truncated)));
    }
}
