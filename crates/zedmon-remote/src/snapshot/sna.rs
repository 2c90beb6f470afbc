//! `.sna` snapshot parsing, 48K and 128K variants.
//!
//! See the format reference on World of Spectrum. The 27-byte header is
//! shared; the 48K body is the flat RAM at 0x4000..0xFFFF with PC pushed on
//! the stack, the 128K body appends PC, port 0x7FFD and the remaining banks.

use zedmon_dzrp::registers::Reg;

use super::{split_bank16, SnapshotError, SnapshotImage};

const HEADER_LEN: usize = 27;
const RAM48: usize = 3 * 0x4000;
const LEN_48K: usize = HEADER_LEN + RAM48;
/// 128K layout with 5 trailing banks (paged bank is 5 or 2: already in the
/// 48K block) or with all 6 remaining banks.
const LEN_128K_SHORT: usize = LEN_48K + 4 + 5 * 0x4000;
const LEN_128K_LONG: usize = LEN_48K + 4 + 6 * 0x4000;

struct Header {
    regs: Vec<(Reg, u16)>,
    sp: u16,
    border: u8,
}

fn word(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn parse_header(data: &[u8]) -> Header {
    let sp = word(data, 23);
    // Push order: everything else first, SP and PC last so the remote's
    // stack view settles only once.
    let regs = vec![
        (Reg::I, data[0] as u16),
        (Reg::Hl2, word(data, 1)),
        (Reg::De2, word(data, 3)),
        (Reg::Bc2, word(data, 5)),
        (Reg::Af2, word(data, 7)),
        (Reg::Hl, word(data, 9)),
        (Reg::De, word(data, 11)),
        (Reg::Bc, word(data, 13)),
        (Reg::Iy, word(data, 15)),
        (Reg::Ix, word(data, 17)),
        (Reg::R, data[20] as u16),
        (Reg::Af, word(data, 21)),
        (Reg::Im, (data[25] & 0x03) as u16),
    ];
    Header {
        regs,
        sp,
        border: data[26] & 0x07,
    }
}

pub fn parse(data: &[u8]) -> Result<SnapshotImage, SnapshotError> {
    match data.len() {
        LEN_48K => parse_48k(data),
        LEN_128K_SHORT | LEN_128K_LONG => parse_128k(data),
        _ => Err(SnapshotError::Truncated),
    }
}

fn parse_48k(data: &[u8]) -> Result<SnapshotImage, SnapshotError> {
    let mut header = parse_header(data);
    let ram = &data[HEADER_LEN..];

    // PC lives on the stack; pop it.
    if header.sp < 0x4000 || header.sp > 0xFFFE {
        return Err(SnapshotError::Invalid(format!(
            "48K snapshot SP {:#06x} points outside RAM",
            header.sp
        )));
    }
    let sp_offset = header.sp as usize - 0x4000;
    let pc = u16::from_le_bytes([ram[sp_offset], ram[sp_offset + 1]]);
    let sp = header.sp.wrapping_add(2);

    // 0x4000 → bank 5, 0x8000 → bank 2, 0xC000 → bank 0.
    let mut banks = Vec::with_capacity(6);
    for (bank16, chunk) in [5u8, 2, 0].into_iter().zip(ram.chunks_exact(2 * 0x2000)) {
        banks.extend(split_bank16(bank16, chunk));
    }

    header.regs.push((Reg::Sp, sp));
    header.regs.push((Reg::Pc, pc));
    Ok(SnapshotImage {
        banks,
        regs: header.regs,
        border: Some(header.border),
    })
}

fn parse_128k(data: &[u8]) -> Result<SnapshotImage, SnapshotError> {
    let mut header = parse_header(data);
    let ram = &data[HEADER_LEN..LEN_48K];
    let pc = word(data, LEN_48K);
    let port_7ffd = data[LEN_48K + 2];
    let paged = port_7ffd & 0x07;

    // The 48K block holds banks 5, 2 and whatever is paged at 0xC000.
    let mut banks = Vec::with_capacity(16);
    for (bank16, chunk) in [5u8, 2, paged]
        .into_iter()
        .zip(ram.chunks_exact(2 * 0x2000))
    {
        banks.extend(split_bank16(bank16, chunk));
    }

    // Remaining banks follow in ascending order. The long layout repeats
    // the paged bank when it is 5 or 2.
    let skip_paged = data.len() == LEN_128K_SHORT;
    let mut offset = LEN_48K + 4;
    for bank16 in 0u8..8 {
        if bank16 == 5 || bank16 == 2 || (skip_paged && bank16 == paged) {
            continue;
        }
        let chunk = data
            .get(offset..offset + 2 * 0x2000)
            .ok_or(SnapshotError::Truncated)?;
        banks.extend(split_bank16(bank16, chunk));
        offset += 2 * 0x2000;
    }

    header.regs.push((Reg::Sp, header.sp));
    header.regs.push((Reg::Pc, pc));
    Ok(SnapshotImage {
        banks,
        regs: header.regs,
        border: Some(header.border),
    })
}
