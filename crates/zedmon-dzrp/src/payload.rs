//! Per-command argument encoders and response decoders.
//!
//! Integer fields are little-endian. Strings are u16-length-prefixed UTF-8.
//! Layouts are locked by the tests at the bottom of this file.

use bitflags::bitflags;

use crate::cmd::BreakReason;
use crate::constants::{BANK_SIZE, DZRP_VERSION};
use crate::error::DzrpError;
use crate::registers::Reg;

bitflags! {
    /// Capability flags a remote reports in its INIT response.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RemoteCaps: u8 {
        /// Remote installs PC breakpoints natively.
        const BREAKPOINTS = 0b0000_0001;
        /// Remote supports memory watchpoints.
        const WATCHPOINTS = 0b0000_0010;
        /// Remote can produce/accept opaque state blobs.
        const STATE = 0b0000_0100;
        /// Remote answers TBBlue and sprite queries.
        const NEXT_GRAPHICS = 0b0000_1000;
    }
}

bitflags! {
    /// Watchpoint access mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WpAccess: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn take_str(buf: &[u8]) -> Result<(String, &[u8]), DzrpError> {
    if buf.len() < 2 {
        return Err(DzrpError::TooShort);
    }
    let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let rest = &buf[2..];
    if rest.len() < len {
        return Err(DzrpError::TooShort);
    }
    let s = std::str::from_utf8(&rest[..len]).map_err(|_| DzrpError::BadString)?;
    Ok((s.to_owned(), &rest[len..]))
}

fn take_u16(buf: &[u8]) -> Result<(u16, &[u8]), DzrpError> {
    if buf.len() < 2 {
        return Err(DzrpError::TooShort);
    }
    Ok((u16::from_le_bytes([buf[0], buf[1]]), &buf[2..]))
}

// --- INIT ---------------------------------------------------------------

/// INIT request: protocol version triplet + client name.
pub fn init_args(client_name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + 2 + client_name.len());
    out.extend_from_slice(&DZRP_VERSION);
    put_str(&mut out, client_name);
    out
}

/// INIT response: version triplet, machine id byte, capability flags, banner.
#[derive(Debug, Clone)]
pub struct InitResponse {
    pub version: [u8; 3],
    pub machine: u8,
    pub caps: RemoteCaps,
    pub banner: String,
}

impl InitResponse {
    pub fn decode(payload: &[u8]) -> Result<InitResponse, DzrpError> {
        if payload.len() < 5 {
            return Err(DzrpError::TooShort);
        }
        let version = [payload[0], payload[1], payload[2]];
        if version[0] != DZRP_VERSION[0] {
            return Err(DzrpError::VersionMismatch {
                remote: version,
                local: DZRP_VERSION,
            });
        }
        let machine = payload[3];
        let caps = RemoteCaps::from_bits_truncate(payload[4]);
        let (banner, _) = take_str(&payload[5..])?;
        Ok(InitResponse {
            version,
            machine,
            caps,
            banner,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version);
        out.push(self.machine);
        out.push(self.caps.bits());
        put_str(&mut out, &self.banner);
        out
    }
}

// --- CONTINUE / PAUSE ---------------------------------------------------

/// CONTINUE arguments: each alternate-step breakpoint is an enable byte
/// followed by the address. Disabled slots carry address 0.
pub fn continue_args(bp1: Option<u16>, bp2: Option<u16>) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    for bp in [bp1, bp2] {
        out.push(bp.is_some() as u8);
        out.extend_from_slice(&bp.unwrap_or(0).to_le_bytes());
    }
    out
}

/// Decode the CONTINUE arguments (remote/mock side).
pub fn decode_continue_args(
    payload: &[u8],
) -> Result<(Option<u16>, Option<u16>), DzrpError> {
    if payload.len() != 6 {
        return Err(DzrpError::LengthMismatch);
    }
    let decode_slot = |buf: &[u8]| -> Option<u16> {
        (buf[0] != 0).then(|| u16::from_le_bytes([buf[1], buf[2]]))
    };
    Ok((decode_slot(&payload[0..3]), decode_slot(&payload[3..6])))
}

/// Payload of an NTF_PAUSE notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseNotification {
    pub reason: BreakReason,
    /// For breakpoint hits: the breakpoint address. For watchpoints: the
    /// accessed address. Otherwise the current PC.
    pub address: u16,
    /// Remote-supplied reason suffix, may be empty.
    pub message: String,
}

impl PauseNotification {
    pub fn decode(payload: &[u8]) -> Result<PauseNotification, DzrpError> {
        if payload.len() < 3 {
            return Err(DzrpError::TooShort);
        }
        let reason = BreakReason::from_repr(payload[0])?;
        let (address, rest) = take_u16(&payload[1..])?;
        let (message, _) = take_str(rest)?;
        Ok(PauseNotification {
            reason,
            address,
            message,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.reason as u8];
        out.extend_from_slice(&self.address.to_le_bytes());
        put_str(&mut out, &self.message);
        out
    }
}

// --- Breakpoints / watchpoints ------------------------------------------

pub fn add_bp_args(address: u16, condition: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + condition.len());
    out.extend_from_slice(&address.to_le_bytes());
    put_str(&mut out, condition);
    out
}

pub fn decode_add_bp_args(payload: &[u8]) -> Result<(u16, String), DzrpError> {
    let (address, rest) = take_u16(payload)?;
    let (condition, _) = take_str(rest)?;
    Ok((address, condition))
}

/// ADD_BP response is the assigned breakpoint id; 0 means rejected.
pub fn decode_bp_id(payload: &[u8]) -> Result<u16, DzrpError> {
    let (id, _) = take_u16(payload)?;
    Ok(id)
}

pub fn remove_bp_args(id: u16) -> Vec<u8> {
    id.to_le_bytes().to_vec()
}

pub fn add_wp_args(access: WpAccess, address: u16, size: u16, condition: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(7 + condition.len());
    out.push(access.bits());
    out.extend_from_slice(&address.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    put_str(&mut out, condition);
    out
}

/// Watchpoints have no id; removal is keyed by (address, size).
pub fn remove_wp_args(address: u16, size: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    out.extend_from_slice(&address.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out
}

// --- Memory / registers -------------------------------------------------

pub fn read_mem_args(address: u16, size: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    out.extend_from_slice(&address.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out
}

pub fn write_mem_args(address: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + data.len());
    out.extend_from_slice(&address.to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// WRITE_BANK writes exactly one 8 KiB bank.
pub fn write_bank_args(bank: u8, data: &[u8]) -> Result<Vec<u8>, DzrpError> {
    if data.len() != BANK_SIZE {
        return Err(DzrpError::LengthMismatch);
    }
    let mut out = Vec::with_capacity(1 + BANK_SIZE);
    out.push(bank);
    out.extend_from_slice(data);
    Ok(out)
}

/// SET_REGISTER: index byte + value in the width the index implies.
pub fn set_register_args(reg: Reg, value: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(3);
    out.push(reg as u8);
    match reg.width() {
        1 => out.push(value as u8),
        _ => out.extend_from_slice(&value.to_le_bytes()),
    }
    out
}

pub fn decode_set_register_args(payload: &[u8]) -> Result<(Reg, u16), DzrpError> {
    if payload.is_empty() {
        return Err(DzrpError::TooShort);
    }
    let reg = Reg::from_repr(payload[0])?;
    let value = match (reg.width(), &payload[1..]) {
        (1, [v]) => *v as u16,
        (2, [lo, hi]) => u16::from_le_bytes([*lo, *hi]),
        _ => return Err(DzrpError::LengthMismatch),
    };
    Ok((reg, value))
}

/// GET_SLOTS response: one bank byte per 8 KiB slot.
pub fn decode_slots(payload: &[u8]) -> Result<[u8; 8], DzrpError> {
    payload.try_into().map_err(|_| DzrpError::LengthMismatch)
}

// --- ZX Next auxiliary passthroughs -------------------------------------

pub fn get_tbblue_reg_args(register: u8) -> Vec<u8> {
    vec![register]
}

pub fn get_sprites_palette_args(palette: u8) -> Vec<u8> {
    vec![palette]
}

pub fn get_sprites_args(index: u8, count: u8) -> Vec<u8> {
    vec![index, count]
}

pub fn get_sprite_patterns_args(index: u16, count: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    out.extend_from_slice(&index.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out
}

pub fn set_border_args(color: u8) -> Vec<u8> {
    vec![color]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_round_trip() {
        let resp = InitResponse {
            version: DZRP_VERSION,
            machine: 2,
            caps: RemoteCaps::BREAKPOINTS | RemoteCaps::STATE,
            banner: "mock".into(),
        };
        let decoded = InitResponse::decode(&resp.encode()).unwrap();
        assert_eq!(decoded.machine, 2);
        assert_eq!(decoded.caps, resp.caps);
        assert_eq!(decoded.banner, "mock");
    }

    #[test]
    fn init_rejects_major_version_mismatch() {
        let resp = InitResponse {
            version: [2, 0, 0],
            machine: 0,
            caps: RemoteCaps::empty(),
            banner: String::new(),
        };
        assert!(matches!(
            InitResponse::decode(&resp.encode()),
            Err(DzrpError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn continue_args_layout_is_locked() {
        assert_eq!(
            continue_args(Some(0x7003), Some(0x1234)),
            [1, 0x03, 0x70, 1, 0x34, 0x12]
        );
        assert_eq!(continue_args(None, None), [0, 0, 0, 0, 0, 0]);
        assert_eq!(
            decode_continue_args(&continue_args(Some(0xFFFF), None)).unwrap(),
            (Some(0xFFFF), None)
        );
    }

    #[test]
    fn pause_notification_round_trip() {
        let ntf = PauseNotification {
            reason: BreakReason::BreakpointHit,
            address: 0x8000,
            message: "bank 3".into(),
        };
        assert_eq!(PauseNotification::decode(&ntf.encode()).unwrap(), ntf);

        let empty = PauseNotification {
            reason: BreakReason::NoReason,
            address: 0,
            message: String::new(),
        };
        assert_eq!(empty.encode(), [0, 0, 0, 0, 0]);
    }

    #[test]
    fn set_register_width_follows_index() {
        assert_eq!(set_register_args(Reg::Pc, 0x6000), [0, 0x00, 0x60]);
        assert_eq!(set_register_args(Reg::Im, 0x0102), [14, 0x02]);
        assert_eq!(set_register_args(Reg::A, 0x5A), [15, 0x5A]);
        assert_eq!(
            decode_set_register_args(&set_register_args(Reg::A, 0x5A)).unwrap(),
            (Reg::A, 0x5A)
        );
        assert!(decode_set_register_args(&[0, 1]).is_err());
    }

    #[test]
    fn write_bank_requires_full_bank() {
        assert!(write_bank_args(3, &[0u8; BANK_SIZE]).is_ok());
        assert!(write_bank_args(3, &[0u8; 100]).is_err());
    }

    #[test]
    fn bp_args_round_trip() {
        let args = add_bp_args(0x8000, "A==66");
        let (addr, cond) = decode_add_bp_args(&args).unwrap();
        assert_eq!(addr, 0x8000);
        assert_eq!(cond, "A==66");
        assert_eq!(decode_bp_id(&[0x2A, 0x00]).unwrap(), 42);
    }
}
