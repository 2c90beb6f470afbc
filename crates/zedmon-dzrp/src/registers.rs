//! Canonical register ordering and the register-file wire type.
//!
//! Encoding rules:
//! - A GET_REGISTERS response is exactly [`RegisterFile::WIRE_LEN`] bytes:
//!   fifteen little-endian words in [`Reg`] index order. I, R and IM travel
//!   as words with a zero high byte.
//! - SET_REGISTER addresses a [`Reg`] index; the value width on the wire is
//!   implied by the index (see [`Reg::width`]). Indices 15.. are 8-bit views
//!   into their containing word and exist only for SET_REGISTER.

use crate::error::DzrpError;

/// Register index assignment shared with the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Pc = 0,
    Sp = 1,
    Af = 2,
    Bc = 3,
    De = 4,
    Hl = 5,
    Ix = 6,
    Iy = 7,
    Af2 = 8,
    Bc2 = 9,
    De2 = 10,
    Hl2 = 11,
    I = 12,
    R = 13,
    Im = 14,
    // 8-bit halves, SET_REGISTER only.
    A = 15,
    F = 16,
    B = 17,
    C = 18,
    D = 19,
    E = 20,
    H = 21,
    L = 22,
}

/// Which half of the containing word an 8-bit index addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Half {
    High,
    Low,
}

impl Reg {
    pub fn from_repr(index: u8) -> Result<Reg, DzrpError> {
        use Reg::*;
        Ok(match index {
            0 => Pc,
            1 => Sp,
            2 => Af,
            3 => Bc,
            4 => De,
            5 => Hl,
            6 => Ix,
            7 => Iy,
            8 => Af2,
            9 => Bc2,
            10 => De2,
            11 => Hl2,
            12 => I,
            13 => R,
            14 => Im,
            15 => A,
            16 => F,
            17 => B,
            18 => C,
            19 => D,
            20 => E,
            21 => H,
            22 => L,
            other => return Err(DzrpError::BadRegisterIndex(other)),
        })
    }

    /// Parse a register name as written in condition expressions. Shadow
    /// registers use the `'` suffix. Case-insensitive.
    pub fn from_name(name: &str) -> Option<Reg> {
        use Reg::*;
        Some(match name.to_ascii_uppercase().as_str() {
            "PC" => Pc,
            "SP" => Sp,
            "AF" => Af,
            "BC" => Bc,
            "DE" => De,
            "HL" => Hl,
            "IX" => Ix,
            "IY" => Iy,
            "AF'" => Af2,
            "BC'" => Bc2,
            "DE'" => De2,
            "HL'" => Hl2,
            "I" => I,
            "R" => R,
            "IM" => Im,
            "A" => A,
            "F" => F,
            "B" => B,
            "C" => C,
            "D" => D,
            "E" => E,
            "H" => H,
            "L" => L,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use Reg::*;
        match self {
            Pc => "PC",
            Sp => "SP",
            Af => "AF",
            Bc => "BC",
            De => "DE",
            Hl => "HL",
            Ix => "IX",
            Iy => "IY",
            Af2 => "AF'",
            Bc2 => "BC'",
            De2 => "DE'",
            Hl2 => "HL'",
            I => "I",
            R => "R",
            Im => "IM",
            A => "A",
            F => "F",
            B => "B",
            C => "C",
            D => "D",
            E => "E",
            H => "H",
            L => "L",
        }
    }

    /// Wire width of a SET_REGISTER value for this index.
    pub fn width(self) -> usize {
        use Reg::*;
        match self {
            Pc | Sp | Af | Bc | De | Hl | Ix | Iy | Af2 | Bc2 | De2 | Hl2 => 2,
            _ => 1,
        }
    }

    /// The word slot this index lives in, and the half for 8-bit views.
    fn word_slot(self) -> (usize, Option<Half>) {
        use Reg::*;
        match self {
            A => (Af as usize, Some(Half::High)),
            F => (Af as usize, Some(Half::Low)),
            B => (Bc as usize, Some(Half::High)),
            C => (Bc as usize, Some(Half::Low)),
            D => (De as usize, Some(Half::High)),
            E => (De as usize, Some(Half::Low)),
            H => (Hl as usize, Some(Half::High)),
            L => (Hl as usize, Some(Half::Low)),
            word => (word as usize, None),
        }
    }
}

/// A complete register snapshot in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterFile {
    words: [u16; RegisterFile::WORD_COUNT],
}

impl RegisterFile {
    pub const WORD_COUNT: usize = 15;
    pub const WIRE_LEN: usize = Self::WORD_COUNT * 2;

    pub fn decode(payload: &[u8]) -> Result<RegisterFile, DzrpError> {
        if payload.len() != Self::WIRE_LEN {
            return Err(DzrpError::LengthMismatch);
        }
        let mut words = [0u16; Self::WORD_COUNT];
        for (i, word) in words.iter_mut().enumerate() {
            *word = u16::from_le_bytes([payload[2 * i], payload[2 * i + 1]]);
        }
        Ok(RegisterFile { words })
    }

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        for (i, word) in self.words.iter().enumerate() {
            out[2 * i..2 * i + 2].copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Read any register, widening 8-bit views to u16.
    pub fn get(&self, reg: Reg) -> u16 {
        let (slot, half) = reg.word_slot();
        let word = self.words[slot];
        match half {
            None => word,
            Some(Half::High) => word >> 8,
            Some(Half::Low) => word & 0xFF,
        }
    }

    /// Write any register; 8-bit views fold into their containing word.
    /// Returns the value actually applied after width masking.
    pub fn set(&mut self, reg: Reg, value: u16) -> u16 {
        let (slot, half) = reg.word_slot();
        match half {
            None => {
                let applied = if reg.width() == 1 { value & 0xFF } else { value };
                self.words[slot] = applied;
                applied
            }
            Some(Half::High) => {
                let applied = value & 0xFF;
                self.words[slot] = (self.words[slot] & 0x00FF) | (applied << 8);
                applied
            }
            Some(Half::Low) => {
                let applied = value & 0xFF;
                self.words[slot] = (self.words[slot] & 0xFF00) | applied;
                applied
            }
        }
    }

    pub fn pc(&self) -> u16 {
        self.get(Reg::Pc)
    }

    pub fn sp(&self) -> u16 {
        self.get(Reg::Sp)
    }

    pub fn a(&self) -> u8 {
        self.get(Reg::A) as u8
    }

    pub fn hl(&self) -> u16 {
        self.get(Reg::Hl)
    }
}
