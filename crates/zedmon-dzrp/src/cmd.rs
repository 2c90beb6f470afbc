//! Command and notification opcode registry.
//!
//! Opcodes are fixed by the remote side of the protocol, so this is a plain
//! enum with explicit discriminants rather than anything auto-assigned.

use crate::constants::RESPONSE_FLAG;
use crate::error::DzrpError;

/// Request opcodes. A response frame echoes the opcode with bit 7 set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Init = 1,
    GetRegisters = 2,
    SetRegister = 3,
    WriteBank = 4,
    Continue = 5,
    Pause = 6,
    AddBreakpoint = 7,
    RemoveBreakpoint = 8,
    AddWatchpoint = 9,
    RemoveWatchpoint = 0x0A,
    ReadMem = 0x0B,
    WriteMem = 0x0C,
    GetSlots = 0x0D,
    ReadState = 0x0E,
    WriteState = 0x0F,
    GetTbblueReg = 0x10,
    GetSpritesPalette = 0x11,
    GetSprites = 0x12,
    GetSpritePatterns = 0x13,
    GetSpriteClip = 0x14,
    SetBorder = 0x15,
}

impl Command {
    pub fn from_repr(op: u8) -> Option<Command> {
        use Command::*;
        Some(match op {
            1 => Init,
            2 => GetRegisters,
            3 => SetRegister,
            4 => WriteBank,
            5 => Continue,
            6 => Pause,
            7 => AddBreakpoint,
            8 => RemoveBreakpoint,
            9 => AddWatchpoint,
            0x0A => RemoveWatchpoint,
            0x0B => ReadMem,
            0x0C => WriteMem,
            0x0D => GetSlots,
            0x0E => ReadState,
            0x0F => WriteState,
            0x10 => GetTbblueReg,
            0x11 => GetSpritesPalette,
            0x12 => GetSprites,
            0x13 => GetSpritePatterns,
            0x14 => GetSpriteClip,
            0x15 => SetBorder,
            _ => return None,
        })
    }

    /// Opcode the remote uses to answer this command.
    pub fn response_opcode(self) -> u8 {
        self as u8 | RESPONSE_FLAG
    }

    /// Stable name for timeout/log messages.
    pub fn name(self) -> &'static str {
        use Command::*;
        match self {
            Init => "INIT",
            GetRegisters => "GET_REGISTERS",
            SetRegister => "SET_REGISTER",
            WriteBank => "WRITE_BANK",
            Continue => "CONTINUE",
            Pause => "PAUSE",
            AddBreakpoint => "ADD_BP",
            RemoveBreakpoint => "REMOVE_BP",
            AddWatchpoint => "ADD_WP",
            RemoveWatchpoint => "REMOVE_WP",
            ReadMem => "READ_MEM",
            WriteMem => "WRITE_MEM",
            GetSlots => "GET_SLOTS",
            ReadState => "READ_STATE",
            WriteState => "WRITE_STATE",
            GetTbblueReg => "GET_TBBLUE_REG",
            GetSpritesPalette => "GET_SPRITES_PAL",
            GetSprites => "GET_SPRITES",
            GetSpritePatterns => "GET_SPRITE_PATTERNS",
            GetSpriteClip => "GET_SPRITE_CLIP",
            SetBorder => "SET_BORDER",
        }
    }
}

/// Asynchronous notification opcodes. A disjoint number space from commands;
/// distinguished on the wire by bit 7 being clear on an unsolicited frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Notification {
    Pause = 1,
}

impl Notification {
    pub fn from_repr(op: u8) -> Option<Notification> {
        match op {
            1 => Some(Notification::Pause),
            _ => None,
        }
    }
}

/// Break number carried in a pause notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakReason {
    NoReason = 0,
    ManualBreak = 1,
    BreakpointHit = 2,
    WatchpointRead = 3,
    WatchpointWrite = 4,
}

impl BreakReason {
    pub fn from_repr(value: u8) -> Result<BreakReason, DzrpError> {
        use BreakReason::*;
        Ok(match value {
            0 => NoReason,
            1 => ManualBreak,
            2 => BreakpointHit,
            3 => WatchpointRead,
            4 => WatchpointWrite,
            other => return Err(DzrpError::UnknownBreakReason(other)),
        })
    }
}
