use thiserror::Error;

#[derive(Debug, Error)]
pub enum DzrpError {
    #[error("buffer too short")]
    TooShort,
    #[error("frame length mismatch")]
    LengthMismatch,
    #[error("frame too large: {0}")]
    FrameTooLarge(usize),
    #[error("unknown channel: {0}")]
    UnknownChannel(u8),
    #[error("unknown command opcode: {0:#04x}")]
    UnknownCommand(u8),
    #[error("unknown notification opcode: {0:#04x}")]
    UnknownNotification(u8),
    #[error("unknown break reason: {0}")]
    UnknownBreakReason(u8),
    #[error("invalid register index: {0}")]
    BadRegisterIndex(u8),
    #[error("malformed string field")]
    BadString,
    #[error("remote speaks DZRP {remote:?}, expected {local:?}")]
    VersionMismatch { remote: [u8; 3], local: [u8; 3] },
}
