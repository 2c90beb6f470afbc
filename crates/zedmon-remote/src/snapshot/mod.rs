//! Snapshot-file ingestion: parse `.sna` / `.nex` images into a neutral
//! replay plan of bank writes and register assignments. Applying the plan
//! over the link is the session's job.

pub mod nex;
pub mod sna;

use std::path::Path;

use thiserror::Error;

use zedmon_dzrp::constants::BANK_SIZE;
use zedmon_dzrp::registers::Reg;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown snapshot extension `{0}`")]
    UnknownExtension(String),
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported version `{0}`")]
    UnsupportedVersion(String),
    #[error("truncated file")]
    Truncated,
    #[error("{0}")]
    Invalid(String),
}

/// One 8 KiB bank write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankWrite {
    pub bank: u8,
    pub data: Vec<u8>,
}

/// A parsed snapshot, ready to replay as WRITE_BANK + SET_REGISTER
/// sequences. `regs` is ordered; PC comes last when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotImage {
    pub banks: Vec<BankWrite>,
    pub regs: Vec<(Reg, u16)>,
    pub border: Option<u8>,
}

/// Split one 16 KiB bank into its two 8 KiB halves: bank `n` maps to the
/// remote's banks `2n` and `2n+1`.
pub(crate) fn split_bank16(bank16: u8, data: &[u8]) -> [BankWrite; 2] {
    debug_assert_eq!(data.len(), 2 * BANK_SIZE);
    [
        BankWrite {
            bank: 2 * bank16,
            data: data[..BANK_SIZE].to_vec(),
        },
        BankWrite {
            bank: 2 * bank16 + 1,
            data: data[BANK_SIZE..].to_vec(),
        },
    ]
}

/// Parse a snapshot file, dispatching on the extension.
pub fn load(path: &Path) -> Result<SnapshotImage, SnapshotError> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_ascii_lowercase);
    let data = std::fs::read(path)?;
    match ext.as_deref() {
        Some("sna") => sna::parse(&data),
        Some("nex") => nex::parse(&data),
        other => Err(SnapshotError::UnknownExtension(
            other.unwrap_or("").to_string(),
        )),
    }
}
