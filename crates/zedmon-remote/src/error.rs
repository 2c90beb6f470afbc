use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use zedmon_dzrp::error::DzrpError;

use crate::eval::EvalError;

/// Error taxonomy of the mediator. The kind decides the recovery policy:
/// transport errors fail the current operation but may keep the session,
/// protocol errors tear the session down, validation errors are rejected
/// synchronously before anything touches the wire.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("no response to {op} within {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },

    #[error("protocol: {0}")]
    Protocol(#[from] DzrpError),

    #[error("protocol: unexpected response opcode {opcode:#04x}")]
    UnexpectedResponse { opcode: u8 },

    #[error("remote does not support {feature}")]
    Unsupported { feature: &'static str },

    #[error("{0}")]
    Validation(String),

    #[error("expression: {0}")]
    Expression(#[from] EvalError),

    #[error("failed to load snapshot {path}: {error}")]
    SnapshotLoadFailed { path: PathBuf, error: String },

    #[error("state file {path}: {error}")]
    StateFileFailed { path: PathBuf, error: String },
}

impl SessionError {
    /// True for errors after which the session must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Protocol(_) | SessionError::UnexpectedResponse { .. }
        )
    }
}
