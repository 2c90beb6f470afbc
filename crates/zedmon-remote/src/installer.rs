//! Breakpoint installation paths.
//!
//! A remote with native breakpoint support takes the plain ADD_BP/REMOVE_BP
//! route. A remote that traps via opcode substitution needs the displaced
//! byte read and recorded before the add, and restored after the remove —
//! the add is refused if that first read fails, otherwise the restore
//! invariant could not hold. Session code never inspects which path is
//! active.

use std::collections::HashMap;

use tracing::trace;

use zedmon_dzrp::cmd::Command;
use zedmon_dzrp::constants::BP_ID_NONE;
use zedmon_dzrp::error::DzrpError;
use zedmon_dzrp::payload::{
    add_bp_args, decode_bp_id, read_mem_args, remove_bp_args, write_mem_args,
};

use crate::breakpoints::BpId;
use crate::error::SessionError;
use crate::net::link::DzrpLink;

/// The byte a trap displaced; restored on removal.
#[derive(Debug, Clone, Copy)]
struct Displaced {
    address: u16,
    opcode: u8,
}

pub(crate) enum Installer {
    Software,
    Trap { displaced: HashMap<BpId, Displaced> },
}

impl Installer {
    pub fn software() -> Self {
        Installer::Software
    }

    pub fn trap() -> Self {
        Installer::Trap {
            displaced: HashMap::new(),
        }
    }

    /// Install a breakpoint address on the remote; returns the assigned id,
    /// [`BP_ID_NONE`] when the remote rejected it.
    pub async fn install(
        &mut self,
        link: &mut DzrpLink,
        address: u16,
        condition: &str,
    ) -> Result<BpId, SessionError> {
        let probed = match self {
            Installer::Software => None,
            Installer::Trap { .. } => {
                // Read the byte to displace first; without it a later
                // removal could not restore memory.
                let payload = link
                    .request(Command::ReadMem, &read_mem_args(address, 1))
                    .await?;
                let opcode = payload.first().copied().ok_or(DzrpError::TooShort)?;
                Some(Displaced { address, opcode })
            }
        };

        let payload = link
            .request(Command::AddBreakpoint, &add_bp_args(address, condition))
            .await?;
        let id = decode_bp_id(&payload)?;
        if id == BP_ID_NONE {
            return Ok(BP_ID_NONE);
        }

        if let (Installer::Trap { displaced }, Some(probe)) = (self, probed) {
            trace!(id, address, opcode = probe.opcode, "trap installed");
            displaced.insert(id, probe);
        }
        Ok(id)
    }

    /// Remove a breakpoint; for trap remotes, restore the displaced byte
    /// afterwards so memory is back to its pre-install content.
    pub async fn uninstall(
        &mut self,
        link: &mut DzrpLink,
        id: BpId,
    ) -> Result<(), SessionError> {
        link.request(Command::RemoveBreakpoint, &remove_bp_args(id))
            .await?;
        if let Installer::Trap { displaced } = self {
            if let Some(probe) = displaced.remove(&id) {
                trace!(id, address = probe.address, "restoring displaced byte");
                link.request(
                    Command::WriteMem,
                    &write_mem_args(probe.address, &[probe.opcode]),
                )
                .await?;
            }
        }
        Ok(())
    }
}
