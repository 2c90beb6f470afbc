//! Register cache: the sole read path for CPU state between pauses.
//!
//! Single writer (the link installs a fresh snapshot on GET_REGISTERS
//! completion), single reader (stepping logic and the condition evaluator).
//! Reads while invalid go through [`RegisterCache::fetch`], which is the
//! only accessor, so a stale read is unrepresentable.

use zedmon_dzrp::cmd::Command;
use zedmon_dzrp::registers::RegisterFile;

use crate::error::SessionError;
use crate::net::link::DzrpLink;

#[derive(Default)]
pub(crate) struct RegisterCache {
    file: Option<RegisterFile>,
}

impl RegisterCache {
    /// Invalidation points: before every resume, on SET_REGISTER, on
    /// snapshot/state load, on disconnect.
    pub fn invalidate(&mut self) {
        self.file = None;
    }

    pub fn is_valid(&self) -> bool {
        self.file.is_some()
    }

    /// Get the cached snapshot, fetching it over the link if invalid.
    pub async fn fetch(&mut self, link: &mut DzrpLink) -> Result<RegisterFile, SessionError> {
        if let Some(file) = self.file {
            return Ok(file);
        }
        let payload = link.request(Command::GetRegisters, &[]).await?;
        let file = RegisterFile::decode(&payload)?;
        self.file = Some(file);
        Ok(file)
    }
}
