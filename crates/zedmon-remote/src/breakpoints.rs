//! Breakpoint, assertion and logpoint bookkeeping.
//!
//! Three populations compose into the per-address index: user breakpoints,
//! assert breakpoints (active only while asserts are enabled), and active
//! logpoints. The index is a cache, not truth: it is rebuilt from scratch on
//! the entry of every resume, so group toggles between resumes can never
//! leave stale entries behind.

use std::collections::{HashMap, HashSet};

use crate::eval::{Ast, LogTemplate};

pub type BpId = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BpKind {
    User,
    Assert,
    Log,
}

/// A guard expression as the front-end wrote it. `ast` is `None` when the
/// source failed to parse; such a guard evaluates as false and warns once.
#[derive(Debug, Clone)]
pub struct Guard {
    pub src: String,
    pub ast: Option<Ast>,
}

#[derive(Debug, Clone)]
pub struct Breakpoint {
    /// Caller-visible id, allocated by [`BreakpointTable::alloc_id`] and
    /// stable for the breakpoint's whole lifetime.
    pub id: BpId,
    pub address: u16,
    pub kind: BpKind,
    pub guard: Option<Guard>,
    pub log: Option<LogTemplate>,
    /// Logpoint group; `None` means the logpoint was attached to a user
    /// breakpoint and is always active.
    pub group: Option<String>,
    /// Id the remote assigned on install; 0 while not installed. Changes
    /// across park/install transitions, unlike `id`.
    pub(crate) remote_id: BpId,
}

impl Breakpoint {
    pub(crate) fn is_installed(&self) -> bool {
        self.remote_id != 0
    }
}

#[derive(Default)]
pub struct BreakpointTable {
    by_id: HashMap<BpId, Breakpoint>,
    next_id: BpId,
    free_ids: Vec<BpId>,
    asserts_enabled: bool,
    enabled_groups: HashSet<String>,
    /// Address → breakpoints to evaluate on a hit there. Rebuilt on resume.
    index: HashMap<u16, Vec<BpId>>,
}

impl BreakpointTable {
    /// Allocate a caller-visible id (1..=0xFFFF). `None` when exhausted.
    pub fn alloc_id(&mut self) -> Option<BpId> {
        if let Some(id) = self.free_ids.pop() {
            return Some(id);
        }
        if self.next_id == u16::MAX {
            return None;
        }
        self.next_id += 1;
        Some(self.next_id)
    }

    /// Return an allocated id that never made it into the table.
    pub fn release_id(&mut self, id: BpId) {
        self.free_ids.push(id);
    }

    pub fn insert(&mut self, bp: Breakpoint) -> Result<(), BpId> {
        if self.by_id.contains_key(&bp.id) {
            return Err(bp.id);
        }
        self.by_id.insert(bp.id, bp);
        Ok(())
    }

    /// Removal frees the id for reuse by a later allocation.
    pub fn remove(&mut self, id: BpId) -> Option<Breakpoint> {
        let bp = self.by_id.remove(&id)?;
        self.free_ids.push(id);
        Some(bp)
    }

    pub fn get(&self, id: BpId) -> Option<&Breakpoint> {
        self.by_id.get(&id)
    }

    pub fn get_mut(&mut self, id: BpId) -> Option<&mut Breakpoint> {
        self.by_id.get_mut(&id)
    }

    pub fn clear(&mut self) -> Vec<Breakpoint> {
        self.index.clear();
        self.free_ids.clear();
        self.next_id = 0;
        self.by_id.drain().map(|(_, bp)| bp).collect()
    }

    pub fn asserts_enabled(&self) -> bool {
        self.asserts_enabled
    }

    pub fn set_asserts_enabled(&mut self, enabled: bool) {
        self.asserts_enabled = enabled;
    }

    pub fn set_group_enabled(&mut self, group: &str, enabled: bool) {
        if enabled {
            self.enabled_groups.insert(group.to_string());
        } else {
            self.enabled_groups.remove(group);
        }
    }

    /// Toggle every group seen on any logpoint.
    pub fn set_all_groups_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.enabled_groups.clear();
            return;
        }
        let groups: Vec<String> = self
            .by_id
            .values()
            .filter_map(|bp| bp.group.clone())
            .collect();
        self.enabled_groups.extend(groups);
    }

    /// Whether a breakpoint participates in the next resume.
    pub fn is_active(&self, bp: &Breakpoint) -> bool {
        match bp.kind {
            BpKind::User => true,
            BpKind::Assert => self.asserts_enabled,
            BpKind::Log => match &bp.group {
                None => true,
                Some(group) => self.enabled_groups.contains(group),
            },
        }
    }

    /// Ids of breakpoints of `kind`, in no particular order.
    pub fn ids_of_kind(&self, kind: BpKind) -> Vec<BpId> {
        self.by_id
            .values()
            .filter(|bp| bp.kind == kind)
            .map(|bp| bp.id)
            .collect()
    }

    /// Rebuild the per-address index from scratch. O(N) in breakpoint count.
    pub fn rebuild_index(&mut self) {
        self.index.clear();
        let active: Vec<(u16, BpId)> = self
            .by_id
            .values()
            .filter(|bp| self.is_active(bp))
            .map(|bp| (bp.address, bp.id))
            .collect();
        for (address, id) in active {
            self.index.entry(address).or_default().push(id);
        }
        // Deterministic evaluation order on multi-breakpoint addresses.
        for ids in self.index.values_mut() {
            ids.sort_unstable();
        }
    }

    /// Breakpoints to evaluate for a hit at `address`, per the last rebuild.
    pub fn hits_at(&self, address: u16) -> &[BpId] {
        self.index.get(&address).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
