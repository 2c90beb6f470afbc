//! The session facade: owns the link and every bookkeeping component, and
//! presents the consumer-facing debugging operations.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::Notify;
use tracing::{debug, info};

use zedmon_dzrp::cmd::{BreakReason, Command};
use zedmon_dzrp::constants::BP_ID_NONE;
use zedmon_dzrp::frame::encode_request;
use zedmon_dzrp::payload::{
    add_wp_args, decode_slots, get_sprite_patterns_args, get_sprites_args,
    get_sprites_palette_args, get_tbblue_reg_args, init_args, read_mem_args, remove_wp_args,
    set_border_args, set_register_args, write_bank_args, write_mem_args, InitResponse,
    PauseNotification, RemoteCaps, WpAccess,
};
use zedmon_dzrp::registers::{Reg, RegisterFile};

use crate::breakpoints::{BpId, BpKind, Breakpoint, BreakpointTable, Guard};
use crate::error::SessionError;
use crate::eval::{
    eval, parse, Ast, EvalError, Evaluated, LogTemplate, MemCache, Rendered,
};
use crate::events::{EventSink, TracingSink};
use crate::installer::Installer;
use crate::labels::{LabelResolver, NoLabels};
use crate::net::link::DzrpLink;
use crate::net::transport::{self, OutboundTx, Transport};
use crate::regs::RegisterCache;
use crate::settings::Settings;
use crate::snapshot::{self, SnapshotImage};
use crate::step::decode::{
    branch_target, instruction_len, is_block, is_call_family, is_ret, mnemonic, BranchTarget,
    MAX_INSTR_LEN,
};
use crate::step::{Pacer, PauseFacts, StepController, StepDecision, StepKind, TableOutcome};

/// Outcome of a step-over / step-into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    /// Coarse text of the instruction that was stepped.
    pub instruction: String,
    /// User-visible stop reason, `None` when the step landed normally.
    pub reason: Option<String>,
}

/// A registered watchpoint; keyed by (address, size) on removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watchpoint {
    pub address: u16,
    pub size: u16,
    pub access: WpAccess,
    pub condition: Option<String>,
}

/// Clonable handle for interrupting a running resume from another task.
/// Sends the out-of-band PAUSE command and sets the sticky manual-break
/// flag; the next classification converts the stop into "Manual break.".
#[derive(Clone)]
pub struct PauseHandle {
    out: OutboundTx,
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl PauseHandle {
    pub async fn pause(&self) -> Result<(), SessionError> {
        self.flag.store(true, Ordering::SeqCst);
        // notify_one stores a permit, so a request that lands between the
        // session's flag check and its wait is not lost.
        self.notify.notify_one();
        let frame = Bytes::from(encode_request(Command::Pause as u8, &[]));
        self.out
            .send(frame)
            .await
            .map_err(|_| SessionError::Transport("connection closed".into()))
    }
}

pub struct Session {
    link: DzrpLink,
    regs: RegisterCache,
    table: BreakpointTable,
    installer: Installer,
    watchpoints: Vec<Watchpoint>,
    caps: RemoteCaps,
    banner: String,
    settings: Settings,
    labels: Box<dyn LabelResolver>,
    events: Box<dyn EventSink>,
    pause_flag: Arc<AtomicBool>,
    pause_notify: Arc<Notify>,
    /// Guard warnings are emitted at most once per breakpoint per session.
    warned_guards: HashSet<BpId>,
}

impl Session {
    /// Connect over TCP with the default collaborators.
    pub async fn connect(settings: Settings) -> Result<Session, SessionError> {
        Self::connect_with(settings, Box::new(NoLabels), Box::new(TracingSink)).await
    }

    pub async fn connect_with(
        settings: Settings,
        labels: Box<dyn LabelResolver>,
        events: Box<dyn EventSink>,
    ) -> Result<Session, SessionError> {
        let transport = transport::connect(&settings.endpoint, settings.connect_timeout())
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        Self::attach(transport, settings, labels, events).await
    }

    /// Run INIT over an already-established transport. Entry point for
    /// serial bridges and tests that bring their own byte stream.
    pub async fn attach(
        transport: Transport,
        settings: Settings,
        labels: Box<dyn LabelResolver>,
        events: Box<dyn EventSink>,
    ) -> Result<Session, SessionError> {
        let mut link = DzrpLink::new(transport, settings.response_timeout());

        let payload = link
            .request(Command::Init, &init_args(&settings.client_name))
            .await?;
        let init = InitResponse::decode(&payload)?;
        info!(
            banner = %init.banner,
            caps = ?init.caps,
            "connected to remote"
        );

        let installer = if init.caps.contains(RemoteCaps::BREAKPOINTS) {
            Installer::software()
        } else {
            Installer::trap()
        };

        Ok(Session {
            link,
            regs: RegisterCache::default(),
            table: BreakpointTable::default(),
            installer,
            watchpoints: Vec::new(),
            caps: init.caps,
            banner: init.banner,
            settings,
            labels,
            events,
            pause_flag: Arc::new(AtomicBool::new(false)),
            pause_notify: Arc::new(Notify::new()),
            warned_guards: HashSet::new(),
        })
    }

    pub fn caps(&self) -> RemoteCaps {
        self.caps
    }

    pub fn banner(&self) -> &str {
        &self.banner
    }

    pub fn pause_handle(&self) -> PauseHandle {
        PauseHandle {
            out: self.link.outbound(),
            flag: Arc::clone(&self.pause_flag),
            notify: Arc::clone(&self.pause_notify),
        }
    }

    /// Best-effort teardown: uninstall breakpoints, then close the link.
    /// Safe to call more than once.
    pub async fn disconnect(&mut self) {
        for bp in self.table.clear() {
            if bp.is_installed() {
                let _ = self.installer.uninstall(&mut self.link, bp.remote_id).await;
            }
        }
        self.watchpoints.clear();
        self.regs.invalidate();
        self.link.disconnect();
    }

    // --- Execution control -----------------------------------------------

    /// Resume until a user-visible stop. Returns the break-reason string.
    pub async fn resume(&mut self) -> Result<String, SessionError> {
        let mut ctl = StepController::cont();
        self.drive(&mut ctl).await
    }

    pub async fn step_into(&mut self) -> Result<StepResult, SessionError> {
        let (pc, code) = self.code_at_pc().await?;
        let instruction = mnemonic(&code, pc);
        let (bp1, bp2) = self.step_into_bps(pc, &code).await?;
        let mut ctl = StepController::step_into(bp1, bp2);
        let reason = self.drive(&mut ctl).await?;
        Ok(StepResult {
            instruction,
            reason: non_empty(reason),
        })
    }

    pub async fn step_over(&mut self) -> Result<StepResult, SessionError> {
        let (pc, code) = self.code_at_pc().await?;
        let instruction = mnemonic(&code, pc);
        let len = instruction_len(&code) as u16;
        let after = pc.wrapping_add(len);

        let mut ctl = if is_call_family(code[0]) {
            // Stop either after the call or at its entry; keep resuming
            // until PC lands on the instruction after.
            let target = self.resolve_target(branch_target(&code, pc)).await?;
            StepController::step_over(after, target.filter(|t| *t != after))
        } else if is_block(code[0], code[1]) {
            // The taken branch of LDIR and friends is the instruction
            // itself; each iteration pauses and is resumed internally.
            StepController::step_over(after, Some(pc))
        } else {
            let (bp1, bp2) = self.step_into_bps(pc, &code).await?;
            StepController::step_into(bp1, bp2)
        };

        let reason = self.drive(&mut ctl).await?;
        Ok(StepResult {
            instruction,
            reason: non_empty(reason),
        })
    }

    /// Repeated step-into until a RET-family instruction executed and the
    /// stack shrank below the starting frame.
    pub async fn step_out(&mut self) -> Result<String, SessionError> {
        let regs = self.regs.fetch(&mut self.link).await?;
        let pc = regs.pc();
        let mut ctl = StepController::step_out(pc, regs.sp());
        let code = self.read_code(pc).await?;
        let (bp1, bp2) = self.step_into_bps(pc, &code).await?;
        ctl.set_inner_bps(bp1, bp2);
        self.drive(&mut ctl).await
    }

    /// The resume → pause → classify loop shared by every execution op.
    async fn drive(&mut self, ctl: &mut StepController) -> Result<String, SessionError> {
        // Resume entry: rebuild the per-address index from scratch so group
        // toggles between resumes cannot leave stale entries.
        self.table.rebuild_index();
        let mut pacer = Pacer::new(
            std::time::Duration::from_millis(self.settings.yield_interval_ms),
            std::time::Duration::from_millis(self.settings.yield_pause_ms),
            std::time::Duration::from_millis(self.settings.yield_min_gap_ms),
        );

        let (bp1, bp2) = ctl.bps();
        self.regs.invalidate();
        self.link.resume(bp1, bp2).await?;

        loop {
            let ntf = self.await_pause(ctl).await?;
            let facts = self.gather_facts(ctl, &ntf).await?;
            debug!(?facts, "classified pause");
            match ctl.on_pause(&facts) {
                StepDecision::Finish { text } => return Ok(text),
                StepDecision::Resume { bp1, bp2 } => {
                    pacer.breathe().await;
                    self.regs.invalidate();
                    self.link.resume(bp1, bp2).await?;
                }
                StepDecision::ResumeInnerStep => {
                    let code = self.read_code(facts.pc).await?;
                    let (bp1, bp2) = self.step_into_bps(facts.pc, &code).await?;
                    ctl.set_inner_bps(bp1, bp2);
                    pacer.breathe().await;
                    self.regs.invalidate();
                    self.link.resume(bp1, bp2).await?;
                }
            }
        }
    }

    /// Wait for the pause notification. Without a pending manual pause the
    /// wait is unbounded (the debuggee may legitimately run forever); once
    /// a pause was requested, the remote must answer within the response
    /// timeout or the step fails.
    async fn await_pause(
        &mut self,
        ctl: &StepController,
    ) -> Result<PauseNotification, SessionError> {
        loop {
            if self.pause_flag.load(Ordering::SeqCst) {
                let limit = Some(self.settings.response_timeout());
                return self.link.wait_pause(limit).await;
            }
            let limit = match ctl.kind() {
                StepKind::StepOut => self.settings.step_watchdog(),
                _ => None,
            };
            tokio::select! {
                ntf = self.link.wait_pause(limit) => return ntf,
                // A pause request arrived; re-enter with the tighter limit.
                _ = self.pause_notify.notified() => continue,
            }
        }
    }

    async fn gather_facts(
        &mut self,
        ctl: &StepController,
        ntf: &PauseNotification,
    ) -> Result<PauseFacts, SessionError> {
        let prev_pc = ctl.prev_pc();
        // Refresh registers first; the step-out classification depends on
        // this read happening before the bookkeeping update.
        let regs = self.regs.fetch(&mut self.link).await?;

        let prev_was_ret = if ctl.needs_ret_probe() {
            let code = self.read_code(prev_pc).await?;
            is_ret(code[0], code[1])
        } else {
            false
        };

        let table = if ntf.reason == BreakReason::BreakpointHit {
            self.evaluate_hits(ntf.address).await?
        } else {
            TableOutcome::None
        };

        let watchpoint_text = match ntf.reason {
            BreakReason::WatchpointRead => Some(self.watchpoint_text("read", ntf)),
            BreakReason::WatchpointWrite => Some(self.watchpoint_text("write", ntf)),
            _ => None,
        };

        let manual = self.pause_flag.swap(false, Ordering::SeqCst);
        Ok(PauseFacts {
            reason: ntf.reason,
            address: ntf.address,
            pc: regs.pc(),
            sp: regs.sp(),
            manual,
            table,
            prev_was_ret,
            watchpoint_text,
        })
    }

    /// Evaluate every breakpoint at a hit address. Logpoints emit and never
    /// stop; the first stopping breakpoint supplies the reason text.
    async fn evaluate_hits(&mut self, address: u16) -> Result<TableOutcome, SessionError> {
        let ids: Vec<BpId> = self.table.hits_at(address).to_vec();
        if ids.is_empty() {
            return Ok(TableOutcome::None);
        }

        let mut stop: Option<String> = None;
        for id in ids {
            let Some(bp) = self.table.get(id).cloned() else {
                continue;
            };

            let satisfied = match &bp.guard {
                None => true,
                Some(guard) => match &guard.ast {
                    None => {
                        self.warn_guard_once(id, &guard.src, "failed to parse");
                        false
                    }
                    Some(ast) => match self.eval_guard(ast).await? {
                        Ok(value) => value != 0,
                        Err(e) => {
                            self.warn_guard_once(id, &guard.src, &e.to_string());
                            false
                        }
                    },
                },
            };
            if !satisfied {
                continue;
            }

            if let Some(template) = &bp.log {
                match self.render_log(template).await? {
                    Ok(line) => self.events.log_line(&line),
                    Err(e) => self.warn_guard_once(id, &template.src, &e.to_string()),
                }
                continue;
            }

            if stop.is_none() {
                stop = Some(match bp.kind {
                    BpKind::Assert => format!(
                        "Assertion failed: {}",
                        bp.guard.as_ref().map(|g| g.src.as_str()).unwrap_or("")
                    ),
                    _ => {
                        let mut text = format!("Breakpoint hit @{address:04X}h.");
                        if let Some(guard) = &bp.guard {
                            text.push_str(&format!(" Condition: {}", guard.src));
                        }
                        text
                    }
                });
            }
        }

        Ok(match stop {
            Some(text) => TableOutcome::Stop { text },
            None => TableOutcome::Suppressed,
        })
    }

    fn watchpoint_text(&self, access: &str, ntf: &PauseNotification) -> String {
        let mut names = self.labels.labels_at(ntf.address);
        names.push(format!("{}", ntf.address));
        let mut text = format!(
            "Watchpoint {access} access at address 0x{:04X} ({}).",
            ntf.address,
            names.join(", ")
        );
        if !ntf.message.is_empty() {
            text.push(' ');
            text.push_str(&ntf.message);
        }
        text
    }

    fn warn_guard_once(&mut self, id: BpId, src: &str, why: &str) {
        if self.warned_guards.insert(id) {
            self.events.warning(&format!(
                "breakpoint {id}: `{src}`: {why}; treating as false"
            ));
        }
    }

    /// Evaluate a guard, fetching missed memory operands over the link and
    /// retrying. Transport failures propagate; evaluation failures are
    /// returned for the caller's treat-as-false policy.
    async fn eval_guard(
        &mut self,
        ast: &Ast,
    ) -> Result<Result<i64, EvalError>, SessionError> {
        let regs = self.regs.fetch(&mut self.link).await?;
        let mut mem = MemCache::default();
        // Each pass resolves at least one address; the cap only guards
        // against a pathological expression.
        for _ in 0..64 {
            match eval(ast, &regs, self.labels.as_ref(), &mem) {
                Ok(Evaluated::Value(v)) => return Ok(Ok(v)),
                Ok(Evaluated::NeedMem { addr, width }) => {
                    let bytes = self.read_memory(addr, width.byte_len()).await?;
                    mem.insert(addr, &bytes);
                }
                Err(e) => return Ok(Err(e)),
            }
        }
        Ok(Err(EvalError::MemNotSettled))
    }

    async fn render_log(
        &mut self,
        template: &LogTemplate,
    ) -> Result<Result<String, EvalError>, SessionError> {
        let regs = self.regs.fetch(&mut self.link).await?;
        let mut mem = MemCache::default();
        for _ in 0..64 {
            match template.render(&regs, self.labels.as_ref(), &mem) {
                Ok(Rendered::Text(line)) => return Ok(Ok(line)),
                Ok(Rendered::NeedMem { addr, width }) => {
                    let bytes = self.read_memory(addr, width.byte_len()).await?;
                    mem.insert(addr, &bytes);
                }
                Err(e) => return Ok(Err(e)),
            }
        }
        Ok(Err(EvalError::MemNotSettled))
    }

    // --- Ephemeral breakpoint computation --------------------------------

    async fn code_at_pc(&mut self) -> Result<(u16, [u8; MAX_INSTR_LEN]), SessionError> {
        let pc = self.regs.fetch(&mut self.link).await?.pc();
        let code = self.read_code(pc).await?;
        Ok((pc, code))
    }

    /// Read an instruction window, wrapping at the top of the address space.
    async fn read_code(&mut self, pc: u16) -> Result<[u8; MAX_INSTR_LEN], SessionError> {
        let mut code = [0u8; MAX_INSTR_LEN];
        let first = (0x10000 - pc as usize).min(MAX_INSTR_LEN);
        let bytes = self.read_memory(pc, first as u16).await?;
        code[..first].copy_from_slice(&bytes);
        if first < MAX_INSTR_LEN {
            let rest = self.read_memory(0, (MAX_INSTR_LEN - first) as u16).await?;
            code[first..].copy_from_slice(&rest);
        }
        Ok(code)
    }

    /// Fall-through plus the taken-branch target when it can be computed at
    /// step time, to tighten the stop window.
    async fn step_into_bps(
        &mut self,
        pc: u16,
        code: &[u8],
    ) -> Result<(Option<u16>, Option<u16>), SessionError> {
        let len = instruction_len(code) as u16;
        let fall = pc.wrapping_add(len);
        let target = self.resolve_target(branch_target(code, pc)).await?;
        Ok((Some(fall), target.filter(|t| *t != fall)))
    }

    async fn resolve_target(
        &mut self,
        target: BranchTarget,
    ) -> Result<Option<u16>, SessionError> {
        match target {
            BranchTarget::None => Ok(None),
            BranchTarget::Static(addr) => Ok(Some(addr)),
            BranchTarget::Reg(reg) => {
                let regs = self.regs.fetch(&mut self.link).await?;
                Ok(Some(regs.get(reg)))
            }
            BranchTarget::StackTop => {
                let sp = self.regs.fetch(&mut self.link).await?.sp();
                let bytes = self.read_memory(sp, 2).await?;
                Ok(Some(u16::from_le_bytes([bytes[0], bytes[1]])))
            }
        }
    }

    // --- Breakpoints ------------------------------------------------------

    /// Register a breakpoint. With a log template the breakpoint becomes a
    /// logpoint: it emits and never pauses. Returns 0 (with a warning) for
    /// an invalid address or when the remote rejects the add.
    pub async fn set_breakpoint(
        &mut self,
        address: i64,
        condition: Option<&str>,
        log: Option<&str>,
    ) -> Result<BpId, SessionError> {
        let Some(address) = self.validate_address(address) else {
            return Ok(BP_ID_NONE);
        };
        let log = match log {
            None => None,
            Some(src) => Some(LogTemplate::parse(src)?),
        };
        let kind = if log.is_some() { BpKind::Log } else { BpKind::User };
        self.add_breakpoint(address, kind, condition, log, None).await
    }

    /// Register an assert breakpoint. `condition` is the violation
    /// predicate: the assert fires when it evaluates true. Inactive until
    /// asserts are enabled.
    pub async fn set_assertion(
        &mut self,
        address: i64,
        condition: &str,
    ) -> Result<BpId, SessionError> {
        let Some(address) = self.validate_address(address) else {
            return Ok(BP_ID_NONE);
        };
        self.add_breakpoint(address, BpKind::Assert, Some(condition), None, None)
            .await
    }

    /// Register a grouped logpoint; active only while its group is enabled.
    pub async fn set_logpoint(
        &mut self,
        address: i64,
        group: &str,
        template: &str,
    ) -> Result<BpId, SessionError> {
        let Some(address) = self.validate_address(address) else {
            return Ok(BP_ID_NONE);
        };
        let template = LogTemplate::parse(template)?;
        self.add_breakpoint(address, BpKind::Log, None, Some(template), Some(group))
            .await
    }

    async fn add_breakpoint(
        &mut self,
        address: u16,
        kind: BpKind,
        condition: Option<&str>,
        log: Option<LogTemplate>,
        group: Option<&str>,
    ) -> Result<BpId, SessionError> {
        let guard = condition.map(|src| {
            let ast = match parse(src) {
                Ok(ast) => Some(ast),
                Err(e) => {
                    self.events.warning(&format!(
                        "breakpoint condition `{src}`: {e}; it will never trigger"
                    ));
                    None
                }
            };
            Guard {
                src: src.to_string(),
                ast,
            }
        });

        // The caller keeps this id for the breakpoint's whole lifetime;
        // remote-assigned ids are tracked separately and may change when an
        // inactive population is toggled on.
        let Some(id) = self.table.alloc_id() else {
            self.events.warning("breakpoint ids exhausted");
            return Ok(BP_ID_NONE);
        };
        let mut bp = Breakpoint {
            id,
            address,
            kind,
            guard,
            log,
            group: group.map(str::to_string),
            remote_id: BP_ID_NONE,
        };

        if self.table.is_active(&bp) {
            let remote_id = self
                .installer
                .install(&mut self.link, address, condition.unwrap_or(""))
                .await?;
            if remote_id == BP_ID_NONE {
                self.events
                    .warning(&format!("remote rejected breakpoint at {address:#06x}"));
                self.table.release_id(id);
                return Ok(BP_ID_NONE);
            }
            bp.remote_id = remote_id;
        }

        self.table
            .insert(bp)
            .expect("freshly allocated id is unique");
        Ok(id)
    }

    pub async fn remove_breakpoint(&mut self, id: BpId) -> Result<(), SessionError> {
        match self.table.remove(id) {
            None => {
                self.events
                    .warning(&format!("remove of unknown breakpoint id {id}"));
                Err(SessionError::Validation(format!(
                    "no breakpoint with id {id}"
                )))
            }
            Some(bp) => {
                if bp.is_installed() {
                    self.installer
                        .uninstall(&mut self.link, bp.remote_id)
                        .await?;
                }
                self.warned_guards.remove(&id);
                Ok(())
            }
        }
    }

    pub async fn enable_asserts(&mut self, enabled: bool) -> Result<(), SessionError> {
        if self.table.asserts_enabled() == enabled {
            return Ok(());
        }
        self.table.set_asserts_enabled(enabled);
        self.sync_installs().await
    }

    /// Enable or disable logpoint groups; `None` toggles every group.
    pub async fn enable_logpoints(
        &mut self,
        groups: Option<&[String]>,
        enabled: bool,
    ) -> Result<(), SessionError> {
        match groups {
            None => self.table.set_all_groups_enabled(enabled),
            Some(groups) => {
                for group in groups {
                    self.table.set_group_enabled(group, enabled);
                }
            }
        }
        self.sync_installs().await
    }

    /// Align remote installation with the active populations. Only the
    /// remote-assigned id changes across these transitions; the id the
    /// caller holds stays valid.
    async fn sync_installs(&mut self) -> Result<(), SessionError> {
        let mut to_disable = Vec::new();
        let mut to_enable = Vec::new();
        for kind in [BpKind::Assert, BpKind::Log] {
            for id in self.table.ids_of_kind(kind) {
                let bp = self.table.get(id).expect("id listed");
                match (bp.is_installed(), self.table.is_active(bp)) {
                    (true, false) => to_disable.push((id, bp.remote_id)),
                    (false, true) => to_enable.push(id),
                    _ => {}
                }
            }
        }

        for (id, remote_id) in to_disable {
            self.installer.uninstall(&mut self.link, remote_id).await?;
            if let Some(bp) = self.table.get_mut(id) {
                bp.remote_id = BP_ID_NONE;
            }
        }
        for id in to_enable {
            let (address, condition) = {
                let bp = self.table.get(id).expect("id listed");
                let condition = bp
                    .guard
                    .as_ref()
                    .map(|g| g.src.clone())
                    .unwrap_or_default();
                (bp.address, condition)
            };
            let remote_id = self
                .installer
                .install(&mut self.link, address, &condition)
                .await?;
            if remote_id == BP_ID_NONE {
                self.events
                    .warning(&format!("remote rejected breakpoint at {address:#06x}"));
                continue;
            }
            if let Some(bp) = self.table.get_mut(id) {
                bp.remote_id = remote_id;
            }
        }
        Ok(())
    }

    fn validate_address(&mut self, address: i64) -> Option<u16> {
        if !(0..=0xFFFF).contains(&address) {
            self.events.warning(&format!(
                "breakpoint address {address:#x} out of range, ignored"
            ));
            return None;
        }
        Some(address as u16)
    }

    // --- Watchpoints ------------------------------------------------------

    pub async fn set_watchpoint(
        &mut self,
        address: u16,
        size: u16,
        access: WpAccess,
        condition: Option<&str>,
    ) -> Result<(), SessionError> {
        if !self.caps.contains(RemoteCaps::WATCHPOINTS) {
            return Err(SessionError::Unsupported {
                feature: "watchpoints",
            });
        }
        self.link
            .request(
                Command::AddWatchpoint,
                &add_wp_args(access, address, size, condition.unwrap_or("")),
            )
            .await?;
        self.watchpoints.push(Watchpoint {
            address,
            size,
            access,
            condition: condition.map(str::to_string),
        });
        Ok(())
    }

    pub async fn remove_watchpoint(
        &mut self,
        address: u16,
        size: u16,
    ) -> Result<(), SessionError> {
        if !self.caps.contains(RemoteCaps::WATCHPOINTS) {
            return Err(SessionError::Unsupported {
                feature: "watchpoints",
            });
        }
        self.link
            .request(Command::RemoveWatchpoint, &remove_wp_args(address, size))
            .await?;
        self.watchpoints
            .retain(|wp| !(wp.address == address && wp.size == size));
        Ok(())
    }

    pub fn watchpoints(&self) -> &[Watchpoint] {
        &self.watchpoints
    }

    // --- Memory and registers ---------------------------------------------

    pub async fn read_memory(
        &mut self,
        address: u16,
        size: u16,
    ) -> Result<Vec<u8>, SessionError> {
        let payload = self
            .link
            .request(Command::ReadMem, &read_mem_args(address, size))
            .await?;
        if payload.len() != size as usize {
            return Err(SessionError::Protocol(
                zedmon_dzrp::error::DzrpError::LengthMismatch,
            ));
        }
        Ok(payload.to_vec())
    }

    pub async fn write_memory(
        &mut self,
        address: u16,
        data: &[u8],
    ) -> Result<(), SessionError> {
        self.link
            .request(Command::WriteMem, &write_mem_args(address, data))
            .await?;
        Ok(())
    }

    pub async fn get_registers(&mut self) -> Result<RegisterFile, SessionError> {
        self.regs.fetch(&mut self.link).await
    }

    /// Set a register by name. Returns the value actually applied after
    /// width masking.
    pub async fn set_register(
        &mut self,
        name: &str,
        value: u16,
    ) -> Result<u16, SessionError> {
        let reg = Reg::from_name(name).ok_or_else(|| {
            SessionError::Validation(format!("unknown register `{name}`"))
        })?;
        self.link
            .request(Command::SetRegister, &set_register_args(reg, value))
            .await?;
        self.regs.invalidate();
        let applied = if reg.width() == 1 { value & 0xFF } else { value };
        Ok(applied)
    }

    pub async fn get_slots(&mut self) -> Result<[u8; 8], SessionError> {
        let payload = self.link.request(Command::GetSlots, &[]).await?;
        Ok(decode_slots(&payload)?)
    }

    // --- Snapshots and state blobs ---------------------------------------

    /// Parse a `.sna`/`.nex` file and replay it into the remote.
    pub async fn load_snapshot(&mut self, path: &Path) -> Result<(), SessionError> {
        let image = snapshot::load(path).map_err(|e| SessionError::SnapshotLoadFailed {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        self.apply_snapshot(&image).await
    }

    async fn apply_snapshot(&mut self, image: &SnapshotImage) -> Result<(), SessionError> {
        for bank in &image.banks {
            self.link
                .request(Command::WriteBank, &write_bank_args(bank.bank, &bank.data)?)
                .await?;
        }
        if let Some(border) = image.border {
            self.link
                .request(Command::SetBorder, &set_border_args(border))
                .await?;
        }
        for (reg, value) in &image.regs {
            self.link
                .request(Command::SetRegister, &set_register_args(*reg, *value))
                .await?;
        }
        self.regs.invalidate();
        self.events.clear_call_stack();
        Ok(())
    }

    /// Fetch the remote's opaque state blob and store it gzipped.
    pub async fn save_state(&mut self, path: &Path) -> Result<(), SessionError> {
        if !self.caps.contains(RemoteCaps::STATE) {
            return Err(SessionError::Unsupported {
                feature: "state save/restore",
            });
        }
        let blob = self.link.request(Command::ReadState, &[]).await?;
        let write = || -> std::io::Result<()> {
            let file = std::fs::File::create(path)?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(&blob)?;
            encoder.finish()?;
            Ok(())
        };
        write().map_err(|e| SessionError::StateFileFailed {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    pub async fn restore_state(&mut self, path: &Path) -> Result<(), SessionError> {
        if !self.caps.contains(RemoteCaps::STATE) {
            return Err(SessionError::Unsupported {
                feature: "state save/restore",
            });
        }
        let read = || -> std::io::Result<Vec<u8>> {
            let file = std::fs::File::open(path)?;
            let mut blob = Vec::new();
            GzDecoder::new(file).read_to_end(&mut blob)?;
            Ok(blob)
        };
        let blob = read().map_err(|e| SessionError::StateFileFailed {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        self.link.request(Command::WriteState, &blob).await?;
        self.regs.invalidate();
        self.events.clear_call_stack();
        Ok(())
    }

    // --- ZX Next auxiliary passthroughs ----------------------------------

    pub async fn get_tbblue_reg(&mut self, register: u8) -> Result<u8, SessionError> {
        let payload = self
            .graphics_request(Command::GetTbblueReg, &get_tbblue_reg_args(register))
            .await?;
        payload
            .first()
            .copied()
            .ok_or(SessionError::Protocol(
                zedmon_dzrp::error::DzrpError::TooShort,
            ))
    }

    pub async fn get_sprites_palette(&mut self, palette: u8) -> Result<Vec<u8>, SessionError> {
        let payload = self
            .graphics_request(
                Command::GetSpritesPalette,
                &get_sprites_palette_args(palette),
            )
            .await?;
        Ok(payload.to_vec())
    }

    pub async fn get_sprites(&mut self, index: u8, count: u8) -> Result<Vec<u8>, SessionError> {
        let payload = self
            .graphics_request(Command::GetSprites, &get_sprites_args(index, count))
            .await?;
        Ok(payload.to_vec())
    }

    pub async fn get_sprite_patterns(
        &mut self,
        index: u16,
        count: u16,
    ) -> Result<Vec<u8>, SessionError> {
        let payload = self
            .graphics_request(
                Command::GetSpritePatterns,
                &get_sprite_patterns_args(index, count),
            )
            .await?;
        Ok(payload.to_vec())
    }

    pub async fn get_sprite_clip(&mut self) -> Result<Vec<u8>, SessionError> {
        let payload = self.graphics_request(Command::GetSpriteClip, &[]).await?;
        Ok(payload.to_vec())
    }

    pub async fn set_border(&mut self, color: u8) -> Result<(), SessionError> {
        self.link
            .request(Command::SetBorder, &set_border_args(color))
            .await?;
        Ok(())
    }

    async fn graphics_request(
        &mut self,
        cmd: Command,
        args: &[u8],
    ) -> Result<Bytes, SessionError> {
        if !self.caps.contains(RemoteCaps::NEXT_GRAPHICS) {
            return Err(SessionError::Unsupported {
                feature: "ZX Next graphics queries",
            });
        }
        self.link.request(cmd, args).await
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
