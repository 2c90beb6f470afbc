//! Stepping controller: continue / step-over / step-into / step-out
//! synthesized over `CONTINUE(bp1?, bp2?)` and pause notifications.
//!
//! The controller is a plain state machine: the session gathers the facts a
//! classification needs (refreshed registers, table evaluation, the RET
//! probe for step-out) and feeds them to [`StepController::on_pause`], which
//! returns what to do next. No I/O and no stored callbacks in here, so the
//! stop-condition logic is testable by itself.

pub mod decode;

use std::time::Duration;

use tokio::time::Instant;

use zedmon_dzrp::cmd::BreakReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Continue,
    StepOver,
    StepInto,
    StepOut,
}

/// What the breakpoint table said about a pause address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TableOutcome {
    /// No persistent breakpoint there — an ephemeral landing, or a stop only
    /// the remote knows about.
    None,
    /// A breakpoint with a satisfied (or absent) condition; user-visible.
    Stop { text: String },
    /// Breakpoints were present but none wants a stop: conditions false, or
    /// logpoints that already emitted their lines.
    Suppressed,
}

/// Everything one classification pass looks at.
#[derive(Debug)]
pub(crate) struct PauseFacts {
    pub reason: BreakReason,
    /// Address reported by the notification.
    pub address: u16,
    /// Refreshed register state.
    pub pc: u16,
    pub sp: u16,
    /// Sticky manual-pause flag was set when the pause arrived.
    pub manual: bool,
    pub table: TableOutcome,
    /// `is_ret` over the bytes at the PC of the previous resume; only
    /// gathered for step-out.
    pub prev_was_ret: bool,
    /// Pre-formatted watchpoint reason (needs the label resolver).
    pub watchpoint_text: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StepDecision {
    /// Issue another CONTINUE with the same ephemeral breakpoints.
    Resume { bp1: Option<u16>, bp2: Option<u16> },
    /// Step-out inner iteration: compute fresh step-into breakpoints at the
    /// current PC, then resume.
    ResumeInnerStep,
    /// Surface the pause. An empty text means a plain step landing.
    Finish { text: String },
}

pub(crate) struct StepController {
    kind: StepKind,
    bp1: Option<u16>,
    bp2: Option<u16>,
    /// Step-over: the fall-through address that completes the step.
    after: Option<u16>,
    /// Step-out bookkeeping.
    start_sp: u16,
    prev_sp: u16,
    prev_pc: u16,
}

impl StepController {
    pub fn cont() -> Self {
        Self::new(StepKind::Continue, None, None, None, 0, 0)
    }

    pub fn step_into(bp1: Option<u16>, bp2: Option<u16>) -> Self {
        Self::new(StepKind::StepInto, bp1, bp2, None, 0, 0)
    }

    pub fn step_over(after: u16, bp2: Option<u16>) -> Self {
        Self::new(StepKind::StepOver, Some(after), bp2, Some(after), 0, 0)
    }

    /// `pc`/`sp` as of the moment the step-out is issued.
    pub fn step_out(pc: u16, sp: u16) -> Self {
        Self::new(StepKind::StepOut, None, None, None, sp, pc)
    }

    fn new(
        kind: StepKind,
        bp1: Option<u16>,
        bp2: Option<u16>,
        after: Option<u16>,
        sp: u16,
        pc: u16,
    ) -> Self {
        Self {
            kind,
            bp1,
            bp2,
            after,
            start_sp: sp,
            prev_sp: sp,
            prev_pc: pc,
        }
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn bps(&self) -> (Option<u16>, Option<u16>) {
        (self.bp1, self.bp2)
    }

    /// Ephemeral breakpoints for a step-out inner iteration.
    pub fn set_inner_bps(&mut self, bp1: Option<u16>, bp2: Option<u16>) {
        self.bp1 = bp1;
        self.bp2 = bp2;
    }

    pub fn needs_ret_probe(&self) -> bool {
        self.kind == StepKind::StepOut
    }

    /// PC at the moment the previous resume was issued.
    pub fn prev_pc(&self) -> u16 {
        self.prev_pc
    }

    pub fn on_pause(&mut self, facts: &PauseFacts) -> StepDecision {
        // A satisfied persistent breakpoint always short-circuits.
        if let TableOutcome::Stop { text } = &facts.table {
            return StepDecision::Finish { text: text.clone() };
        }
        if facts.manual || facts.reason == BreakReason::ManualBreak {
            return StepDecision::Finish {
                text: "Manual break.".into(),
            };
        }
        if matches!(
            facts.reason,
            BreakReason::WatchpointRead | BreakReason::WatchpointWrite
        ) {
            return StepDecision::Finish {
                text: facts.watchpoint_text.clone().unwrap_or_default(),
            };
        }

        let suppressed = facts.table == TableOutcome::Suppressed;
        match self.kind {
            StepKind::Continue => {
                if suppressed {
                    StepDecision::Resume {
                        bp1: self.bp1,
                        bp2: self.bp2,
                    }
                } else {
                    StepDecision::Finish {
                        text: plain_reason_text(facts),
                    }
                }
            }
            // The window is one instruction; any landing ends the step.
            StepKind::StepInto => StepDecision::Finish {
                text: String::new(),
            },
            StepKind::StepOver => {
                if Some(facts.pc) == self.after {
                    StepDecision::Finish {
                        text: String::new(),
                    }
                } else {
                    StepDecision::Resume {
                        bp1: self.bp1,
                        bp2: self.bp2,
                    }
                }
            }
            StepKind::StepOut => {
                let popped = facts.sp > self.start_sp && facts.sp > self.prev_sp;
                if popped && facts.prev_was_ret {
                    StepDecision::Finish {
                        text: String::new(),
                    }
                } else {
                    self.prev_pc = facts.pc;
                    self.prev_sp = facts.sp;
                    StepDecision::ResumeInnerStep
                }
            }
        }
    }
}

fn plain_reason_text(facts: &PauseFacts) -> String {
    match facts.reason {
        BreakReason::NoReason => String::new(),
        BreakReason::BreakpointHit => format!("Breakpoint hit @{:04X}h.", facts.address),
        // Manual and watchpoint reasons never reach here.
        _ => String::new(),
    }
}

/// Cooperative yields for long step-out and continue loops, so a host UI on
/// the same executor stays responsive.
pub(crate) struct Pacer {
    interval: Duration,
    pause: Duration,
    window_start: Instant,
}

impl Pacer {
    pub fn new(interval: Duration, pause: Duration, min_gap: Duration) -> Self {
        Self {
            interval: interval.max(min_gap),
            pause,
            window_start: Instant::now(),
        }
    }

    pub async fn breathe(&mut self) {
        if self.interval.is_zero() {
            return;
        }
        if self.window_start.elapsed() >= self.interval {
            tokio::time::sleep(self.pause).await;
            self.window_start = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(reason: BreakReason, pc: u16, sp: u16) -> PauseFacts {
        PauseFacts {
            reason,
            address: pc,
            pc,
            sp,
            manual: false,
            table: TableOutcome::None,
            prev_was_ret: false,
            watchpoint_text: None,
        }
    }

    #[test]
    fn step_over_finishes_only_at_the_after_address() {
        let mut ctl = StepController::step_over(0x7003, Some(0x1234));
        assert_eq!(ctl.bps(), (Some(0x7003), Some(0x1234)));

        // Landing inside the subroutine resumes with the same breakpoints.
        let inside = facts(BreakReason::NoReason, 0x1234, 0xFFF0);
        assert_eq!(
            ctl.on_pause(&inside),
            StepDecision::Resume {
                bp1: Some(0x7003),
                bp2: Some(0x1234),
            }
        );

        let done = facts(BreakReason::NoReason, 0x7003, 0xFFF2);
        assert_eq!(
            ctl.on_pause(&done),
            StepDecision::Finish {
                text: String::new()
            }
        );
    }

    #[test]
    fn step_out_requires_pop_and_ret() {
        // Matches the conditional-return scenario: RET NZ not taken, then RET.
        let mut ctl = StepController::step_out(0x4000, 0xFF00);

        // SP unchanged after RET NZ with Z set: keep stepping.
        let mut not_taken = facts(BreakReason::NoReason, 0x4001, 0xFF00);
        not_taken.prev_was_ret = true;
        assert_eq!(ctl.on_pause(&not_taken), StepDecision::ResumeInnerStep);

        // SP popped but the previous instruction was not a RET (e.g. POP).
        let popped_no_ret = facts(BreakReason::NoReason, 0x4002, 0xFF02);
        assert_eq!(ctl.on_pause(&popped_no_ret), StepDecision::ResumeInnerStep);
        // That pop raised prev_sp, so the next check compares against it.

        let mut returned = facts(BreakReason::NoReason, 0x9000, 0xFF04);
        returned.prev_was_ret = true;
        assert_eq!(
            ctl.on_pause(&returned),
            StepDecision::Finish {
                text: String::new()
            }
        );
    }

    #[test]
    fn step_out_push_pop_pairs_do_not_terminate() {
        let mut ctl = StepController::step_out(0x4000, 0xFF00);

        // PUSH: SP drops.
        let push = facts(BreakReason::NoReason, 0x4001, 0xFEFE);
        assert_eq!(ctl.on_pause(&push), StepDecision::ResumeInnerStep);

        // POP back to the start level: not above start_sp, keep going even
        // though a RET opcode happened to sit at the previous PC.
        let mut pop = facts(BreakReason::NoReason, 0x4002, 0xFF00);
        pop.prev_was_ret = true;
        assert_eq!(ctl.on_pause(&pop), StepDecision::ResumeInnerStep);
    }

    #[test]
    fn manual_break_converts_any_stop() {
        let mut ctl = StepController::step_out(0x4000, 0xFF00);
        let mut paused = facts(BreakReason::NoReason, 0x4001, 0xFF00);
        paused.manual = true;
        assert_eq!(
            ctl.on_pause(&paused),
            StepDecision::Finish {
                text: "Manual break.".into()
            }
        );
    }

    #[test]
    fn real_breakpoints_short_circuit_step_out() {
        let mut ctl = StepController::step_out(0x4000, 0xFF00);
        let mut hit = facts(BreakReason::BreakpointHit, 0x5000, 0xFF00);
        hit.table = TableOutcome::Stop {
            text: "Breakpoint hit @5000h.".into(),
        };
        assert_eq!(
            ctl.on_pause(&hit),
            StepDecision::Finish {
                text: "Breakpoint hit @5000h.".into()
            }
        );
    }

    #[test]
    fn continue_resumes_past_suppressed_hits() {
        let mut ctl = StepController::cont();
        let mut hit = facts(BreakReason::BreakpointHit, 0x9000, 0xFF00);
        hit.table = TableOutcome::Suppressed;
        assert_eq!(
            ctl.on_pause(&hit),
            StepDecision::Resume {
                bp1: None,
                bp2: None
            }
        );

        let mut stop = facts(BreakReason::BreakpointHit, 0x8000, 0xFF00);
        stop.table = TableOutcome::Stop {
            text: "Breakpoint hit @8000h.".into(),
        };
        assert_eq!(
            ctl.on_pause(&stop),
            StepDecision::Finish {
                text: "Breakpoint hit @8000h.".into()
            }
        );
    }

    #[test]
    fn step_into_ends_on_first_landing() {
        let mut ctl = StepController::step_into(Some(0x8001), None);
        let landing = facts(BreakReason::NoReason, 0x8001, 0xFF00);
        assert_eq!(
            ctl.on_pause(&landing),
            StepDecision::Finish {
                text: String::new()
            }
        );
    }
}
