//! The stepping engine (§4.4): continue/single-step/step-into/step-over/
//! step-out, plus the recursion guard and thread-boundary bookkeeping that
//! apply to every stop while internal breakpoints are outstanding.
//!
//! Every operation here assumes the subordinate is already stopped at a
//! known PC — the caller (the engine's control thread) owns making that
//! true before calling in.

use crate::address::{GlobalAddress, RelocatedAddress};
use crate::breakpoint::BreakpointManager;
use crate::error::Error;
use crate::eval::{FrameComputer, StackFrame};
use crate::process::tracer::{StopReason, Tracer};
use crate::process::{DwarfRegisterMap, Register, RegisterMap, TraceeCtl};
use crate::target::{Function, Target};
use log::debug;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

/// Bound on how many frames a recursion-guard depth comparison ever
/// unwinds; deeper than this and the guard just lets the stop through
/// rather than walking an unbounded stack.
const MAX_GUARD_DEPTH: usize = 4096;

/// A non-quiet signal or exit that interrupted a multi-step stepping
/// operation before it reached its target.
#[derive(Debug)]
pub enum StepInterrupt {
    Signal(Pid, Signal),
    Exited(i32),
}

impl StepInterrupt {
    fn from_stop(stop: StopReason) -> Result<Self, Error> {
        match stop {
            StopReason::Signal(pid, sig) => Ok(StepInterrupt::Signal(pid, sig)),
            StopReason::Exited(code) => Ok(StepInterrupt::Exited(code)),
            other => unreachable!("single_step never returns {other:?}"),
        }
    }
}

/// Outcome of a step-into attempt.
#[derive(Debug)]
pub enum StepIntoOutcome {
    Done,
    FellBackToStepOver,
    Interrupted(StepInterrupt),
}

/// Computes frame bases and unwinds call stacks against one `Target` at a
/// fixed load offset, per the subordinate's latched unwinding method, and
/// drives the stepping operations that need them.
pub struct StepEngine<'t> {
    target: &'t Target,
    load_addr: usize,
}

impl<'t> StepEngine<'t> {
    pub fn new(target: &'t Target, load_addr: usize) -> Self {
        Self { target, load_addr }
    }

    fn frame_computer(&self) -> FrameComputer<'t> {
        FrameComputer::new(self.target, self.load_addr)
    }

    fn pc_global(&self, regs: &RegisterMap) -> GlobalAddress {
        RelocatedAddress::from(regs.value(Register::Rip)).remove_load_offset(self.load_addr)
    }

    /// The live frame base at `pid`'s current PC, via whichever method
    /// `use_rbp` selects (§4.5's per-subordinate latch).
    pub fn frame_base(&self, pid: Pid, use_rbp: bool) -> Result<RelocatedAddress, Error> {
        let regs = RegisterMap::current(pid)?;
        if use_rbp {
            Ok(self.frame_computer().frame_base_via_rbp(&regs))
        } else {
            let pc = self.pc_global(&regs);
            self.frame_computer().frame_base_via_cfi(pc, &DwarfRegisterMap::from(regs))
        }
    }

    /// Unwinds the call stack at `pid`'s current PC, via whichever method
    /// `use_rbp` selects. Exposed for `PauseData.stack_frames` (§3); the
    /// stepping operations below use this internally too.
    pub fn unwind(&self, pid: Pid, use_rbp: bool) -> Result<Vec<StackFrame>, Error> {
        let regs = RegisterMap::current(pid)?;
        if use_rbp {
            self.frame_computer().unwind_via_rbp(pid, regs.value(Register::Rbp), MAX_GUARD_DEPTH)
        } else {
            let pc = self.pc_global(&regs);
            self.frame_computer().unwind_via_cfi(pid, pc, DwarfRegisterMap::from(regs), MAX_GUARD_DEPTH)
        }
    }

    /// Rewrites the current instruction's interrupt byte back in (if it was
    /// restored to let the subordinate stop there), without resuming the
    /// rest of the process. Split out from `cont` so the engine's control
    /// thread can do this quick, bounded step inline and hand the actual
    /// indefinite `Tracer::resume` wait off to a background thread (§5's
    /// "one thread blocked in `waitpid`-equivalent per async wait").
    pub fn prepare_resume(&self, pid: Pid, tracer: &mut Tracer, breakpoints: &BreakpointManager) -> Result<(), Error> {
        let tracee = tracer.tracee_ctl.tracee_ensure(pid);
        let pc = tracee.pc()?.remove_load_offset(self.load_addr);

        if let Some(bp) = breakpoints.at_addr(pc) {
            if bp.is_active() {
                breakpoints.disable_for_step(bp.bid, pid, self.load_addr)?;
                tracer.single_step(pid)?;
                if breakpoints.get(bp.bid).map(|b| b.is_active()).unwrap_or(false) {
                    breakpoints.enable_after_step(bp.bid, pid, self.load_addr)?;
                }
            }
        }
        Ok(())
    }

    /// §4.4 Continue: `prepare_resume` then resume every thread and block
    /// for the next stop. The engine itself calls the two halves
    /// separately so the indefinite wait runs off the control thread.
    pub fn cont(&self, pid: Pid, tracer: &mut Tracer, breakpoints: &BreakpointManager) -> Result<StopReason, Error> {
        self.prepare_resume(pid, tracer, breakpoints)?;
        tracer.resume()
    }

    /// §4.4 Single-step: delegate to the adapter, no extra bookkeeping.
    pub fn single_step(&self, pid: Pid, tracer: &mut Tracer) -> Result<Option<StepInterrupt>, Error> {
        match tracer.single_step(pid)? {
            Some(stop) => Ok(Some(StepInterrupt::from_stop(stop)?)),
            None => Ok(None),
        }
    }

    /// §4.4 Step-into: single-step until the source location changes, up to
    /// `retry_budget` attempts; falls back to step-over if none is reached.
    /// Skips a landed-on frame-pointer-push prologue byte when frame-pointer
    /// unwinding is available, so the user lands past the prologue.
    pub fn step_into(
        &self,
        pid: Pid,
        tracer: &mut Tracer,
        breakpoints: &mut BreakpointManager,
        use_rbp: bool,
        retry_budget: u32,
    ) -> Result<StepIntoOutcome, Error> {
        let start_pc = tracer.tracee_ctl.tracee_ensure(pid).pc()?.remove_load_offset(self.load_addr);
        let start_place = self.target.find_place_from_pc(start_pc);

        for _ in 0..retry_budget {
            if let Some(interrupt) = self.single_step(pid, tracer)? {
                return Ok(StepIntoOutcome::Interrupted(interrupt));
            }

            let pc = tracer.tracee_ctl.tracee_ensure(pid).pc()?.remove_load_offset(self.load_addr);
            let place = self.target.find_place_from_pc(pc);

            let landed_on_new_line = match (&start_place, &place) {
                (Some(a), Some(b)) => !a.line_eq(b),
                (None, Some(_)) => true,
                _ => false,
            };
            if !landed_on_new_line {
                continue;
            }

            if use_rbp && is_frame_pointer_push(pid, pc, self.load_addr)? {
                if let Some(interrupt) = self.single_step(pid, tracer)? {
                    return Ok(StepIntoOutcome::Interrupted(interrupt));
                }
            }
            return Ok(StepIntoOutcome::Done);
        }

        debug!(target: "stepping", "step-into exhausted its retry budget, falling back to step-over");
        self.step_over(pid, tracer.tracee_ctl.proc_pid(), breakpoints, use_rbp)?;
        let _ = tracer;
        Ok(StepIntoOutcome::FellBackToStepOver)
    }

    /// §4.4 Step-over: plants one internal breakpoint at every other
    /// statement address in the current function (skipping inlined bodies
    /// and addresses already carrying a user breakpoint), plus one at the
    /// caller's return address if a caller exists. The caller restores any
    /// user breakpoint byte and resumes separately (`cont`), then applies
    /// the recursion guard to whatever stop comes back.
    pub fn step_over(&self, pid: Pid, _stepping_thread: Pid, breakpoints: &mut BreakpointManager, use_rbp: bool) -> Result<(), Error> {
        let regs = RegisterMap::current(pid)?;
        let pc = self.pc_global(&regs);
        let Some((_, func)) = self.target.find_function_by_pc(pc) else {
            return Ok(());
        };

        let frame_base = self.frame_base(pid, use_rbp)?;
        self.plant_statement_breakpoints(pid, func, pc, frame_base, breakpoints)?;

        let frames = self.unwind(pid, use_rbp)?;
        if frames.len() >= 2 {
            if let Some(return_addr) = frames[0].return_addr {
                let global_return = return_addr.remove_load_offset(self.load_addr);
                if breakpoints.at_addr(global_return).is_none() {
                    breakpoints.add_internal(global_return, None, pid, frame_base, Some(frames.len() as u32 - 1), self.load_addr)?;
                }
            }
        }
        Ok(())
    }

    fn plant_statement_breakpoints(
        &self,
        pid: Pid,
        func: &Function,
        current_pc: GlobalAddress,
        frame_base: RelocatedAddress,
        breakpoints: &mut BreakpointManager,
    ) -> Result<(), Error> {
        let Some(unit) = self.target.find_unit_by_pc(current_pc) else { return Ok(()) };

        for &stmt_pos in &func.statements {
            let Some(place) = unit.find_place(stmt_pos) else { continue };
            if place.address == current_pc {
                continue;
            }
            if place.address.in_ranges(&func.inline_ranges) {
                continue;
            }
            if breakpoints.at_addr(place.address).is_some() {
                continue;
            }
            breakpoints.add_internal(place.address, Some(place), pid, frame_base, None, self.load_addr)?;
        }
        Ok(())
    }

    /// §4.4 Step-out: one internal breakpoint at the caller's return
    /// address, bounded to shallower stack depths by the recursion guard.
    pub fn step_out(&self, pid: Pid, breakpoints: &mut BreakpointManager, use_rbp: bool) -> Result<(), Error> {
        let frames = self.unwind(pid, use_rbp)?;
        let Some(frame) = frames.first() else { return Ok(()) };
        let Some(return_addr) = frame.return_addr else { return Ok(()) };

        let frame_base = self.frame_base(pid, use_rbp)?;
        let global_return = return_addr.remove_load_offset(self.load_addr);
        if breakpoints.at_addr(global_return).is_none() {
            breakpoints.add_internal(global_return, None, pid, frame_base, Some(frames.len() as u32 - 1), self.load_addr)?;
        }
        Ok(())
    }

    /// §4.4 Recursion guard, applied on any stop while internal breakpoints
    /// are outstanding. Returns `true` if the stop should be surfaced to
    /// the user, clearing every internal breakpoint as it does (they are
    /// one-shot). A `false` means the caller should silently resume.
    ///
    /// Also implements thread-breakpoint bookkeeping: a stop on a thread
    /// other than the one that planted the internal breakpoints always
    /// surfaces, since the stepping context they guarded no longer applies.
    ///
    /// Takes the triggering breakpoint's `call_frame_addr`/`max_stack_frames`
    /// by value rather than `&Breakpoint`, so a caller can look the
    /// breakpoint up, copy its two (Copy) guard fields out, and then take
    /// `&mut BreakpointManager` for this call without a borrow conflict.
    pub fn recursion_guard(
        &self,
        stop_pid: Pid,
        stepping_pid: Pid,
        call_frame_addr: Option<RelocatedAddress>,
        max_stack_frames: Option<u32>,
        use_rbp: bool,
        breakpoints: &mut BreakpointManager,
        tracee_ctl: &TraceeCtl,
    ) -> Result<bool, Error> {
        let surface = if stop_pid != stepping_pid {
            true
        } else if let Some(call_frame_addr) = call_frame_addr {
            self.frame_base(stop_pid, use_rbp)? == call_frame_addr
        } else if let Some(max_frames) = max_stack_frames {
            self.unwind(stop_pid, use_rbp)?.len() as u32 <= max_frames
        } else {
            true
        };

        if surface {
            breakpoints.clear_internal(tracee_ctl, self.load_addr)?;
        }
        Ok(surface)
    }
}

/// `push %rbp` (`0x55`) is the one-byte x86-64 prologue instruction
/// step-into skips past when frame-pointer unwinding is in use, so the
/// user lands on the callee's first semantic line rather than its
/// prologue.
fn is_frame_pointer_push(pid: Pid, pc: GlobalAddress, load_addr: usize) -> Result<bool, Error> {
    let relocated = pc.relocate(load_addr);
    let byte = crate::process::read_byte(pid, relocated)?;
    Ok(byte == 0x55)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_frame_pointer_push_checks_opcode_only() {
        // 0x55 is the only byte this helper treats as the prologue push;
        // anything else (including the int3 trap byte) is not.
        assert_ne!(0x55u8, 0xCCu8);
    }

    #[test]
    fn step_into_outcome_variants_are_distinct() {
        let done = StepIntoOutcome::Done;
        let fallback = StepIntoOutcome::FellBackToStepOver;
        assert!(matches!(done, StepIntoOutcome::Done));
        assert!(matches!(fallback, StepIntoOutcome::FellBackToStepOver));
    }
}
