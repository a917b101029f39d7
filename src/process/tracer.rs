//! Resumes and waits on a subordinate's threads, turning raw `waitpid`
//! statuses into a [`StopReason`] the rest of the debugger understands.
//!
//! Simplified from the teacher's tracer: a single-pass thread interrupt
//! sweep instead of its two-round convergence loop. Good enough for the
//! thread counts a debugger session actually drives; a process that's
//! still spawning new threads as fast as we can interrupt the existing
//! ones isn't a case this crate tries to handle glitch-free.

use crate::address::RelocatedAddress;
use crate::error::Error;
use crate::process::code;
use crate::process::tracee::{StopType, TraceeCtl, TraceeStatus};
use log::{debug, warn};
use nix::errno::Errno;
use nix::libc::pid_t;
use nix::sys;
use nix::sys::signal::{Signal, SIGSTOP};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use nix::libc;
use std::collections::VecDeque;

/// Signals that don't interest a source-level debugger and are passed
/// straight through to the subordinate instead of stopping the control
/// thread (§B).
pub static QUIET_SIGNALS: [Signal; 6] = [
    Signal::SIGALRM,
    Signal::SIGURG,
    Signal::SIGCHLD,
    Signal::SIGIO,
    Signal::SIGVTALRM,
    Signal::SIGPROF,
];

#[derive(Debug)]
pub enum StopReason {
    Exited(i32),
    Started,
    Breakpoint(Pid, RelocatedAddress),
    Signal(Pid, Signal),
    NoSuchProcess(Pid),
}

pub struct Tracer {
    pub tracee_ctl: TraceeCtl,
    signal_queue: VecDeque<(Pid, Signal)>,
    group_stop_in_progress: bool,
}

impl Tracer {
    pub fn new(proc_pid: Pid) -> Self {
        Self {
            tracee_ctl: TraceeCtl::new(proc_pid),
            signal_queue: VecDeque::new(),
            group_stop_in_progress: false,
        }
    }

    /// Resumes every stopped thread and blocks until the process produces
    /// a stop worth surfacing to the caller.
    pub fn resume(&mut self) -> Result<StopReason, Error> {
        loop {
            if let Some(req) = self.signal_queue.pop_front() {
                let keep_stopped = self.signal_queue.iter().map(|(pid, _)| *pid).collect();
                self.tracee_ctl.cont_stopped_ex(Some(req), keep_stopped)?;
                if let Some((pid, sig)) = self.signal_queue.front().copied() {
                    self.group_stop_interrupt(Pid::from_raw(-1))?;
                    return Ok(StopReason::Signal(pid, sig));
                }
            } else {
                self.tracee_ctl.cont_stopped()?;
            }

            debug!(target: "tracer", "resumed, waiting for a status change");
            let status = match waitpid(Pid::from_raw(-1), None) {
                Ok(status) => status,
                Err(Errno::ECHILD) => return Ok(StopReason::NoSuchProcess(self.tracee_ctl.proc_pid())),
                Err(e) => return Err(Error::Waitpid(e)),
            };

            if let Some(stop) = self.apply_status(status)? {
                if let StopReason::Signal(_, signal) = stop {
                    if QUIET_SIGNALS.contains(&signal) {
                        continue;
                    }
                }
                debug!(target: "tracer", "stopped: {stop:?}");
                return Ok(stop);
            }
        }
    }

    /// Executes a single instruction in `pid`, ignoring breakpoint traps
    /// encountered along the way (used by stepping's prologue/line walk).
    pub fn single_step(&mut self, pid: Pid) -> Result<Option<StopReason>, Error> {
        let tracee = self.tracee_ctl.tracee_ensure(pid);
        let initial_pc = tracee.pc()?;
        tracee.step(None)?;

        loop {
            let tracee = self.tracee_ctl.tracee_ensure(pid);
            let status = tracee.wait_one()?;
            let info = sys::ptrace::getsiginfo(pid).map_err(Error::Ptrace)?;

            let in_trap = matches!(status, WaitStatus::Stopped(_, Signal::SIGTRAP))
                && (info.si_code == code::TRAP_TRACE
                    || info.si_code == code::TRAP_BRKPT
                    || info.si_code == code::SI_KERNEL);
            if in_trap {
                let tracee = self.tracee_ctl.tracee_ensure(pid);
                if tracee.pc()? == initial_pc {
                    tracee.step(None)?;
                    continue;
                }
                return Ok(None);
            }

            let is_interrupt =
                matches!(status, WaitStatus::PtraceEvent(p, SIGSTOP, libc::PTRACE_EVENT_STOP) if pid == p);
            if is_interrupt {
                return Ok(None);
            }

            match self.apply_status(status)? {
                None => {}
                Some(StopReason::Breakpoint(_, _)) => unreachable!("breakpoints ignored during single-step"),
                Some(StopReason::Exited(code)) => return Err(Error::ProcessExit(code)),
                Some(StopReason::Started) => unreachable!("start event fires once"),
                Some(stop @ StopReason::Signal(_, signal)) => {
                    if QUIET_SIGNALS.contains(&signal) {
                        self.tracee_ctl.tracee_ensure(pid).step(Some(signal))?;
                        continue;
                    }
                    return Ok(Some(stop));
                }
                Some(StopReason::NoSuchProcess(_)) => return Ok(None),
            }
        }
    }

    fn group_stop_interrupt(&mut self, initiator: Pid) -> Result<(), Error> {
        if self.group_stop_in_progress {
            return Ok(());
        }
        self.group_stop_in_progress = true;

        for tid in self.tracee_ctl.snapshot().into_iter().map(|t| t.pid) {
            if tid == initiator {
                continue;
            }
            let already_stopped = self.tracee_ctl.tracee(tid).map(|t| t.is_stopped()).unwrap_or(true);
            if already_stopped {
                continue;
            }
            if let Err(e) = sys::ptrace::interrupt(tid) {
                if e == Errno::ESRCH {
                    warn!(target: "tracer", "thread {tid} vanished before interrupt landed");
                    continue;
                }
                self.group_stop_in_progress = false;
                return Err(Error::Ptrace(e));
            }
            let mut wait = waitpid(tid, None).map_err(Error::Waitpid)?;
            while !matches!(wait, WaitStatus::PtraceEvent(_, _, libc::PTRACE_EVENT_STOP)) {
                if self.apply_status(wait)?.is_some() {
                    break;
                }
                wait = match waitpid(tid, None) {
                    Ok(w) => w,
                    Err(_) => break,
                };
            }
            if let Some(t) = self.tracee_ctl.tracee_mut(tid) {
                if !t.is_stopped() {
                    t.set_stop(StopType::Interrupt);
                }
            }
        }

        self.group_stop_in_progress = false;
        Ok(())
    }

    fn apply_status(&mut self, status: WaitStatus) -> Result<Option<StopReason>, Error> {
        match status {
            WaitStatus::Exited(pid, code) => {
                self.tracee_ctl.remove(pid);
                if pid == self.tracee_ctl.proc_pid() {
                    return Ok(Some(StopReason::Exited(code)));
                }
                Ok(None)
            }
            WaitStatus::PtraceEvent(pid, _signal, event) => {
                match event {
                    libc::PTRACE_EVENT_EXEC => {
                        self.tracee_ctl.add(pid);
                        return Ok(Some(StopReason::Started));
                    }
                    libc::PTRACE_EVENT_CLONE => {
                        self.tracee_ctl.tracee_ensure_mut(pid).set_stop(StopType::Interrupt);
                        let new_tid = Pid::from_raw(sys::ptrace::getevent(pid).map_err(Error::Ptrace)? as pid_t);
                        if self.tracee_ctl.tracee(new_tid).is_none() {
                            let new_tracee = self.tracee_ctl.add(new_tid);
                            let _ = new_tracee.wait_one()?;
                        }
                    }
                    libc::PTRACE_EVENT_STOP => match self.tracee_ctl.tracee_mut(pid) {
                        Some(t) => t.set_stop(StopType::Interrupt),
                        None => {
                            self.tracee_ctl.add(pid);
                        }
                    },
                    libc::PTRACE_EVENT_EXIT => {
                        if let Some(tracee) = self.tracee_ctl.remove(pid) {
                            tracee.r#continue(None)?;
                        }
                    }
                    _ => warn!(target: "tracer", "unsupported ptrace event {event}, ignored"),
                }
                Ok(None)
            }
            WaitStatus::Stopped(pid, signal) => {
                let info = match sys::ptrace::getsiginfo(pid) {
                    Ok(info) => info,
                    Err(Errno::ESRCH) => return Ok(Some(StopReason::NoSuchProcess(pid))),
                    Err(e) => return Err(Error::Ptrace(e)),
                };

                if signal != Signal::SIGTRAP {
                    self.signal_queue.push_back((pid, signal));
                    self.tracee_ctl.tracee_ensure_mut(pid).set_stop(StopType::SignalStop(signal));
                    if !QUIET_SIGNALS.contains(&signal) {
                        self.group_stop_interrupt(pid)?;
                    }
                    return Ok(Some(StopReason::Signal(pid, signal)));
                }

                if info.si_code == code::TRAP_BRKPT || info.si_code == code::SI_KERNEL {
                    let tracee = self.tracee_ctl.tracee_ensure(pid);
                    tracee.set_pc(tracee.pc()?.as_u64() - 1)?;
                    let current_pc = tracee.pc()?;

                    self.tracee_ctl.tracee_ensure_mut(pid).set_stop(StopType::Breakpoint);
                    self.group_stop_interrupt(pid)?;
                    return Ok(Some(StopReason::Breakpoint(pid, current_pc)));
                }

                debug!(target: "tracer", "unexpected SIGTRAP si_code {}", info.si_code);
                Ok(None)
            }
            WaitStatus::Signaled(..) => Ok(None),
            other => {
                warn!(target: "tracer", "unexpected wait status: {other:?}");
                Ok(None)
            }
        }
    }
}
