//! A single traced thread and the table of all threads belonging to one
//! subordinate process.

use crate::address::RelocatedAddress;
use crate::error::Error;
use crate::process::register::{Register, RegisterMap};
use nix::errno::Errno;
use nix::sys;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::collections::HashMap;

/// Why a tracee is currently stopped; distinct from "running" so the tracer
/// knows which already-stopped threads it can skip on the next `resume`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StopType {
    SignalStop(Signal),
    Interrupt,
    Breakpoint,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TraceeStatus {
    Running,
    Stopped(StopType),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Tracee {
    pub pid: Pid,
    pub status: TraceeStatus,
}

impl Tracee {
    pub fn is_stopped(&self) -> bool {
        matches!(self.status, TraceeStatus::Stopped(_))
    }

    pub fn set_stop(&mut self, stop: StopType) {
        self.status = TraceeStatus::Stopped(stop);
    }

    pub fn set_running(&mut self) {
        self.status = TraceeStatus::Running;
    }

    pub fn wait_one(&self) -> Result<WaitStatus, Error> {
        waitpid(self.pid, None).map_err(Error::Waitpid)
    }

    pub fn r#continue(&self, sig: Option<Signal>) -> Result<(), Error> {
        sys::ptrace::cont(self.pid, sig).map_err(Error::Ptrace)
    }

    /// Executes the next instruction, stopping again with `TRAP_TRACE`.
    pub fn step(&self, sig: Option<Signal>) -> Result<(), Error> {
        sys::ptrace::step(self.pid, sig).map_err(Error::Ptrace)
    }

    pub fn pc(&self) -> Result<RelocatedAddress, Error> {
        RegisterMap::current(self.pid).map(|regs| RelocatedAddress::from(regs.value(Register::Rip)))
    }

    pub fn set_pc(&self, value: u64) -> Result<(), Error> {
        let mut regs = RegisterMap::current(self.pid)?;
        regs.update(Register::Rip, value);
        regs.persist(self.pid)
    }
}

/// Tracks every thread of one subordinate process, discovered as they
/// appear via `PTRACE_EVENT_CLONE` (§3's `Subordinate.threads[]`, B).
pub struct TraceeCtl {
    proc_pid: Pid,
    threads: HashMap<Pid, Tracee>,
}

impl TraceeCtl {
    pub fn new(proc_pid: Pid) -> Self {
        Self {
            proc_pid,
            threads: HashMap::from([(
                proc_pid,
                Tracee { pid: proc_pid, status: TraceeStatus::Stopped(StopType::Interrupt) },
            )]),
        }
    }

    pub fn proc_pid(&self) -> Pid {
        self.proc_pid
    }

    pub fn tracee(&self, pid: Pid) -> Option<&Tracee> {
        self.threads.get(&pid)
    }

    pub fn tracee_mut(&mut self, pid: Pid) -> Option<&mut Tracee> {
        self.threads.get_mut(&pid)
    }

    pub fn tracee_ensure(&self, pid: Pid) -> &Tracee {
        self.threads.get(&pid).expect("tracee must be registered before use")
    }

    pub fn tracee_ensure_mut(&mut self, pid: Pid) -> &mut Tracee {
        self.threads.get_mut(&pid).expect("tracee must be registered before use")
    }

    pub fn add(&mut self, pid: Pid) -> &Tracee {
        self.threads.insert(pid, Tracee { pid, status: TraceeStatus::Stopped(StopType::Interrupt) });
        &self.threads[&pid]
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Tracee> {
        self.threads.remove(&pid)
    }

    pub fn snapshot(&self) -> Vec<Tracee> {
        self.threads.values().cloned().collect()
    }

    /// Resumes every currently-stopped thread. A thread that has already
    /// exited out from under us (`ESRCH`) is left for the next
    /// `PTRACE_EVENT_EXIT`/`Exited` status to clean up.
    pub fn cont_stopped(&mut self) -> Result<(), Error> {
        for tracee in self.threads.values_mut() {
            if !tracee.is_stopped() {
                continue;
            }
            match sys::ptrace::cont(tracee.pid, None) {
                Ok(()) => tracee.set_running(),
                Err(Errno::ESRCH) => {}
                Err(e) => return Err(Error::Ptrace(e)),
            }
        }
        Ok(())
    }

    /// Like [`Self::cont_stopped`], but delivers `inject` to its target
    /// thread and leaves every other pending-signal thread stopped so the
    /// tracer can re-stop immediately after (§B's "quiet signals resume
    /// with the actual signal delivered").
    pub fn cont_stopped_ex(&mut self, inject: Option<(Pid, Signal)>, keep_stopped: Vec<Pid>) -> Result<(), Error> {
        for tracee in self.threads.values_mut() {
            if !tracee.is_stopped() || keep_stopped.contains(&tracee.pid) {
                continue;
            }
            let sig = inject.filter(|(pid, _)| *pid == tracee.pid).map(|(_, s)| s);
            match sys::ptrace::cont(tracee.pid, sig) {
                Ok(()) => tracee.set_running(),
                Err(Errno::ESRCH) => {}
                Err(e) => return Err(Error::Ptrace(e)),
            }
        }
        Ok(())
    }
}
