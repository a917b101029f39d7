//! The process adapter (§4.2): spawning a traced subordinate, reading and
//! writing its registers and memory, and determining its PIE load address.
//! Everything here is a thin, `Result`-wrapped layer over `ptrace`/`proc_maps`;
//! the policy of *when* to read/write lives in `breakpoint` and `stepping`.

pub mod code;
pub mod register;
pub mod tracee;
pub mod tracer;

pub use register::{DwarfRegisterMap, Register, RegisterMap};
pub use tracee::{StopType, Tracee, TraceeCtl, TraceeStatus};
pub use tracer::{StopReason, Tracer};

use crate::address::RelocatedAddress;
use crate::error::Error;
use nix::libc::{c_long, c_void};
use nix::sys;
use nix::sys::personality::Persona;
use nix::sys::ptrace::Options;
use nix::sys::signal::SIGSTOP;
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::{fork, ForkResult, Pid};
use os_pipe::PipeWriter;
use std::marker::PhantomData;
use std::mem;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

/// Process state, tracked at the type level so a [`Child`] can't be used for
/// register/memory access before it is actually `ptrace`-attached.
pub trait State {}

/// Attached with `ptrace` and stopped at its first post-exec trap.
pub struct Installed;
impl State for Installed {}

/// Configured, not yet `fork()`ed.
pub struct Template;
impl State for Template {}

/// A subordinate process, typestated so the compiler enforces spawn-then-install.
pub struct Child<S: State> {
    program: String,
    args: Vec<String>,
    stdout: PipeWriter,
    stderr: PipeWriter,
    pid: Option<Pid>,
    _p: PhantomData<S>,
}

impl Child<Template> {
    /// Configures (but does not start) a subordinate.
    pub fn new<ARGS, I>(program: impl Into<String>, args: ARGS, stdout: PipeWriter, stderr: PipeWriter) -> Child<Template>
    where
        ARGS: IntoIterator<Item = I>,
        I: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdout,
            stderr,
            pid: None,
            _p: PhantomData,
        }
    }
}

impl Child<Installed> {
    pub fn pid(&self) -> Pid {
        self.pid.expect("installed child always has a pid")
    }
}

impl<S: State> Child<S> {
    /// `fork()`s, disables ASLR in the child (so a PIE binary's load address
    /// is the one the loader picks without us having to re-derive it on
    /// every relaunch), and seizes it with `ptrace` once the parent observes
    /// the child's initial stop. The child raises `SIGSTOP` before `exec`
    /// so the parent's `seize` always wins the race against the exec trap.
    pub fn install(&self) -> Result<Child<Installed>, Error> {
        let mut cmd = Command::new(&self.program);
        let cmd = cmd.args(&self.args).stdout(self.stdout.try_clone()?).stderr(self.stderr.try_clone()?);

        unsafe {
            cmd.pre_exec(|| {
                sys::personality::set(Persona::ADDR_NO_RANDOMIZE)?;
                Ok(())
            });
        }

        match unsafe { fork() }.expect("fork() error") {
            ForkResult::Parent { child: pid } => {
                waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WSTOPPED)).map_err(Error::Waitpid)?;
                sys::ptrace::seize(
                    pid,
                    Options::PTRACE_O_TRACECLONE.union(Options::PTRACE_O_TRACEEXEC).union(Options::PTRACE_O_TRACEEXIT),
                )
                .map_err(Error::Ptrace)?;

                Ok(Child {
                    program: self.program.clone(),
                    args: self.args.clone(),
                    stdout: self.stdout.try_clone()?,
                    stderr: self.stderr.try_clone()?,
                    pid: Some(pid),
                    _p: PhantomData,
                })
            }
            ForkResult::Child => {
                sys::signal::raise(SIGSTOP).expect("raise(SIGSTOP) in child");
                let err = cmd.exec();
                panic!("exec of subordinate failed: {err}");
            }
        }
    }
}

/// Reads `read_n` bytes of the subordinate's memory, one machine word at a
/// time via `PTRACE_PEEKDATA` (§4.2's `peek_data`).
pub fn read_memory(pid: Pid, addr: usize, read_n: usize) -> Result<Vec<u8>, Error> {
    let word_size = mem::size_of::<c_long>();
    let mut out = Vec::with_capacity(read_n);
    let mut cursor = addr as *mut c_long;
    let mut remaining = read_n;

    while remaining > 0 {
        let word = sys::ptrace::read(pid, cursor as *mut c_void).map_err(Error::Ptrace)?;
        let take = remaining.min(word_size);
        out.extend_from_slice(&word.to_ne_bytes()[..take]);
        remaining -= take;
        cursor = unsafe { cursor.offset(1) };
    }

    Ok(out)
}

/// Writes `data` into the subordinate's memory, one machine word at a time
/// via `PTRACE_POKEDATA` (§4.2's `poke_data`). A write that doesn't end on a
/// word boundary reads the trailing word first so the bytes past `data`'s end
/// are preserved rather than zeroed.
pub fn write_memory(pid: Pid, addr: usize, data: &[u8]) -> Result<(), Error> {
    let word_size = mem::size_of::<c_long>();
    let mut cursor = addr as *mut c_long;
    let mut offset = 0;

    while offset < data.len() {
        let remaining = data.len() - offset;
        let word = if remaining >= word_size {
            c_long::from_ne_bytes(data[offset..offset + word_size].try_into().expect("word_size chunk"))
        } else {
            let existing = sys::ptrace::read(pid, cursor as *mut c_void).map_err(Error::Ptrace)?;
            let mut bytes = existing.to_ne_bytes();
            bytes[..remaining].copy_from_slice(&data[offset..]);
            c_long::from_ne_bytes(bytes)
        };
        unsafe {
            sys::ptrace::write(pid, cursor as *mut c_void, word as *mut c_void).map_err(Error::Ptrace)?;
        }
        offset += word_size;
        cursor = unsafe { cursor.offset(1) };
    }

    Ok(())
}

/// Reads a single byte, used by the breakpoint manager to save the original
/// instruction byte before writing `0xCC`.
pub fn read_byte(pid: Pid, addr: RelocatedAddress) -> Result<u8, Error> {
    let word = sys::ptrace::read(pid, addr.as_usize() as *mut c_void).map_err(Error::Ptrace)?;
    Ok((word & 0xff) as u8)
}

/// Writes a single byte without disturbing the rest of the containing word.
pub fn write_byte(pid: Pid, addr: RelocatedAddress, byte: u8) -> Result<(), Error> {
    let ptr = addr.as_usize() as *mut c_void;
    let word = sys::ptrace::read(pid, ptr).map_err(Error::Ptrace)?;
    let patched = (word & !0xff) | byte as c_long;
    unsafe {
        sys::ptrace::write(pid, ptr, patched as *mut c_void).map_err(Error::Ptrace)?;
    }
    Ok(())
}

/// Determines the PIE load address of a just-execed subordinate (§4.2's
/// `parse_load_address`) by reading the kernel's memory map and taking the
/// lowest mapped address for the subordinate's own executable file. Returns
/// `0` for a non-PIE binary, which is mapped at its link-time address.
pub fn parse_load_address(pid: Pid, program_path: &Path, pie: bool) -> Result<usize, Error> {
    if !pie {
        return Ok(0);
    }

    let canonical = program_path.canonicalize()?;
    let maps = proc_maps::get_process_maps(pid.as_raw())?;

    maps.iter()
        .filter(|m| m.filename() == Some(canonical.as_path()))
        .map(|m| m.start())
        .min()
        .ok_or(Error::LoadAddressNotFound(pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_pie_load_address_is_zero() {
        let addr = parse_load_address(Pid::from_raw(1), Path::new("/proc/1/exe"), false).unwrap();
        assert_eq!(addr, 0);
    }
}
