//! Requests the control thread accepts, UI → engine (§6).

use crate::address::{GlobalAddress, RelocatedAddress};
use nix::unistd::Pid;
use std::path::PathBuf;

/// Which stepping operation (§4.4) a `step` request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Single,
    Into,
    OutOf,
    Over,
}

/// Where to place/remove a breakpoint: by bid, by raw pre-load address, or
/// by a source file/line pair resolved against the loaded `Target` (§6's
/// `update_breakpoint.loc` union). `file_hash` is the same string hash the
/// symbol loader's string cache uses, computed over the file's path.
#[derive(Debug, Clone)]
pub enum BreakpointLocation {
    Bid(u32),
    Addr(GlobalAddress),
    Source { file_hash: u64, line: u64 },
}

/// One request from an embedder to the engine (§6's request table). Most
/// variants are handled by the control thread serially under its lock;
/// `GetState` bypasses the queue entirely (`Engine::state` takes the lock
/// directly) since §5 specifies it as synchronous.
#[derive(Debug, Clone)]
pub enum Request {
    LoadSymbols { path: PathBuf },
    Launch { path: PathBuf, args: Vec<String>, stop_on_entry: bool },
    Kill,
    Continue,
    Step(StepKind),
    UpdateBreakpoint { loc: BreakpointLocation },
    ToggleBreakpoint { bid: u32 },
    SetHexWindowAddress { addr: RelocatedAddress },
    SetWatchExpressions { expressions: Vec<String> },
    /// Internal: synthesized by the async wait thread when a `Tracer::resume`
    /// call returns. Not sent by embedders.
    Stopped { pid: Pid, exited: Option<i32>, should_stop_debugger: bool },
    Quit,
}
