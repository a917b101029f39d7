//! The engine's mutable state (§3): the loaded `Target`, the running
//! `Subordinate` if any, and the persistent breakpoint set. Everything here
//! lives behind `Engine`'s single coarse lock; nothing outside `engine`
//! reaches into it directly.

use crate::address::{GlobalAddress, RelocatedAddress};
use crate::breakpoint::BreakpointManager;
use crate::eval::{ExpressionResult, StackFrame};
use crate::process::tracer::StopReason;
use crate::process::{RegisterMap, Tracer};
use crate::target::{Place, StringCache, Target};
use nix::unistd::Pid;
use std::path::PathBuf;

/// A byte window read for the hex display, anchored at
/// `set_hex_window_address` (§6).
#[derive(Debug, Clone)]
pub struct HexDisplay {
    pub addr: RelocatedAddress,
    pub bytes: Vec<u8>,
}

/// A deep, UI-facing copy of one breakpoint's persistent state — never the
/// live `Breakpoint` itself, so `StateSnapshot` never borrows from engine
/// state (§3's "immutable copies, not borrows").
#[derive(Debug, Clone)]
pub struct BreakpointSnapshot {
    pub bid: u32,
    pub addr: GlobalAddress,
    pub source_location: Option<Place>,
    pub active: bool,
    pub hit_count: u32,
}

/// `{ pid, registers, source_location?, breakpoint?, frame_base_addr,
/// stack_frames[], hex_displays[], locals[], watches[], strings }` per §3.
/// Built once per stop and freed at the next continue/step/kill.
#[derive(Debug, Clone)]
pub struct PauseData {
    pub pid: Pid,
    pub registers: RegisterMap,
    pub source_location: Option<Place>,
    /// `bid` of the breakpoint that caused this stop, if any (a signal stop
    /// or a step-landing has none).
    pub breakpoint: Option<u32>,
    pub frame_base_addr: RelocatedAddress,
    pub stack_frames: Vec<StackFrame>,
    pub hex_displays: Vec<HexDisplay>,
    pub locals: Vec<ExpressionResult>,
    pub watches: Vec<ExpressionResult>,
    pub strings: StringCache,
}

/// `{ child_pid, load_addr, threads[], paused?, can_use_frame_pointer_unwinding,
/// has_probed_frame_pointer_unwinding }` per §3. `thread_breakpoints[]` isn't
/// duplicated here: the breakpoint manager already owns per-thread install
/// bookkeeping (`ThreadBreakpoint`), and `Subordinate` only needs to know
/// which threads exist to ask the manager to install into new ones.
pub struct Subordinate {
    pub child_pid: Pid,
    pub program_path: PathBuf,
    pub load_addr: usize,
    pub threads: Vec<Pid>,
    pub paused: Option<PauseData>,
    pub can_use_frame_pointer_unwinding: bool,
    pub has_probed_frame_pointer_unwinding: bool,
    /// The thread that initiated the in-flight step operation, if any;
    /// compared against the stopping thread by the recursion guard (§4.4).
    pub stepping_thread: Option<Pid>,
    /// Taken by the async wait thread for the duration of a `Tracer::resume`
    /// call so that blocking syscall runs without holding the engine lock;
    /// `None` means a resume is currently in flight.
    pub tracer: Option<Tracer>,
    /// Stashed by the async wait thread alongside the `Stopped` request it
    /// synthesizes, since §6's `stopped` request only carries
    /// `{pid, exited, should_stop_debugger}` but the control thread needs
    /// the full `StopReason` to decide what actually happened.
    pub last_stop: Option<StopReason>,
}

/// `{ user_visible_breakpoints[], paused? }` (§3): what `Engine::state`
/// hands back. A deep, independent copy — safe to read from any thread
/// without touching the engine lock again.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub user_visible_breakpoints: Vec<BreakpointSnapshot>,
    pub paused: Option<PauseData>,
}

/// The engine's full mutable state, held behind `Engine`'s single `Mutex`
/// (§5's "single coarse lock on engine state").
pub struct EngineState {
    pub target: Option<Target>,
    pub breakpoints: BreakpointManager,
    pub subordinate: Option<Subordinate>,
    pub watch_expressions: Vec<String>,
    pub hex_window_addr: Option<RelocatedAddress>,
}

impl EngineState {
    pub fn new() -> Self {
        Self {
            target: None,
            breakpoints: BreakpointManager::new(),
            subordinate: None,
            watch_expressions: Vec::new(),
            hex_window_addr: None,
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let user_visible_breakpoints = self
            .breakpoints
            .user_visible()
            .map(|bp| BreakpointSnapshot {
                bid: bp.bid,
                addr: bp.addr,
                source_location: bp.source_location.clone(),
                active: bp.is_active(),
                hit_count: bp.hit_count(),
            })
            .collect();

        let paused = self.subordinate.as_ref().and_then(|s| s.paused.clone());
        StateSnapshot { user_visible_breakpoints, paused }
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}
