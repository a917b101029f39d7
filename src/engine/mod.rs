//! The engine (§5–§6): a request/response control plane wrapping the
//! symbol loader, process adapter, breakpoint manager and stepping engine
//! behind one coarse lock, so an embedder can drive a debugging session
//! from any thread without touching `ptrace` itself.
//!
//! One control thread consumes `Request`s serially and holds the engine
//! lock for the duration of each one; background threads handle the
//! genuinely unbounded work (symbol loading, the subordinate's stdout/
//! stderr, and the blocking wait for the next stop) and hand their results
//! back through the same request queue so every actual state mutation still
//! happens on the control thread, serialized.

pub mod request;
pub mod response;
pub mod state;

pub use request::{BreakpointLocation, Request, StepKind};
pub use response::{MessageLevel, Response};
pub use state::{BreakpointSnapshot, EngineState, HexDisplay, PauseData, StateSnapshot, Subordinate};

use crate::address::RelocatedAddress;
use crate::breakpoint;
use crate::error::Error;
use crate::eval::{self, encoder_for, ExpressionResult, FrameComputer};
use crate::process::tracer::StopReason;
use crate::process::{self, DwarfRegisterMap, Register, RegisterMap, TraceeCtl, Tracer};
use crate::stepping::StepEngine;
use crate::target::Target;
use log::{debug, warn};
use nix::unistd::Pid;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How many bytes a hex-display window reads around `set_hex_window_address`.
const HEX_WINDOW_BYTES: usize = 256;

/// Tunables for the control thread (§5's "Timeouts" + suspension points).
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// How long `launch` waits for the subordinate's initial post-exec stop
    /// before giving up (informational only at present: the wait itself is
    /// a blocking `Tracer::resume` call with no interrupt-on-timeout path).
    pub launch_timeout: Duration,
    /// Retry budget passed to `StepEngine::step_into` (§4.4).
    pub step_into_retry_budget: u32,
    /// Bound on the control thread's `request_rx.recv_timeout`, so a quit
    /// request is noticed promptly even with no other traffic (§5's
    /// suspension point (a)).
    pub request_queue_poll: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            launch_timeout: Duration::from_secs(2),
            step_into_retry_budget: 64,
            request_queue_poll: Duration::from_millis(100),
        }
    }
}

impl EngineConfig {
    /// §5's "20 s in CI" launch timeout.
    pub fn for_ci() -> Self {
        Self { launch_timeout: Duration::from_secs(20), ..Self::default() }
    }
}

/// The request/response control plane (§5). Cloning isn't supported — an
/// embedder holds one `Engine` and shares it across threads itself if
/// needed, the same way `Sender`/`Receiver` are shared.
pub struct Engine {
    request_tx: Sender<Request>,
    response_rx: Receiver<Response>,
    state: Arc<Mutex<EngineState>>,
    shutdown: Arc<AtomicBool>,
    control_thread: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let (request_tx, request_rx) = mpsc::channel::<Request>();
        let (response_tx, response_rx) = mpsc::channel::<Response>();
        let state = Arc::new(Mutex::new(EngineState::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let loop_state = Arc::clone(&state);
        let loop_shutdown = Arc::clone(&shutdown);
        let loop_request_tx = request_tx.clone();
        let control_thread = thread::Builder::new()
            .name("engine-control".into())
            .spawn(move || control_loop(request_rx, loop_request_tx, response_tx, loop_state, loop_shutdown, config))
            .expect("spawning the control thread");

        Self { request_tx, response_rx, state, shutdown, control_thread: Some(control_thread) }
    }

    /// Enqueues a request for the control thread. Fails only once the
    /// control thread has already torn itself down.
    pub fn send(&self, request: Request) -> Result<(), Error> {
        self.request_tx.send(request).map_err(|_| Error::ShuttingDown)
    }

    /// `get_state` (§6): bypasses the request queue entirely, taking the
    /// engine lock directly, since it's specified as synchronous.
    pub fn state(&self) -> StateSnapshot {
        self.state.lock().unwrap().snapshot()
    }

    /// Non-blocking drain of one pending response, if any.
    pub fn try_recv(&self) -> Option<Response> {
        self.response_rx.try_recv().ok()
    }

    /// Blocks up to `timeout` for the next response.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Response> {
        self.response_rx.recv_timeout(timeout).ok()
    }
}

impl Drop for Engine {
    /// Triggers shutdown and waits for the control thread to finish tearing
    /// down the subordinate before this `Engine` (and its `Arc<Mutex<..>>`)
    /// goes away, matching §5's "shutdown wait-group ... joined before
    /// freeing engine state".
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.request_tx.send(Request::Quit);
        if let Some(handle) = self.control_thread.take() {
            let _ = handle.join();
        }
    }
}

fn control_loop(
    request_rx: Receiver<Request>,
    request_tx: Sender<Request>,
    response_tx: Sender<Response>,
    state: Arc<Mutex<EngineState>>,
    shutdown: Arc<AtomicBool>,
    config: EngineConfig,
) {
    loop {
        match request_rx.recv_timeout(config.request_queue_poll) {
            Ok(Request::Quit) => {
                shutdown.store(true, Ordering::SeqCst);
                handle_kill(&state, &response_tx);
                break;
            }
            Ok(req) => handle_request(req, &state, &request_tx, &response_tx, &config),
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(target: "engine", "control thread exiting");
}

fn handle_request(
    req: Request,
    state: &Arc<Mutex<EngineState>>,
    request_tx: &Sender<Request>,
    response_tx: &Sender<Response>,
    config: &EngineConfig,
) {
    match req {
        Request::LoadSymbols { path } => handle_load_symbols(path, state, response_tx),
        Request::Launch { path, args, stop_on_entry } => handle_launch(path, args, stop_on_entry, state, request_tx, response_tx),
        Request::Kill => handle_kill(state, response_tx),
        Request::Continue => handle_continue(state, request_tx, response_tx),
        Request::Step(kind) => handle_step(kind, state, request_tx, response_tx, config),
        Request::UpdateBreakpoint { loc } => handle_update_breakpoint(loc, state, response_tx),
        Request::ToggleBreakpoint { bid } => handle_toggle_breakpoint(bid, state, response_tx),
        Request::SetHexWindowAddress { addr } => handle_set_hex_window(addr, state, response_tx),
        Request::SetWatchExpressions { expressions } => handle_set_watches(expressions, state, response_tx),
        Request::Stopped { pid, exited, should_stop_debugger } => handle_stopped(pid, exited, should_stop_debugger, state, request_tx, response_tx),
        Request::Quit => unreachable!("Quit is intercepted by control_loop before reaching handle_request"),
    }
}

fn emit_error(response_tx: &Sender<Response>, err: Error) {
    warn!(target: "engine", "{err}");
    let _ = response_tx.send(Response::Message { level: MessageLevel::Error, text: err.to_string() });
}

fn emit_info(response_tx: &Sender<Response>, text: impl Into<String>) {
    let _ = response_tx.send(Response::Message { level: MessageLevel::Info, text: text.into() });
}

fn emit_warning(response_tx: &Sender<Response>, text: impl Into<String>) {
    let _ = response_tx.send(Response::Message { level: MessageLevel::Warning, text: text.into() });
}

/// One thread per load-symbols request (§5), detached; signals completion
/// by enqueuing `Response::LoadSymbols`.
fn handle_load_symbols(path: PathBuf, state: &Arc<Mutex<EngineState>>, response_tx: &Sender<Response>) {
    let state = Arc::clone(state);
    let response_tx = response_tx.clone();
    thread::spawn(move || match Target::load(&path) {
        Ok(target) => {
            state.lock().unwrap().target = Some(target);
            let _ = response_tx.send(Response::LoadSymbols { err: None });
            let _ = response_tx.send(Response::StateUpdated);
        }
        Err(e) => {
            warn!(target: "engine", "failed to load symbols from {}: {e}", path.display());
            let _ = response_tx.send(Response::LoadSymbols { err: Some(e.to_string()) });
        }
    });
}

/// `launch` (§6): synchronous on the control thread — fork/seize/initial
/// wait are all bounded suspension points (§5's (b)/(c)).
fn handle_launch(
    path: PathBuf,
    args: Vec<String>,
    stop_on_entry: bool,
    state: &Arc<Mutex<EngineState>>,
    request_tx: &Sender<Request>,
    response_tx: &Sender<Response>,
) {
    let mut guard = state.lock().unwrap();
    if guard.target.is_none() {
        drop(guard);
        emit_error(response_tx, Error::NoTarget);
        return;
    }
    if guard.subordinate.is_some() {
        drop(guard);
        emit_warning(response_tx, Error::AlreadyRunning.to_string());
        return;
    }

    let (stdout_reader, stdout_writer) = match os_pipe::pipe() {
        Ok(p) => p,
        Err(e) => {
            drop(guard);
            emit_error(response_tx, Error::IO(e));
            return;
        }
    };
    let (stderr_reader, stderr_writer) = match os_pipe::pipe() {
        Ok(p) => p,
        Err(e) => {
            drop(guard);
            emit_error(response_tx, Error::IO(e));
            return;
        }
    };

    let program = path.to_string_lossy().to_string();
    let child = process::Child::<process::Template>::new(program, args, stdout_writer, stderr_writer);
    let child = match child.install() {
        Ok(c) => c,
        Err(e) => {
            drop(guard);
            emit_error(response_tx, e);
            return;
        }
    };
    let pid = child.pid();

    let mut tracer = Tracer::new(pid);
    match tracer.resume() {
        Ok(StopReason::Started) => {}
        Ok(other) => debug!(target: "engine", "unexpected first subordinate stop: {other:?}"),
        Err(e) => {
            drop(guard);
            emit_error(response_tx, e);
            return;
        }
    }

    let is_pie = guard.target.as_ref().expect("checked above").is_pie();
    let load_addr = match process::parse_load_address(pid, &path, is_pie) {
        Ok(addr) => addr,
        Err(e) => {
            drop(guard);
            emit_error(response_tx, e);
            return;
        }
    };

    if let Err(e) = guard.breakpoints.install_for_new_thread(pid, load_addr) {
        drop(guard);
        emit_error(response_tx, e);
        return;
    }

    guard.subordinate = Some(Subordinate {
        child_pid: pid,
        program_path: path,
        load_addr,
        threads: vec![pid],
        paused: None,
        can_use_frame_pointer_unwinding: false,
        has_probed_frame_pointer_unwinding: false,
        stepping_thread: None,
        tracer: Some(tracer),
        last_stop: None,
    });

    spawn_output_capture(stdout_reader, response_tx.clone());
    spawn_output_capture(stderr_reader, response_tx.clone());

    if stop_on_entry {
        build_and_store_pause_data_locked(&mut guard, None);
        drop(guard);
        let _ = response_tx.send(Response::StateUpdated);
    } else {
        drop(guard);
        spawn_async_wait(Arc::clone(state), request_tx.clone());
    }
}

/// Reads each pipe end until EOF (subordinate closed/exited), emitting
/// `received_text_output` for every non-empty read (§5's "one thread each
/// for subordinate stdout and stderr capture").
fn spawn_output_capture(mut reader: os_pipe::PipeReader, response_tx: Sender<Response>) {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if response_tx.send(Response::ReceivedTextOutput { bytes: buf[..n].to_vec() }).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
}

/// One thread blocked in `Tracer::resume` (§5). Takes the `Tracer` out of
/// `Subordinate` for the duration of the blocking wait so it runs without
/// holding the engine lock, then hands the result back as an internal
/// `stopped` request for the control thread to process serially.
fn spawn_async_wait(state: Arc<Mutex<EngineState>>, request_tx: Sender<Request>) {
    thread::spawn(move || {
        let mut tracer = {
            let mut guard = state.lock().unwrap();
            let Some(sub) = guard.subordinate.as_mut() else { return };
            let Some(tracer) = sub.tracer.take() else { return };
            tracer
        };

        let pid = tracer.tracee_ctl.proc_pid();
        let outcome = tracer.resume();

        let mut guard = state.lock().unwrap();
        let Some(sub) = guard.subordinate.as_mut() else { return };
        sub.tracer = Some(tracer);

        let (exited, should_stop_debugger) = match &outcome {
            Ok(StopReason::Exited(code)) => (Some(*code), true),
            Ok(StopReason::NoSuchProcess(_)) => (Some(-1), true),
            Ok(_) => (None, true),
            Err(e) => {
                warn!(target: "engine", "async wait failed: {e}");
                (Some(-1), true)
            }
        };
        if let Ok(reason) = outcome {
            sub.last_stop = Some(reason);
        }
        drop(guard);

        let _ = request_tx.send(Request::Stopped { pid, exited, should_stop_debugger });
    });
}

/// Replants the interrupt byte at the current PC if it's sitting on one
/// (`StepEngine::prepare_resume`), the bounded half of a continue that runs
/// inline on the control thread regardless of who asked for the resume.
fn prepare_resume_current(guard: &mut EngineState) -> Result<(), Error> {
    let load_addr = guard.subordinate.as_ref().map(|s| s.load_addr).unwrap_or(0);
    let EngineState { target, breakpoints, subordinate, .. } = guard;
    let (Some(target), Some(sub)) = (target.as_ref(), subordinate.as_mut()) else { return Ok(()) };
    let Some(tracer) = sub.tracer.as_mut() else { return Ok(()) };
    let stepper = StepEngine::new(target, load_addr);
    stepper.prepare_resume(sub.child_pid, tracer, breakpoints)
}

/// §4.4's recursion guard: whether an internal breakpoint hit by a thread
/// other than the one stepping (recursive call into the same frame) should
/// actually surface, or just get silently cleared and resumed past.
/// Defaults to "surface" if anything about the subordinate is missing.
fn recursion_guard_decision(
    guard: &mut EngineState,
    stop_pid: Pid,
    call_frame_addr: Option<RelocatedAddress>,
    max_stack_frames: Option<u32>,
) -> bool {
    let load_addr = guard.subordinate.as_ref().map(|s| s.load_addr).unwrap_or(0);
    let use_rbp = guard.subordinate.as_ref().map(|s| s.can_use_frame_pointer_unwinding).unwrap_or(false);
    let EngineState { target, breakpoints, subordinate, .. } = guard;
    let (Some(target), Some(sub)) = (target.as_ref(), subordinate.as_mut()) else { return true };
    let Some(tracer) = sub.tracer.as_ref() else { return true };
    let stepping_pid = sub.stepping_thread.unwrap_or(stop_pid);
    let stepper = StepEngine::new(target, load_addr);
    stepper
        .recursion_guard(stop_pid, stepping_pid, call_frame_addr, max_stack_frames, use_rbp, breakpoints, &tracer.tracee_ctl)
        .unwrap_or(true)
}

/// `continue` (§4.4/§6): the bounded half (`prepare_resume`) runs inline;
/// the actual indefinite wait is handed off to the async wait thread.
fn handle_continue(state: &Arc<Mutex<EngineState>>, request_tx: &Sender<Request>, response_tx: &Sender<Response>) {
    let mut guard = state.lock().unwrap();
    if guard.subordinate.as_ref().map(|s| s.paused.is_none()).unwrap_or(true) {
        drop(guard);
        emit_warning(response_tx, Error::NotPaused.to_string());
        return;
    }
    if let Some(sub) = guard.subordinate.as_mut() {
        sub.paused = None;
        sub.stepping_thread = None;
    }

    if let Err(e) = prepare_resume_current(&mut guard) {
        drop(guard);
        emit_error(response_tx, e);
        return;
    }
    drop(guard);
    let _ = response_tx.send(Response::StateUpdated);
    spawn_async_wait(Arc::clone(state), request_tx.clone());
}

/// `step` (§4.4/§6). Single-step and step-into are bounded, so they run
/// synchronously; step-over/step-out only plant breakpoints here and hand
/// the actual resume-and-wait off, same as `continue`.
fn handle_step(kind: StepKind, state: &Arc<Mutex<EngineState>>, request_tx: &Sender<Request>, response_tx: &Sender<Response>, config: &EngineConfig) {
    let mut guard = state.lock().unwrap();
    if guard.subordinate.as_ref().map(|s| s.paused.is_none()).unwrap_or(true) {
        drop(guard);
        emit_warning(response_tx, Error::NotPaused.to_string());
        return;
    }

    let load_addr = guard.subordinate.as_ref().map(|s| s.load_addr).unwrap_or(0);
    let use_rbp = guard.subordinate.as_ref().map(|s| s.can_use_frame_pointer_unwinding).unwrap_or(false);
    if let Some(sub) = guard.subordinate.as_mut() {
        sub.stepping_thread = Some(sub.child_pid);
        sub.paused = None;
    }

    match kind {
        StepKind::Single | StepKind::Into => {
            let EngineState { target, breakpoints, subordinate, .. } = &mut *guard;
            let result: Result<bool, Error> = (|| {
                let target = target.as_ref().ok_or(Error::NoTarget)?;
                let sub = subordinate.as_mut().ok_or(Error::ProcessNotStarted)?;
                let pid = sub.child_pid;
                let tracer = sub.tracer.as_mut().ok_or(Error::ProcessNotStarted)?;
                let stepper = StepEngine::new(target, load_addr);
                match kind {
                    StepKind::Single => {
                        stepper.single_step(pid, tracer)?;
                        Ok(true)
                    }
                    StepKind::Into => {
                        stepper.step_into(pid, tracer, breakpoints, use_rbp, config.step_into_retry_budget)?;
                        Ok(true)
                    }
                    _ => unreachable!(),
                }
            })();

            match result {
                Ok(_) => build_and_store_pause_data_locked(&mut guard, None),
                Err(e) => {
                    drop(guard);
                    emit_error(response_tx, e);
                    return;
                }
            }
            drop(guard);
            let _ = response_tx.send(Response::StateUpdated);
        }
        StepKind::Over | StepKind::OutOf => {
            let EngineState { target, breakpoints, subordinate, .. } = &mut *guard;
            let result: Result<(), Error> = (|| {
                let target = target.as_ref().ok_or(Error::NoTarget)?;
                let sub = subordinate.as_mut().ok_or(Error::ProcessNotStarted)?;
                let pid = sub.child_pid;
                let stepper = StepEngine::new(target, load_addr);
                match kind {
                    StepKind::Over => stepper.step_over(pid, pid, breakpoints, use_rbp),
                    StepKind::OutOf => stepper.step_out(pid, breakpoints, use_rbp),
                    _ => unreachable!(),
                }
            })();

            if let Err(e) = result {
                drop(guard);
                emit_error(response_tx, e);
                return;
            }

            if let Err(e) = prepare_resume_current(&mut guard) {
                drop(guard);
                emit_error(response_tx, e);
                return;
            }
            drop(guard);
            spawn_async_wait(Arc::clone(state), request_tx.clone());
        }
    }
}

/// `stopped` (§6): internal, synthesized by the async wait thread. Decides
/// whether the stop surfaces (recursion guard, §4.4) or the subordinate
/// should simply be resumed again.
fn handle_stopped(
    pid: Pid,
    exited: Option<i32>,
    _should_stop_debugger: bool,
    state: &Arc<Mutex<EngineState>>,
    request_tx: &Sender<Request>,
    response_tx: &Sender<Response>,
) {
    let mut guard = state.lock().unwrap();
    let matches_current = guard.subordinate.as_ref().map(|s| s.child_pid) == Some(pid);
    if !matches_current {
        return;
    }

    if let Some(code) = exited {
        guard.subordinate = None;
        drop(guard);
        emit_info(response_tx, format!("subordinate exited with code {code}"));
        let _ = response_tx.send(Response::Reset);
        return;
    }

    let stop_reason = guard.subordinate.as_mut().and_then(|s| s.last_stop.take());
    let Some(stop_reason) = stop_reason else {
        drop(guard);
        spawn_async_wait(Arc::clone(state), request_tx.clone());
        return;
    };

    let load_addr = guard.subordinate.as_ref().map(|s| s.load_addr).unwrap_or(0);

    let (surface, breakpoint_bid) = match stop_reason {
        StopReason::Breakpoint(stop_pid, relocated) => {
            let global_addr = relocated.remove_load_offset(load_addr);
            let bid = guard.breakpoints.at_addr(global_addr).map(|b| b.bid);
            if let Some(bid) = bid {
                guard.breakpoints.record_hit(bid);
            }
            let bp_info = bid.and_then(|bid| guard.breakpoints.get(bid)).map(|b| (b.internal, b.call_frame_addr, b.max_stack_frames));

            let surface = match bp_info {
                Some((true, call_frame_addr, max_stack_frames)) => {
                    recursion_guard_decision(&mut guard, stop_pid, call_frame_addr, max_stack_frames)
                }
                _ => true,
            };
            (surface, if surface { bid } else { None })
        }
        StopReason::Signal(_, _) | StopReason::Started | StopReason::NoSuchProcess(_) => (true, None),
    };

    if let Some(sub) = guard.subordinate.as_mut() {
        sub.stepping_thread = None;
    }

    if !surface {
        if let Err(e) = prepare_resume_current(&mut guard) {
            warn!(target: "engine", "prepare_resume failed while silently resuming: {e}");
        }
        drop(guard);
        spawn_async_wait(Arc::clone(state), request_tx.clone());
        return;
    }

    build_and_store_pause_data_locked(&mut guard, breakpoint_bid);
    drop(guard);
    let _ = response_tx.send(Response::StateUpdated);
}

/// Builds a fresh `PauseData` for the subordinate's current stop and
/// stores it (§8's "previous PauseData is freed ... only on the next
/// stop"). A no-op if there's no running subordinate.
fn build_and_store_pause_data_locked(guard: &mut EngineState, bid: Option<u32>) {
    let watch_expressions = guard.watch_expressions.clone();
    let hex_window_addr = guard.hex_window_addr;
    let EngineState { target, subordinate, .. } = guard;

    let Some(target) = target.as_ref() else { return };
    let Some(sub) = subordinate.as_mut() else { return };

    match build_pause_data(target, sub, &watch_expressions, hex_window_addr, bid) {
        Ok(pause_data) => sub.paused = Some(pause_data),
        Err(e) => warn!(target: "engine", "failed to build pause data: {e}"),
    }
}

fn build_pause_data(
    target: &Target,
    subordinate: &mut Subordinate,
    watch_expressions: &[String],
    hex_window_addr: Option<RelocatedAddress>,
    breakpoint_bid: Option<u32>,
) -> Result<PauseData, Error> {
    let pid = subordinate.child_pid;
    let load_addr = subordinate.load_addr;

    let regs = RegisterMap::current(pid)?;
    let pc_relocated = RelocatedAddress::from(regs.value(Register::Rip));
    let pc_global = pc_relocated.remove_load_offset(load_addr);
    let source_location = target.find_place_from_pc(pc_global);

    if !subordinate.has_probed_frame_pointer_unwinding {
        let computer = FrameComputer::new(target, load_addr);
        let rbp_based = computer.frame_base_via_rbp(&regs);
        let cfi_based = crate::muted_error!(computer.frame_base_via_cfi(pc_global, &DwarfRegisterMap::from(regs))).unwrap_or(rbp_based);
        subordinate.can_use_frame_pointer_unwinding = FrameComputer::probe_frame_pointer_unwinding(rbp_based, cfi_based);
        subordinate.has_probed_frame_pointer_unwinding = true;
    }
    let use_rbp = subordinate.can_use_frame_pointer_unwinding;

    let stepper = StepEngine::new(target, load_addr);
    let frame_base_addr = stepper.frame_base(pid, use_rbp)?;
    let stack_frames = stepper.unwind(pid, use_rbp)?;

    let mut hex_displays = Vec::new();
    if let Some(addr) = hex_window_addr {
        if let Some(bytes) = crate::muted_error!(process::read_memory(pid, addr.as_usize(), HEX_WINDOW_BYTES)) {
            hex_displays.push(HexDisplay { addr, bytes });
        }
    }

    let strings = target.strings().clone();
    let mut locals = Vec::new();
    let mut watches = Vec::new();

    if let Some((_, func)) = target.find_function_by_pc(pc_global) {
        if let Some(unit) = target.find_unit_by_pc(pc_global) {
            if let Some(encoder) = crate::muted_error!(encoder_for(unit)) {
                let dwarf_regs = DwarfRegisterMap::from(regs);

                for &var_ndx in &func.variable_indices {
                    let variable = unit.variable(var_ndx);
                    let name = variable.name_hash.and_then(|h| strings.get(h)).unwrap_or("").to_string();
                    let hash = variable.name_hash.unwrap_or(0);
                    locals.push(render_one(unit, func, encoder.as_ref(), &strings, pid, frame_base_addr, dwarf_regs.clone(), &name, hash));
                }

                for expr in watch_expressions {
                    let hash = crate::target::string_cache::hash_str(expr);
                    watches.push(render_one(unit, func, encoder.as_ref(), &strings, pid, frame_base_addr, dwarf_regs.clone(), expr, hash));
                }
            }
        }
    }

    Ok(PauseData {
        pid,
        registers: regs,
        source_location,
        breakpoint: breakpoint_bid,
        frame_base_addr,
        stack_frames,
        hex_displays,
        locals,
        watches,
        strings,
    })
}

fn render_one(
    unit: &crate::target::CompileUnit,
    func: &crate::target::Function,
    encoder: &dyn crate::eval::LanguageEncoder,
    strings: &crate::target::StringCache,
    pid: Pid,
    frame_base: RelocatedAddress,
    registers: DwarfRegisterMap,
    name: &str,
    hash: u64,
) -> ExpressionResult {
    match eval::evaluate_expression(unit, func, encoder, strings, pid, frame_base, registers, name, hash) {
        Ok(result) => result,
        Err(e) => {
            debug!(target: "engine", "failed to evaluate `{name}`: {e}");
            ExpressionResult { expression_hash: hash, fields: vec![eval::unknown_field(name)] }
        }
    }
}

/// `kill` (§6): synchronous force-termination, completing before the
/// subordinate's memory is reset (§5's "Force-kill on the subordinate is
/// synchronous"). Also the control thread's own teardown path on `quit`.
fn handle_kill(state: &Arc<Mutex<EngineState>>, response_tx: &Sender<Response>) {
    let mut guard = state.lock().unwrap();
    let Some(sub) = guard.subordinate.take() else { return };

    if let Err(e) = nix::sys::signal::kill(sub.child_pid, nix::sys::signal::Signal::SIGKILL) {
        if e != nix::errno::Errno::ESRCH {
            warn!(target: "engine", "failed to kill subordinate {}: {e}", sub.child_pid);
        }
    }
    let _ = nix::sys::wait::waitpid(sub.child_pid, None);

    drop(guard);
    let _ = response_tx.send(Response::Reset);
}

/// `update_breakpoint` (§6): toggles existence at a location resolved from
/// the request's `bid`/`addr`/`source` union.
fn handle_update_breakpoint(loc: BreakpointLocation, state: &Arc<Mutex<EngineState>>, response_tx: &Sender<Response>) {
    let mut guard = state.lock().unwrap();

    let resolved_addr = match &loc {
        BreakpointLocation::Addr(addr) => Some((*addr, None)),
        BreakpointLocation::Bid(bid) => guard.breakpoints.get(*bid).map(|b| (b.addr, b.source_location.clone())),
        BreakpointLocation::Source { file_hash, line } => {
            let Some(target) = guard.target.as_ref() else {
                drop(guard);
                emit_error(response_tx, Error::NoTarget);
                return;
            };
            resolve_source_location(target, *file_hash, *line)
        }
    };

    let Some((addr, source_location)) = resolved_addr else {
        drop(guard);
        emit_warning(response_tx, "no source location found for breakpoint update".to_string());
        return;
    };

    let load_addr = guard.subordinate.as_ref().map(|s| s.load_addr).unwrap_or(0);
    let fallback_ctl = empty_tracee_ctl();
    let EngineState { breakpoints, subordinate, .. } = &mut *guard;
    let tracee_ctl: &TraceeCtl = subordinate.as_ref().and_then(|s| s.tracer.as_ref()).map(|t| &t.tracee_ctl).unwrap_or(&fallback_ctl);

    let result = breakpoints.add(addr, source_location, false, None, None, tracee_ctl, load_addr);
    if let Err(e) = result {
        drop(guard);
        emit_error(response_tx, e);
        return;
    }

    drop(guard);
    let _ = response_tx.send(Response::StateUpdated);
}

fn resolve_source_location(target: &Target, file_hash: u64, line: u64) -> Option<(crate::address::GlobalAddress, Option<crate::target::Place>)> {
    for unit in target.compile_units() {
        for file in &unit.files {
            if crate::target::string_cache::hash_str(&file.to_string_lossy()) == file_hash {
                if let Some(place) = breakpoint::resolve_location(unit, file, line) {
                    return Some((place.address, Some(place)));
                }
            }
        }
    }
    None
}

/// An empty `TraceeCtl`, used for `BreakpointManager` calls made before a
/// subordinate exists (no real thread to install into yet).
fn empty_tracee_ctl() -> TraceeCtl {
    let placeholder = Pid::from_raw(0);
    let mut ctl = TraceeCtl::new(placeholder);
    ctl.remove(placeholder);
    ctl
}

/// `toggle_breakpoint` (§6): flips `active` without touching existence.
fn handle_toggle_breakpoint(bid: u32, state: &Arc<Mutex<EngineState>>, response_tx: &Sender<Response>) {
    let mut guard = state.lock().unwrap();
    let Some(bp) = guard.breakpoints.get(bid) else {
        drop(guard);
        emit_warning(response_tx, Error::BreakpointNotFound(bid).to_string());
        return;
    };
    let next_active = !bp.is_active();

    let load_addr = guard.subordinate.as_ref().map(|s| s.load_addr).unwrap_or(0);
    let fallback_ctl = empty_tracee_ctl();
    let EngineState { breakpoints, subordinate, .. } = &mut *guard;
    let tracee_ctl: &TraceeCtl = subordinate.as_ref().and_then(|s| s.tracer.as_ref()).map(|t| &t.tracee_ctl).unwrap_or(&fallback_ctl);

    if let Err(e) = breakpoints.set_active(bid, next_active, tracee_ctl, load_addr) {
        drop(guard);
        emit_error(response_tx, e);
        return;
    }

    drop(guard);
    let _ = response_tx.send(Response::StateUpdated);
}

/// `set_hex_window_address` (§6): re-renders the hex display immediately
/// if currently paused, so the UI doesn't have to issue a `continue` to see
/// the new window.
fn handle_set_hex_window(addr: RelocatedAddress, state: &Arc<Mutex<EngineState>>, response_tx: &Sender<Response>) {
    let mut guard = state.lock().unwrap();
    guard.hex_window_addr = Some(addr);
    if guard.subordinate.as_ref().map(|s| s.paused.is_some()).unwrap_or(false) {
        let bid = guard.subordinate.as_ref().and_then(|s| s.paused.as_ref()).and_then(|p| p.breakpoint);
        build_and_store_pause_data_locked(&mut guard, bid);
    }
    drop(guard);
    let _ = response_tx.send(Response::StateUpdated);
}

/// `set_watch_expressions` (§6): replaces the watch set and, if paused,
/// re-renders the current `PauseData.watches[]` against it.
fn handle_set_watches(expressions: Vec<String>, state: &Arc<Mutex<EngineState>>, response_tx: &Sender<Response>) {
    let mut guard = state.lock().unwrap();
    guard.watch_expressions = expressions;
    if guard.subordinate.as_ref().map(|s| s.paused.is_some()).unwrap_or(false) {
        let bid = guard.subordinate.as_ref().and_then(|s| s.paused.as_ref()).and_then(|p| p.breakpoint);
        build_and_store_pause_data_locked(&mut guard, bid);
    }
    drop(guard);
    let _ = response_tx.send(Response::StateUpdated);
}
