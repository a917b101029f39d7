//! Scenario 4 (step-out-of-recursion): unwinding a deep recursive call
//! stack must see strictly more frames the deeper the recursion goes, and
//! stepping out of the innermost frame must surface at a shallower depth.
//! `-fomit-frame-pointer` forces the probe to disagree at the first stop,
//! latching DWARF CFI unwinding for this subordinate's whole life, so this
//! is also the direct regression test for CFI-based multi-frame unwinding.

use crate::common::*;
use bugcore::engine::{BreakpointLocation, Engine, EngineConfig, Request, StepKind};

#[test]
#[serial_test::serial]
fn cfi_unwind_depth_grows_with_recursion_and_step_out_shallows_it() {
    let bin = compile_c_fixture("recursion_fixture", RECURSION_C, &["-fomit-frame-pointer"]);
    let hash = file_hash(&bin, "recursion_fixture.c");

    let engine = Engine::new(EngineConfig::for_ci());
    engine.send(Request::LoadSymbols { path: bin.clone() }).unwrap();
    wait_for_symbols_loaded(&engine);

    engine
        .send(Request::UpdateBreakpoint { loc: BreakpointLocation::Source { file_hash: hash, line: RECURSION_CALL_LINE } })
        .unwrap();
    next_state_updated(&engine);

    engine.send(Request::Launch { path: bin, args: vec![], stop_on_entry: false }).unwrap();

    // fact(6) hits the breakpoint once per level except the base case:
    // n = 6, 5, 4, 3, 2 — five hits, each one frame deeper than the last.
    let mut depths = Vec::new();
    for _ in 0..5 {
        let snapshot = wait_for_stop(&engine);
        depths.push(snapshot.paused.unwrap().stack_frames.len());
        if depths.len() < 5 {
            engine.send(Request::Continue).unwrap();
        }
    }

    for pair in depths.windows(2) {
        assert!(pair[1] > pair[0], "unwound depth must strictly grow with recursion, got {depths:?}");
    }

    let deepest = *depths.last().unwrap();
    engine.send(Request::Step(StepKind::OutOf)).unwrap();
    let snapshot = wait_for_stop(&engine);
    let after_step_out = snapshot.paused.unwrap().stack_frames.len();
    assert!(after_step_out < deepest, "stepping out of the innermost recursive frame must surface at a shallower depth");
}
