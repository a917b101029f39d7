//! Scenario 1 (breakpoint hit-count 0 → 1) and scenario 6 (toggling a
//! breakpoint while stopped doesn't make it re-trigger on the next
//! continue), per the six end-to-end scenarios a stepping/breakpoint
//! implementation must satisfy.

use crate::common::*;
use bugcore::engine::{BreakpointLocation, Engine, EngineConfig, Request};
use serial_test::serial;
use std::time::Duration;

#[test]
#[serial]
fn breakpoint_hit_count_increments_on_first_stop() {
    let bin = compile_c_fixture("bp_loop_print", LOOP_PRINT_C, &[]);
    let hash = file_hash(&bin, "bp_loop_print.c");

    let engine = Engine::new(EngineConfig::for_ci());
    engine.send(Request::LoadSymbols { path: bin.clone() }).unwrap();
    wait_for_symbols_loaded(&engine);

    engine
        .send(Request::UpdateBreakpoint { loc: BreakpointLocation::Source { file_hash: hash, line: LOOP_PRINT_INCREMENT_LINE } })
        .unwrap();
    let snapshot = next_state_updated(&engine);
    let bp = breakpoint_at_line(&snapshot, LOOP_PRINT_INCREMENT_LINE);
    assert_eq!(bp.hit_count, 0);

    engine.send(Request::Launch { path: bin, args: vec![], stop_on_entry: false }).unwrap();
    let snapshot = wait_for_stop(&engine);
    let bp = breakpoint_at_line(&snapshot, LOOP_PRINT_INCREMENT_LINE);
    assert_eq!(bp.hit_count, 1);
    assert_eq!(snapshot.paused.unwrap().breakpoint, Some(bp.bid));
}

#[test]
#[serial]
fn toggled_off_breakpoint_does_not_retrigger() {
    let bin = compile_c_fixture("bp_toggle_loop_print", LOOP_PRINT_C, &[]);
    let hash = file_hash(&bin, "bp_toggle_loop_print.c");

    let engine = Engine::new(EngineConfig::for_ci());
    engine.send(Request::LoadSymbols { path: bin.clone() }).unwrap();
    wait_for_symbols_loaded(&engine);

    engine
        .send(Request::UpdateBreakpoint { loc: BreakpointLocation::Source { file_hash: hash, line: LOOP_PRINT_INCREMENT_LINE } })
        .unwrap();
    let snapshot = next_state_updated(&engine);
    let bid = breakpoint_at_line(&snapshot, LOOP_PRINT_INCREMENT_LINE).bid;

    engine.send(Request::Launch { path: bin, args: vec![], stop_on_entry: false }).unwrap();
    let snapshot = wait_for_stop(&engine);
    assert_eq!(snapshot.paused.unwrap().breakpoint, Some(bid));

    engine.send(Request::ToggleBreakpoint { bid }).unwrap();
    let snapshot = next_state_updated(&engine);
    assert!(!breakpoint_at_line(&snapshot, LOOP_PRINT_INCREMENT_LINE).active);

    engine.send(Request::Continue).unwrap();
    expect_no_stop_within(&engine, Duration::from_millis(500));

    let snapshot = engine.state();
    let bp = breakpoint_at_line(&snapshot, LOOP_PRINT_INCREMENT_LINE);
    assert_eq!(bp.hit_count, 1, "a deactivated breakpoint must not record further hits");
}
